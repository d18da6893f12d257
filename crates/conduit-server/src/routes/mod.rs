//! Administrative REST surface (SPEC_FULL.md §6). Nested under `/api`, gated by
//! [`crate::auth::require_shared_secret`].

pub mod agents;
pub mod events;
pub mod health;
pub mod sessions;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::{auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/agents", get(agents::list_agents))
        .route("/agents/:session_id/current", get(agents::current_agent))
        .route("/sessions", get(sessions::list_sessions).post(sessions::create_session))
        .route("/sessions/:id/history", get(sessions::history))
        .route("/sessions/:id/pending-approvals", get(sessions::pending_approvals))
        .route("/sessions/:id/hitl-decision", post(sessions::hitl_decision))
        .route("/events/metrics", get(events::metrics))
        .route("/events/audit-log", get(events::audit_log))
        .layer(middleware::from_fn_with_state(state, auth::require_shared_secret))
}
