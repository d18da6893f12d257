//! Session CRUD, history, and the HITL decision endpoint (SPEC_FULL.md §6), grounded in the
//! teacher's `routes::sessions` router/handler shape.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conduit_core::storage::{Message, PendingApproval, Session};

use crate::error::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>, AppError> {
    let sessions = state
        .store
        .list(!query.include_deleted, query.limit, query.offset)
        .await?;
    Ok(Json(sessions))
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub system_prompt: Option<String>,
    pub working_dir: Option<String>,
    pub user_id: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Session>, AppError> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let session = state
        .store
        .create(
            &session_id,
            body.system_prompt.as_deref(),
            body.working_dir.as_deref(),
            body.user_id.as_deref(),
        )
        .await?;
    Ok(Json(session))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let messages = state.store.list_messages(&id).await?;
    Ok(Json(messages))
}

pub async fn pending_approvals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PendingApproval>>, AppError> {
    let pending = state.store.list_pending_approvals(&id).await?;
    Ok(Json(pending))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlDecisionKind {
    Approve,
    Reject,
    Edit,
}

#[derive(Deserialize)]
pub struct HitlDecisionRequest {
    pub request_id: String,
    pub decision: HitlDecisionKind,
    pub modified_arguments: Option<Value>,
    pub feedback: Option<String>,
}

#[derive(Serialize)]
pub struct HitlDecisionResponse {
    pub ok: bool,
}

/// Applies an out-of-band HITL decision (e.g. from an operator dashboard, not the IDE's own
/// `approval_decision` WebSocket frame) to a pending approval.
pub async fn hitl_decision(
    State(state): State<AppState>,
    Path(_id): Path<String>,
    Json(body): Json<HitlDecisionRequest>,
) -> Result<Json<HitlDecisionResponse>, AppError> {
    match body.decision {
        HitlDecisionKind::Approve => state.approvals.approve(&body.request_id, None).await?,
        HitlDecisionKind::Edit => {
            state
                .approvals
                .approve(&body.request_id, body.modified_arguments.as_ref())
                .await?
        }
        HitlDecisionKind::Reject => state.approvals.reject(&body.request_id, body.feedback.as_deref()).await?,
    }
    Ok(Json(HitlDecisionResponse { ok: true }))
}
