//! `GET /events/metrics`, `GET /events/audit-log` (SPEC_FULL.md §6).

use axum::extract::State;
use axum::Json;

use conduit_core::bus::{BusStats, Event};

use crate::AppState;

pub async fn metrics(State(state): State<AppState>) -> Json<BusStats> {
    Json(state.bus.stats())
}

pub async fn audit_log(State(state): State<AppState>) -> Json<Vec<Event>> {
    Json(state.audit.snapshot())
}
