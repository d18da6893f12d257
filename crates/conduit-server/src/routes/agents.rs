//! `GET /agents`, `GET /agents/{session}/current` (SPEC_FULL.md §6, §4.6.1).

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use conduit_core::agent::definitions;

use crate::error::AppError;
use crate::AppState;

#[derive(Serialize)]
pub struct AgentsListResponse {
    pub agents: Vec<&'static str>,
}

pub async fn list_agents() -> Json<AgentsListResponse> {
    Json(AgentsListResponse {
        agents: definitions::all_names(),
    })
}

#[derive(Serialize)]
pub struct CurrentAgentResponse {
    pub current_agent: String,
    pub switch_count: u64,
}

pub async fn current_agent(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<CurrentAgentResponse>, AppError> {
    let context = state
        .store
        .get_context(&session_id)
        .await?
        .ok_or_else(|| conduit_core::CoreError::NotFound(format!("no agent context for session '{session_id}'")))?;

    Ok(Json(CurrentAgentResponse {
        current_agent: context.current_agent,
        switch_count: context.switch_count,
    }))
}
