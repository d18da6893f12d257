//! Event protocol between the orchestrator's per-turn loop and its consumer (the transport edge).
//!
//! Grounded in the teacher's `agent::loop_events::{LoopEvent, LoopInput}` split, trimmed to the
//! variants SPEC_FULL.md §4.6/§4.7 actually names (no thinking blocks, citations, or work-mode
//! events — this runtime has no extended-thinking or plan/build mode toggle).

use serde::Serialize;
use serde_json::Value;

/// Emitted by the orchestrator as a turn progresses. The transport edge maps these to outbound
/// WebSocket frames (SPEC_FULL.md §4.7), filtering null fields before send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    AssistantMessage { token: String, is_final: bool },
    AgentSwitched {
        from_agent: Option<String>,
        to_agent: String,
        reason: String,
        confidence: Option<f64>,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
        requires_approval: bool,
    },
    ApprovalRequired {
        request_id: String,
        subject: String,
        arguments: Value,
        reason: Option<String>,
    },
    TurnComplete { has_more: bool },
    Finished { session_id: String },
    Error { error: String },
}

/// External inputs the transport edge or REST layer feeds back into a running turn.
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// A `tool_result` frame from the IDE, matched to an `AwaitingRemote` tool_call by id.
    RemoteToolResult {
        call_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Cancel,
}
