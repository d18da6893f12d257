//! Wire types for the LLM Client (SPEC_FULL.md §4.5.1).
//!
//! Simplified from the teacher's `ai::types`, which serves several provider wire formats
//! (Anthropic content blocks, extended thinking, server-side web search/fetch, context editing).
//! This runtime normalizes to exactly one OpenAI-style chat-completions shape, so only the
//! fields that shape actually carries survive here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call as it appears on an assistant message or in a coalesced stream chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message in the chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

/// A tool declared in the request's `tools` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// One normalized chunk of a streaming completion (SPEC_FULL.md §4.5).
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Delta(String),
    /// A fully coalesced tool call — the client has already accumulated every fragment for this
    /// index and is only emitting it once `finish_reason == "tool_calls"`.
    ToolCallDelta(AiToolCall),
    Usage(Usage),
    Done,
}
