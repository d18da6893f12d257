//! Domain types owned by the Session Store (§3 of SPEC_FULL.md).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub working_dir: Option<String>,
    pub token_count: Option<usize>,
}

impl Session {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

/// A tool call embedded in an assistant message's `tool_calls` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub sequence: i64,
    pub role: MessageRole,
    pub content: Value,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCallRef>>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input to `append_message` before a sequence number / id has been assigned.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Value,
    pub tool_call_id: Option<String>,
    pub tool_calls: Option<Vec<ToolCallRef>>,
    pub name: Option<String>,
}

impl NewMessage {
    pub fn user(content: Value) -> Self {
        Self {
            role: MessageRole::User,
            content,
            tool_call_id: None,
            tool_calls: None,
            name: None,
        }
    }

    pub fn assistant(content: Value, tool_calls: Option<Vec<ToolCallRef>>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
            tool_call_id: None,
            tool_calls,
            name: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: Value) -> Self {
        Self {
            role: MessageRole::Tool,
            content,
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub from: Option<String>,
    pub to: String,
    pub reason: String,
    pub confidence: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Bound on `agent_history`'s in-memory ring; older entries are trimmed on read, not deleted
/// from the table (the full history remains available to audit queries directly against
/// `agent_history`).
pub const AGENT_HISTORY_RING_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub session_id: String,
    pub current_agent: String,
    pub agent_history: Vec<AgentHistoryEntry>,
    pub switch_count: u64,
    pub task_description: Option<String>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            "expired" => Some(ApprovalStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Tool,
    Plan,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Tool => "tool",
            RequestType::Plan => "plan",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool" => Some(RequestType::Tool),
            "plan" => Some(RequestType::Plan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: String,
    pub session_id: String,
    pub request_type: RequestType,
    pub subject: String,
    pub arguments: Value,
    pub reason: Option<String>,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
}

impl PendingApproval {
    /// True once `now` has passed `expires_at`, regardless of the persisted `status` column —
    /// the invariant in SPEC_FULL.md §3 requires this be checked on every read, not just by the
    /// periodic sweep.
    pub fn is_expired_as_of(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Active,
    Completed,
    Cancelling,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskStatus {
    Pending,
    Ready,
    Running,
    Cancelling,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub plan_id: String,
    pub description: String,
    pub agent: String,
    pub status: SubtaskStatus,
    pub depends_on: Vec<String>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
