//! The [`Event`] envelope published on the bus, and its closed type/category enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of event types the runtime publishes. Exhaustive matching here is enforced at
/// compile time rather than sprinkling string comparisons through subscriber code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentSwitched,
    AgentProcessingCompleted,
    AgentErrorOccurred,
    SessionCreated,
    SessionSoftDeleted,
    ToolApprovalRequired,
    ApprovalRequested,
    ApprovalApproved,
    ApprovalRejected,
    ToolExecuted,
    LlmRequestFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Agent,
    Session,
    Tool,
    Approval,
    Llm,
    System,
    Metrics,
}

impl EventType {
    pub fn category(self) -> EventCategory {
        match self {
            EventType::AgentSwitched
            | EventType::AgentProcessingCompleted
            | EventType::AgentErrorOccurred => EventCategory::Agent,
            EventType::SessionCreated | EventType::SessionSoftDeleted => EventCategory::Session,
            EventType::ToolApprovalRequired | EventType::ToolExecuted => EventCategory::Tool,
            EventType::ApprovalRequested
            | EventType::ApprovalApproved
            | EventType::ApprovalRejected => EventCategory::Approval,
            EventType::LlmRequestFailed => EventCategory::Llm,
        }
    }
}

/// An immutable record published on the event bus. Schema versioned so subscribers can evolve
/// independently of publishers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub event_category: EventCategory,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub payload: Value,
    pub source: String,
    pub schema_version: u32,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            event_category: event_type.category(),
            timestamp: Utc::now(),
            session_id: None,
            correlation_id: None,
            causation_id: None,
            payload,
            source: source.into(),
            schema_version: 1,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}
