//! Crate-wide error taxonomy.
//!
//! Each component boundary gets its own typed error so callers can match on kind rather than
//! string-sniff. [`CoreError`] is the umbrella type the orchestrator and transport edge actually
//! see; component-internal errors (`StorageError`, `ApprovalError`, ...) convert into it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),
    #[error("pending approval not found: {0}")]
    NotFound(String),
    #[error("approval is not pending (status={0})")]
    NotPending(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    #[error("orphan tool reply for call id: {0}")]
    OrphanReply(String),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned non-2xx status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("circuit breaker open for provider {0}")]
    CircuitOpen(String),
    #[error("stream ended without a done chunk")]
    TruncatedStream,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("iteration limit exceeded ({0})")]
    IterationLimitExceeded(usize),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Umbrella error the server-facing layer matches on to pick a frame/status code (see §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(s) => CoreError::NotFound(s),
            StorageError::AlreadyExists(s) => CoreError::Validation(format!("already exists: {s}")),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

impl From<ApprovalError> for CoreError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotFound(s) => CoreError::NotFound(s),
            ApprovalError::Storage(s) => s.into(),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

impl From<DispatchError> for CoreError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::PolicyDenied(s) => CoreError::PolicyDenied(s),
            DispatchError::Storage(s) => s.into(),
            DispatchError::Approval(s) => s.into(),
            other => CoreError::Protocol(other.to_string()),
        }
    }
}

impl From<LlmError> for CoreError {
    fn from(e: LlmError) -> Self {
        match &e {
            LlmError::Cancelled => CoreError::Timeout("cancelled".to_string()),
            _ => CoreError::Upstream(e.to_string()),
        }
    }
}

impl From<OrchestratorError> for CoreError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::IterationLimitExceeded(n) => {
                CoreError::Timeout(format!("iteration limit exceeded ({n})"))
            }
            OrchestratorError::Llm(e) => e.into(),
            OrchestratorError::Storage(e) => e.into(),
            OrchestratorError::Dispatch(e) => e.into(),
        }
    }
}
