//! Unified error handling for the REST surface (SPEC_FULL.md §7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use conduit_core::CoreError;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Thin wrapper so route handlers can `?`-propagate [`CoreError`] straight into a response.
pub struct AppError(CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError(err)
    }
}

impl From<conduit_core::error::StorageError> for AppError {
    fn from(err: conduit_core::error::StorageError) -> Self {
        AppError(err.into())
    }
}

impl From<conduit_core::error::ApprovalError> for AppError {
    fn from(err: conduit_core::error::ApprovalError) -> Self {
        AppError(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CoreError::PolicyDenied(_) => (StatusCode::FORBIDDEN, "POLICY_DENIED"),
            CoreError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            CoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            CoreError::Protocol(_) => (StatusCode::BAD_REQUEST, "PROTOCOL_ERROR"),
            CoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        (
            status,
            Json(ApiError {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}
