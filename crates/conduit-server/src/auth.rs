//! Shared-secret gate for the Administrative REST surface (SPEC_FULL.md §6).
//!
//! Grounded in the teacher's `auth::auth_middleware` shape (a `middleware::from_fn_with_state`
//! guard inspecting a header before `next.run`), simplified from the teacher's optional
//! multi-tenant `X-User-Id` scoping (out of scope here) to the internal-shared-secret check
//! SPEC_FULL.md §6 names. No JWT verification library is part of this runtime's dependency
//! stack, so only the shared-secret form of "internal shared secret header or a bearer JWT" is
//! implemented; a bearer JWT deployment would add a verifier here without touching callers.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Rejects requests that don't carry the configured `INTERNAL_API_KEY` as a bearer token, unless
/// no key is configured (self-host / local-dev mode, matching the teacher's "no auth headers =>
/// single-tenant local mode" default).
pub async fn require_shared_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.internal_api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
