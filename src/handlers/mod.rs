//! HTTP handlers.
//!
//! Each handler receives the shared state plus the already-extracted request
//! parts, and the [`TenantContext`](crate::tenant::TenantContext) the tenant
//! middleware resolved.  Route wiring lives in [`crate::server`].

pub mod blobs;
pub mod disk;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use crate::errors::KelderError;
use crate::AppState;

/// Render `body` as a JSON response with `status`.
pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response {
    (
        status,
        [("content-type", "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Reject bodies above the configured upload limit.
pub(crate) fn check_upload_size(state: &AppState, len: usize) -> Result<(), KelderError> {
    if len as u64 > state.config.server.max_upload_size {
        return Err(KelderError::EntityTooLarge);
    }
    Ok(())
}

/// The request's `Content-Type`, if present and non-empty.
pub(crate) fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
