//! Disk handlers serving signed download and direct upload URLs.

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{check_upload_size, content_type};
use crate::errors::KelderError;
use crate::AppState;

/// `GET /disk/:token/*filename` -- serve the bytes a download token names.
pub async fn show(state: Arc<AppState>, token: &str) -> Result<Response, KelderError> {
    let download = state.blobs.download(token).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_str(&download.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        "content-disposition",
        HeaderValue::from_str(&download.content_disposition).map_err(anyhow::Error::from)?,
    );
    headers.insert(
        "content-length",
        HeaderValue::from_str(&download.data.len().to_string()).map_err(anyhow::Error::from)?,
    );

    Ok((StatusCode::OK, headers, download.data).into_response())
}

/// `PUT /disk/:token` -- accept the bytes of a direct upload.
pub async fn update(
    state: Arc<AppState>,
    token: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, KelderError> {
    check_upload_size(&state, body.len())?;
    state
        .blobs
        .upload_direct(token, content_type(headers), body)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
