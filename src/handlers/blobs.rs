//! Blob handlers: direct upload creation, uploads, lookup and redirects.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{check_upload_size, content_type, json_response};
use crate::blob::{encode_filename, DirectUploadRequest, Disposition};
use crate::errors::KelderError;
use crate::metadata::store::{BlobId, BlobRecord};
use crate::tenant::TenantContext;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct DirectUploadBody {
    blob: DirectUploadRequest,
}

/// Blob attributes plus its signed id and redirect URL.
fn blob_json(state: &AppState, blob: &BlobRecord) -> Result<Value, KelderError> {
    let signed_id = state.blobs.signed_id(blob)?;
    let url = format!(
        "/blobs/redirect/{}/{}",
        signed_id,
        encode_filename(&blob.filename)
    );
    let mut value = serde_json::to_value(blob).map_err(anyhow::Error::from)?;
    if let Value::Object(ref mut map) = value {
        map.insert("signed_id".to_string(), Value::String(signed_id));
        map.insert("url".to_string(), Value::String(url));
    }
    Ok(value)
}

fn parse_blob_id(raw: &str) -> Result<BlobId, KelderError> {
    raw.parse()
        .map_err(|_| KelderError::invalid_argument(format!("Invalid blob id: {raw:?}")))
}

/// `POST /direct_uploads` -- record a blob and hand back where to PUT it.
pub async fn create_direct_upload(
    state: Arc<AppState>,
    ctx: &TenantContext,
    body: &Bytes,
) -> Result<Response, KelderError> {
    let request: DirectUploadBody = serde_json::from_slice(body)
        .map_err(|e| KelderError::invalid_argument(format!("Invalid direct upload body: {e}")))?;
    check_upload_size(&state, request.blob.byte_size as usize)?;

    let blob = state
        .blobs
        .create_before_direct_upload(ctx, request.blob)
        .await?;
    let upload_url = state.blobs.direct_upload_url(&blob)?;
    let upload_url = state.resolver.elevate_url(ctx, &upload_url)?;

    let mut value = blob_json(&state, &blob)?;
    value["direct_upload"] = json!({
        "url": upload_url,
        "headers": {
            "Content-Type": blob.content_type,
            "Content-MD5": blob.checksum,
        }
    });
    Ok(json_response(StatusCode::OK, &value))
}

/// `POST /blobs?filename=...` -- store the raw body as a new blob.
pub async fn create_blob(
    state: Arc<AppState>,
    ctx: &TenantContext,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, KelderError> {
    check_upload_size(&state, body.len())?;
    let filename = query
        .get("filename")
        .ok_or_else(|| KelderError::invalid_argument("The filename query parameter is required"))?;

    let blob = state
        .blobs
        .create_after_upload(ctx, filename, content_type(headers), body)
        .await?;
    Ok(json_response(StatusCode::CREATED, &blob_json(&state, &blob)?))
}

/// `GET /blobs/:id` -- a blob of the request's tenant by plain id.
pub async fn show_blob(
    state: Arc<AppState>,
    ctx: &TenantContext,
    id: &str,
) -> Result<Response, KelderError> {
    let blob = state.blobs.find(ctx, parse_blob_id(id)?).await?;
    Ok(json_response(StatusCode::OK, &blob_json(&state, &blob)?))
}

/// `DELETE /blobs/:id` -- purge a blob of the request's tenant.
pub async fn delete_blob(
    state: Arc<AppState>,
    ctx: &TenantContext,
    id: &str,
) -> Result<Response, KelderError> {
    state.blobs.purge(ctx, parse_blob_id(id)?).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `GET /blobs/redirect/:signed_id/*filename` -- redirect to a short-lived
/// disk URL for the blob the signed id names.
pub async fn redirect_blob(
    state: Arc<AppState>,
    ctx: &TenantContext,
    signed_id: &str,
    query: &HashMap<String, String>,
) -> Result<Response, KelderError> {
    let (blob_ctx, blob) = state.blobs.find_signed(ctx, signed_id).await?;
    debug!(tenant = %blob_ctx.tenant(), id = blob.id, "Redirecting to disk URL");

    let disposition = match query.get("disposition").map(String::as_str) {
        Some("attachment") => Disposition::Attachment,
        _ => Disposition::Inline,
    };
    let location = state.blobs.service_url(&blob, disposition)?;
    let location = HeaderValue::from_str(&location).map_err(anyhow::Error::from)?;

    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert("location", location);
    Ok(response)
}
