//! Prometheus metrics for Kelder.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.
//!
//! Recording helpers are safe to call before `init_metrics()`; without an
//! installed recorder they are no-ops.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::signing::Purpose;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "kelder_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "kelder_http_request_duration_seconds";

/// Tenant resolutions (counter). Labels: outcome (default, elevated, rejected).
pub const TENANT_RESOLUTIONS_TOTAL: &str = "kelder_tenant_resolutions_total";

/// Rejected tokens (counter). Labels: purpose.
pub const SIGNATURE_REJECTIONS_TOTAL: &str = "kelder_signature_rejections_total";

/// Blob records created (counter).
pub const BLOBS_CREATED_TOTAL: &str = "kelder_blobs_created_total";

/// Total bytes received in uploads (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "kelder_bytes_received_total";

/// Total bytes sent in downloads (counter).
pub const BYTES_SENT_TOTAL: &str = "kelder_bytes_sent_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        TENANT_RESOLUTIONS_TOTAL,
        "Request tenant resolutions by outcome"
    );
    describe_counter!(
        SIGNATURE_REJECTIONS_TOTAL,
        "Tokens rejected during verification, by purpose"
    );
    describe_counter!(BLOBS_CREATED_TOTAL, "Blob records created");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (uploads)");
    describe_counter!(BYTES_SENT_TOTAL, "Total bytes sent (downloads)");
}

// -- Recording helpers --------------------------------------------------------

pub fn record_tenant_resolution(outcome: &'static str) {
    counter!(TENANT_RESOLUTIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_signature_rejection(purpose: Purpose) {
    counter!(SIGNATURE_REJECTIONS_TOTAL, "purpose" => purpose.as_str()).increment(1);
}

pub fn record_blob_created() {
    counter!(BLOBS_CREATED_TOTAL).increment(1);
}

pub fn record_bytes_received(bytes: usize) {
    counter!(BYTES_RECEIVED_TOTAL).increment(bytes as u64);
}

pub fn record_bytes_sent(bytes: usize) {
    counter!(BYTES_SENT_TOTAL).increment(bytes as u64);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// Tokens, ids and filenames never become label values.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/blobs/12` -> `/blobs/{id}`
/// - `/blobs/redirect/<token>/a.txt` -> `/blobs/redirect/{signed_id}/{filename}`
/// - `/disk/<token>/a.txt` -> `/disk/{token}/{filename}`
/// - `/disk/<token>` -> `/disk/{token}`
fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let template = match segments.as_slice() {
        [""] => "/",
        ["health"] => "/health",
        ["metrics"] => "/metrics",
        ["direct_uploads"] => "/direct_uploads",
        ["blobs"] => "/blobs",
        ["blobs", "redirect", _, _, ..] => "/blobs/redirect/{signed_id}/{filename}",
        ["blobs", _] => "/blobs/{id}",
        ["disk", _] => "/disk/{token}",
        ["disk", _, _, ..] => "/disk/{token}/{filename}",
        _ => "/{other}",
    };
    template.to_string()
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Prometheus recorder not initialized",
        )
            .into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/direct_uploads"), "/direct_uploads");
        assert_eq!(normalize_path("/blobs"), "/blobs");
    }

    #[test]
    fn test_normalize_path_blob_routes() {
        assert_eq!(normalize_path("/blobs/12"), "/blobs/{id}");
        assert_eq!(
            normalize_path("/blobs/redirect/abc.def/report.pdf"),
            "/blobs/redirect/{signed_id}/{filename}"
        );
    }

    #[test]
    fn test_normalize_path_disk_routes() {
        assert_eq!(normalize_path("/disk/abc.def"), "/disk/{token}");
        assert_eq!(
            normalize_path("/disk/abc.def/nested/name.txt"),
            "/disk/{token}/{filename}"
        );
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/wp-admin/login.php"), "/{other}");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_tenant_resolution("default");
        record_signature_rejection(Purpose::BlobKey);
        record_blob_created();
        record_bytes_received(10);
        record_bytes_sent(10);
    }
}
