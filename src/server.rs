//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every endpoint to its handler and returns a
//! ready-to-serve [`axum::Router`].
//!
//! Thin `handle_*` functions here do the extraction; the handlers in
//! [`crate::handlers`] receive plain values plus the resolved tenant.

use axum::{
    extract::{DefaultBodyLimit, Extension, Path, RawQuery, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::errors::{generate_request_id, KelderError};
use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::resolver::{parse_query, tenant_middleware};
use crate::tenant::TenantContext;
use crate::AppState;

/// Value of the `server` response header.
const SERVER_NAME: &str = "Kelder";

/// Build the axum [`Router`] with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/direct_uploads", post(handle_create_direct_upload))
        .route("/blobs", post(handle_create_blob))
        .route("/blobs/:id", get(handle_show_blob).delete(handle_delete_blob))
        .route(
            "/blobs/redirect/:signed_id/*filename",
            get(handle_redirect_blob),
        )
        .route("/disk/:token/*filename", get(handle_show_disk))
        .route("/disk/:token", put(handle_update_disk))
        // Tenant resolution runs after routing, before any handler extractor.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware,
        ))
        // Health check endpoint (tenant-agnostic).
        .route("/health", get(health_check));

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        // Application state shared across all handlers.
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        // common_headers_middleware adds request id, date and server headers.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware captures the full request lifecycle.
        .layer(middleware::from_fn(metrics_middleware))
        // Upload size is enforced per handler against the configured limit.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

/// Serve `app` until `shutdown` resolves, then give in-flight requests up to
/// `grace` to finish before returning.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
    grace: Duration,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = signalled_tx.send(());
        })
        .into_future();

    let deadline = async move {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => {
            warn!(
                grace_secs = grace.as_secs_f64(),
                "Graceful shutdown timed out, abandoning in-flight requests"
            );
        }
    }
    Ok(())
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `Kelder`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Only set x-request-id if not already present (error responses set it).
    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static(SERVER_NAME));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Blob routes -------------------------------------------------------------

async fn handle_create_direct_upload(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    body: axum::body::Bytes,
) -> Result<Response, KelderError> {
    handlers::blobs::create_direct_upload(state, &ctx, &body).await
}

async fn handle_create_blob(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, KelderError> {
    let query = parse_query(raw_query.as_deref());
    handlers::blobs::create_blob(state, &ctx, &query, &headers, body).await
}

async fn handle_show_blob(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Response, KelderError> {
    handlers::blobs::show_blob(state, &ctx, &id).await
}

async fn handle_delete_blob(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Response, KelderError> {
    handlers::blobs::delete_blob(state, &ctx, &id).await
}

async fn handle_redirect_blob(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Path((signed_id, _filename)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, KelderError> {
    let query = parse_query(raw_query.as_deref());
    handlers::blobs::redirect_blob(state, &ctx, &signed_id, &query).await
}

// -- Disk routes -------------------------------------------------------------

async fn handle_show_disk(
    State(state): State<Arc<AppState>>,
    Path((token, _filename)): Path<(String, String)>,
) -> Result<Response, KelderError> {
    handlers::disk::show(state, &token).await
}

async fn handle_update_disk(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, KelderError> {
    handlers::disk::update(state, &token, &headers, body).await
}

// -- Tests -------------------------------------------------------------------
