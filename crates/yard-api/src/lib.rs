//! # yard-api
//!
//! HTTP surface for the trainyard orchestrator. One binary serves:
//!
//! - `POST /api/train` — multipart run submission
//! - `GET /api/progress/{run_id}` and `…/stream` — checkpoint snapshot
//!   and SSE feed
//! - `GET /api/runs/{run_id}/outcome` — terminal result
//! - `/openapi.json`, `/health/*`, `/metrics` — operational surface
//!
//! [`app`] assembles the router from an [`AppState`]; `main.rs` wires
//! the store, archive, and worker pool behind it.

pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use yard_store::ObjectStore;

use crate::middleware::metrics::{metrics_middleware, ApiMetrics, METRICS_CONTENT_TYPE};

pub use crate::error::ApiError;
pub use crate::state::AppState;

/// Uploads above this size are rejected before the handler runs.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Env flag turning on per-request metrics recording.
const METRICS_ENV: &str = "YARD_METRICS_ENABLED";

/// Build the full application router.
pub fn app(state: AppState) -> Router {
    let metrics = ApiMetrics::new();

    let mut api = Router::new()
        .merge(routes::train::router())
        .merge(routes::runs::router())
        .merge(openapi::router())
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http());
    if metrics_enabled() {
        api = api
            .layer(axum::middleware::from_fn(metrics_middleware))
            .layer(Extension(metrics.clone()));
    }

    let ops = Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .layer(Extension(metrics))
        .with_state(state);

    api.merge(ops)
}

fn metrics_enabled() -> bool {
    std::env::var(METRICS_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Liveness probe.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe; fails when the object store cannot be reached.
async fn readiness(State(state): State<AppState>) -> Response {
    match state.store.bucket_exists(&state.config.scratch_bucket).await {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "object store unreachable").into_response()
        }
    }
}

/// Prometheus scrape endpoint. The board gauge is refreshed here rather
/// than on every request.
async fn prometheus_metrics(
    State(state): State<AppState>,
    Extension(metrics): Extension<ApiMetrics>,
) -> Response {
    metrics.set_tracked_runs(state.board.tracked_runs() as i64);
    match metrics.gather_and_encode() {
        Ok(text) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], text).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
