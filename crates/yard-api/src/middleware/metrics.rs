//! # Prometheus Metrics
//!
//! Request counters and latency histograms for the API, plus a gauge
//! over the progress board that is refreshed on scrape. Run ids are
//! collapsed out of paths so label cardinality stays bounded by the
//! route table.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Content type served on the scrape endpoint.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared metrics handle. Cloning is cheap; all clones feed one registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
    http_errors: IntCounterVec,
    tracked_runs: IntGauge,
}

impl ApiMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("yard_http_requests_total", "Total HTTP requests handled"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(http_requests.clone()))
            .expect("metric can be registered");

        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "yard_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(http_duration.clone()))
            .expect("metric can be registered");

        let http_errors = IntCounterVec::new(
            Opts::new(
                "yard_http_errors_total",
                "HTTP responses with a 4xx or 5xx status",
            ),
            &["method", "path", "status"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(http_errors.clone()))
            .expect("metric can be registered");

        let tracked_runs = IntGauge::new(
            "yard_tracked_runs",
            "Runs with a live progress snapshot on the board",
        )
        .expect("metric can be created");
        registry
            .register(Box::new(tracked_runs.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests,
                http_duration,
                http_errors,
                tracked_runs,
            }),
        }
    }

    /// Record one handled request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, seconds: f64) {
        let status_label = status.to_string();
        self.inner
            .http_requests
            .with_label_values(&[method, path, &status_label])
            .inc();
        self.inner
            .http_duration
            .with_label_values(&[method, path])
            .observe(seconds);
        if status >= 400 {
            self.inner
                .http_errors
                .with_label_values(&[method, path, &status_label])
                .inc();
        }
    }

    /// Refresh the progress-board gauge; called on scrape.
    pub fn set_tracked_runs(&self, count: i64) {
        self.inner.tracked_runs.set(count);
    }

    /// Total requests recorded, summed across label sets.
    pub fn requests(&self) -> u64 {
        sum_counter(&self.inner.http_requests)
    }

    /// Total error responses recorded, summed across label sets.
    pub fn errors(&self) -> u64 {
        sum_counter(&self.inner.http_errors)
    }

    /// Encode the registry in the Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|err| err.to_string())?;
        String::from_utf8(buffer).map_err(|err| err.to_string())
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

fn sum_counter(vec: &IntCounterVec) -> u64 {
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| metric.get_counter().get_value() as u64)
        .sum()
}

/// Collapse run ids so each route yields one `path` label value.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| if looks_like_id(segment) { "{id}" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// Hyphenated UUIDs and 32-char hex strings count as ids.
fn looks_like_id(segment: &str) -> bool {
    if segment.len() == 36 {
        return segment.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        });
    }
    segment.len() == 32 && segment.chars().all(|c| c.is_ascii_hexdigit())
}

/// Layer recording every request against the [`ApiMetrics`] found in
/// request extensions. Requests without one pass through unrecorded.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(metrics) = metrics {
        metrics.record_request(
            &method,
            &path,
            response.status().as_u16(),
            start.elapsed().as_secs_f64(),
        );
    }
    response
}
