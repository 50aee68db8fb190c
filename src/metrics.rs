//! Prometheus metrics for swift-search.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides an axum middleware for HTTP RED
//! metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "swift_search_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "swift_search_http_request_duration_seconds";

/// Requests skipped by the eligibility check (counter). Labels: reason.
pub const EVENTS_SKIPPED_TOTAL: &str = "swift_search_events_skipped_total";

/// Publish attempts by final outcome (counter). Labels: outcome.
pub const EVENTS_PUBLISHED_TOTAL: &str = "swift_search_events_published_total";

/// Broker channels opened after a failed publish (counter).
pub const BROKER_RECONNECTS_TOTAL: &str = "swift_search_broker_reconnects_total";

/// Events discarded because the background queue was full (counter).
pub const EVENTS_DROPPED_TOTAL: &str = "swift_search_events_dropped_total";

/// Events waiting in the background queue (gauge).
pub const DISPATCH_QUEUE_DEPTH: &str = "swift_search_dispatch_queue_depth";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
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
    describe_counter!(EVENTS_SKIPPED_TOTAL, "Requests not eligible for indexing");
    describe_counter!(EVENTS_PUBLISHED_TOTAL, "Index events by publish outcome");
    describe_counter!(
        BROKER_RECONNECTS_TOTAL,
        "Broker reconnects after a failed publish"
    );
    describe_counter!(
        EVENTS_DROPPED_TOTAL,
        "Index events dropped because the dispatch queue was full"
    );
    describe_gauge!(DISPATCH_QUEUE_DEPTH, "Index events waiting for dispatch");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
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

/// Normalize a request path to a route template for metric labels.
///
/// Keeps label cardinality bounded regardless of account, container and
/// object names.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/v1/AUTH_test` -> `/{version}/{account}`
/// - `/v1/AUTH_test/photos` -> `/{version}/{account}/{container}`
/// - `/v1/AUTH_test/photos/2026/cat.jpg` -> `/{version}/{account}/{container}/{object}`
/// - `/favicon.ico` -> `/other`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/info" | "/metrics" => path.to_string(),
        _ => match crate::request::PathSegments::parse(path) {
            None => "/other".to_string(),
            Some(segs) => match (segs.container, segs.object) {
                (Some(_), Some(_)) => "/{version}/{account}/{container}/{object}".to_string(),
                (Some(_), None) => "/{version}/{account}/{container}".to_string(),
                _ => "/{version}/{account}".to_string(),
            },
        },
    }
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
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
