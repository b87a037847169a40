//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder. The handle renders `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vproc_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vproc_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vproc_http_requests_in_flight";

    pub const SSE_STREAMS_ACTIVE: &str = "vproc_sse_streams_active";
    pub const SSE_EVENTS_SENT: &str = "vproc_sse_events_sent_total";

    pub const JOBS_SUBMITTED_TOTAL: &str = "vproc_jobs_submitted_total";
}

/// Record an HTTP request. `route` is the matched route template, so ids
/// never end up in label values.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", route.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_sse_opened(scope: &'static str) {
    gauge!(names::SSE_STREAMS_ACTIVE, "scope" => scope).increment(1.0);
}

pub fn record_sse_closed(scope: &'static str) {
    gauge!(names::SSE_STREAMS_ACTIVE, "scope" => scope).decrement(1.0);
}

pub fn record_sse_event(scope: &'static str) {
    counter!(names::SSE_EVENTS_SENT, "scope" => scope).increment(1);
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
