//! Worker metrics.
//!
//! Recorded through the `metrics` facade; the binary installs a Prometheus
//! recorder when a scrape port is configured, otherwise the calls are no-ops.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric name constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vproc_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "vproc_jobs_skipped_total";
    pub const JOBS_INTERRUPTED_TOTAL: &str = "vproc_jobs_interrupted_total";
    pub const JOBS_MALFORMED_TOTAL: &str = "vproc_jobs_malformed_total";
    pub const JOBS_RECLAIMED_TOTAL: &str = "vproc_jobs_reclaimed_total";
    pub const RENDITIONS_PRODUCED_TOTAL: &str = "vproc_renditions_produced_total";
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";
    pub const BEST_EFFORT_FAILURES_TOTAL: &str = "vproc_best_effort_failures_total";
    pub const QUEUE_READ_ERRORS_TOTAL: &str = "vproc_queue_read_errors_total";
}

/// Serve `/metrics` on `port`.
pub fn install_exporter(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "completed").record(duration_secs);
}

pub fn record_job_failed(duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

/// Job cancelled by shutdown and left for redelivery.
pub fn record_job_interrupted() {
    counter!(names::JOBS_INTERRUPTED_TOTAL).increment(1);
}

/// Redelivered job whose asset was already completed.
pub fn record_job_skipped() {
    counter!(names::JOBS_SKIPPED_TOTAL).increment(1);
}

pub fn record_job_malformed() {
    counter!(names::JOBS_MALFORMED_TOTAL).increment(1);
}

pub fn record_jobs_reclaimed(count: usize) {
    counter!(names::JOBS_RECLAIMED_TOTAL).increment(count as u64);
}

pub fn record_rendition(label: &str) {
    counter!(names::RENDITIONS_PRODUCED_TOTAL, "rendition" => label.to_string()).increment(1);
}

pub fn record_best_effort_failure(kind: &'static str) {
    counter!(names::BEST_EFFORT_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub fn record_read_error() {
    counter!(names::QUEUE_READ_ERRORS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::JOBS_COMPLETED_TOTAL.ends_with("_total"));
        assert!(names::JOB_DURATION_SECONDS.contains("duration"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_job_completed(1.5);
        record_rendition("720p");
        record_best_effort_failure("persistence");
    }
}
