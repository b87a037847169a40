//! Worker configuration.

use std::time::Duration;

use vproc_queue::DEFAULT_CONSUMER_GROUP;

use crate::error::{WorkerError, WorkerResult};

const DEFAULT_JOB_TIMEOUT_SECS: u64 = 7200;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer name within the group. Must be stable across restarts so
    /// the worker can pick its own pending entries back up.
    pub consumer_name: String,
    /// Consumer group shared by all workers
    pub consumer_group: String,
    /// Longest a single read blocks before the shutdown flag is rechecked
    pub block_time: Duration,
    /// Entries read per call
    pub read_count: usize,
    /// Wall-clock ceiling for one job
    pub job_timeout: Duration,
    /// How long shutdown waits for the in-flight job before cancelling it.
    /// Defaults to the job ceiling, so a job is only interrupted when this
    /// is set lower.
    pub shutdown_timeout: Duration,
    /// How often the worker should scan for orphaned pending jobs
    pub claim_interval: Duration,
    /// Minimum idle time before another consumer's pending job can be claimed
    pub claim_min_idle: Duration,
    /// How often the entry of the job in flight is refreshed; must stay
    /// below `claim_min_idle`
    pub heartbeat_interval: Duration,
    /// Port for the Prometheus scrape endpoint, if any
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_name: default_consumer_name(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            block_time: Duration::from_millis(5000),
            read_count: 1,
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS), // 2 hours
            shutdown_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300), // 5 minutes
            heartbeat_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

fn default_consumer_name() -> String {
    format!("worker-{}", uuid::Uuid::new_v4())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let job_timeout_secs = std::env::var("WORKER_JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS);

        Self {
            consumer_name: std::env::var("HOSTNAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(default_consumer_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            block_time: Duration::from_millis(
                std::env::var("WORKER_BLOCK_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            read_count: std::env::var("WORKER_READ_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(1),
            job_timeout: Duration::from_secs(job_timeout_secs),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(job_timeout_secs),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            heartbeat_interval: Duration::from_secs(
                std::env::var("WORKER_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Reject settings under which a live job could be claimed by a sibling.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(WorkerError::config_error("heartbeat interval must be positive"));
        }
        if self.heartbeat_interval >= self.claim_min_idle {
            return Err(WorkerError::config_error(format!(
                "heartbeat interval {:?} must be shorter than claim min idle {:?}",
                self.heartbeat_interval, self.claim_min_idle
            )));
        }
        Ok(())
    }

    /// Use a fixed consumer name.
    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.consumer_name.starts_with("worker-"));
        assert_eq!(config.consumer_group, "video-workers");
        assert_eq!(config.job_timeout, Duration::from_secs(7200));
        assert_eq!(config.claim_min_idle, Duration::from_secs(300));
        assert!(config.block_time < config.shutdown_timeout);
        assert!(config.shutdown_timeout >= config.job_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_heartbeat_must_beat_claim_threshold() {
        let slow = WorkerConfig {
            heartbeat_interval: Duration::from_secs(300),
            ..WorkerConfig::default()
        };
        assert!(matches!(slow.validate(), Err(WorkerError::ConfigError(_))));

        let zero = WorkerConfig {
            heartbeat_interval: Duration::ZERO,
            ..WorkerConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_distinct_default_consumers() {
        assert_ne!(
            WorkerConfig::default().consumer_name,
            WorkerConfig::default().consumer_name
        );
    }
}
