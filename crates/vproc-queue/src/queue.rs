//! Durable queue abstraction with consumer-group semantics.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use vproc_models::{QueueEnvelope, VideoJob};

use crate::error::{QueueError, QueueResult};
use crate::progress::DEFAULT_SNAPSHOT_TTL_SECS;

pub const DEFAULT_STREAM_NAME: &str = "video:jobs";
pub const DEFAULT_CONSUMER_GROUP: &str = "video-workers";

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Lifetime of the latest-progress snapshot
    pub snapshot_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            snapshot_ttl: Duration::from_secs(DEFAULT_SNAPSHOT_TTL_SECS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM")
                .unwrap_or_else(|_| DEFAULT_STREAM_NAME.to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_GROUP.to_string()),
            snapshot_ttl: Duration::from_secs(
                std::env::var("PROGRESS_SNAPSHOT_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_SNAPSHOT_TTL_SECS),
            ),
        }
    }
}

/// One delivered entry: its queue-assigned id and raw field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub entry_id: String,
    pub fields: HashMap<String, String>,
}

impl QueueEntry {
    pub fn new(entry_id: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            fields,
        }
    }

    /// Build the field set for a job.
    pub fn fields_for(job: &VideoJob) -> QueueResult<Vec<(&'static str, String)>> {
        let envelope = QueueEnvelope::from_job(job, chrono::Utc::now())?;
        Ok(envelope.to_fields())
    }

    /// Decode the job payload. Entries that can never decode are `Malformed`.
    pub fn decode(&self) -> QueueResult<VideoJob> {
        let payload = self
            .fields
            .get(QueueEnvelope::FIELD_PAYLOAD)
            .ok_or_else(|| QueueError::malformed(&self.entry_id, "missing payload field"))?;

        let job = QueueEnvelope::decode_payload(payload)
            .map_err(|e| QueueError::malformed(&self.entry_id, e.to_string()))?;

        if job.job_id.as_str().is_empty() {
            return Err(QueueError::malformed(&self.entry_id, "empty job_id"));
        }

        Ok(job)
    }
}

/// A delivered-but-unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub entry_id: String,
    /// Consumer currently owning the entry
    pub consumer: String,
    /// Time since the entry was last delivered
    pub idle: Duration,
    pub delivery_count: u64,
}

/// Append-only log with consumer groups.
///
/// Delivery is at-least-once: an entry stays pending in its group until a
/// consumer acks it, and any consumer may claim it once it has been idle
/// long enough. Ack never removes the entry from the log.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Create the group at the start of the log if it does not exist.
    async fn ensure_group(&self, group: &str) -> QueueResult<()>;

    /// Append a job, returning the assigned entry id.
    async fn append(&self, job: &VideoJob) -> QueueResult<String>;

    /// Read never-delivered entries, waiting up to `max_wait` for one to arrive.
    async fn read_as_group(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>>;

    /// All delivered-but-unacked entries of the group.
    async fn list_pending(&self, group: &str) -> QueueResult<Vec<PendingEntry>>;

    /// Transfer ownership of entries idle for at least `min_idle`.
    ///
    /// Entries that are not idle long enough, already acked, or unknown are
    /// skipped. The idle check and the transfer are atomic, so two consumers
    /// cannot both claim the same entry.
    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        entry_ids: &[String],
        min_idle: Duration,
    ) -> QueueResult<Vec<QueueEntry>>;

    /// Reset the idle time of entries `consumer` still owns, without
    /// counting a new delivery. Returns how many were refreshed; entries
    /// owned by someone else, acked, or unknown are left alone.
    ///
    /// An owner working on an entry calls this more often than recoverers'
    /// `min_idle`, so a live job is never claimed away.
    async fn heartbeat(&self, group: &str, consumer: &str, entry_ids: &[String]) -> QueueResult<usize>;

    /// Remove an entry from the group's pending set. Unknown ids are a no-op.
    async fn ack(&self, group: &str, entry_id: &str) -> QueueResult<()>;

    /// Number of entries in the log.
    async fn len(&self) -> QueueResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_for(job: &VideoJob) -> QueueEntry {
        let fields = QueueEntry::fields_for(job)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        QueueEntry::new("1-0", fields)
    }

    #[test]
    fn test_decode_round_trip() {
        let job = VideoJob::new("uploads/a.mp4", "a.mp4").with_job_id("v1");
        assert_eq!(entry_for(&job).decode().unwrap(), job);
    }

    #[test]
    fn test_decode_missing_payload_is_malformed() {
        let entry = QueueEntry::new("1-0", HashMap::new());
        let err = entry.decode().unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_decode_bad_json_is_malformed() {
        let mut fields = HashMap::new();
        fields.insert("payload".to_string(), "{nope".to_string());
        let err = QueueEntry::new("7-0", fields).decode().unwrap_err();
        assert!(err.is_malformed());
        assert!(err.to_string().contains("7-0"));
    }

    #[test]
    fn test_decode_empty_job_id_is_malformed() {
        let job = VideoJob::new("uploads/a.mp4", "a.mp4").with_job_id("");
        assert!(entry_for(&job).decode().unwrap_err().is_malformed());
    }
}
