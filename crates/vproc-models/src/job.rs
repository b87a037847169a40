//! Job definitions for queue processing.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job. Doubles as the video asset id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Payload of one queue entry. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    /// Producer-assigned job id (also the asset id)
    pub job_id: JobId,
    /// Opaque source locator (URL or object-store key)
    pub source_location: String,
    /// Name of the uploaded file
    pub original_name: String,
}

impl VideoJob {
    /// Create a job with a fresh id.
    pub fn new(source_location: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            source_location: source_location.into(),
            original_name: original_name.into(),
        }
    }

    /// Use an explicit job id.
    pub fn with_job_id(mut self, job_id: impl Into<JobId>) -> Self {
        self.job_id = job_id.into();
        self
    }
}

/// Flat field set written to the queue for each job.
///
/// `payload` holds the serialized [`VideoJob`]; the remaining fields are
/// denormalized copies for operators inspecting the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    pub job_id: String,
    pub source_location: String,
    pub original_name: String,
    pub payload: String,
    pub enqueued_at: i64,
}

impl QueueEnvelope {
    pub const FIELD_JOB_ID: &'static str = "job_id";
    pub const FIELD_SOURCE_LOCATION: &'static str = "source_location";
    pub const FIELD_ORIGINAL_NAME: &'static str = "original_name";
    pub const FIELD_PAYLOAD: &'static str = "payload";
    pub const FIELD_ENQUEUED_AT: &'static str = "enqueued_at";

    /// Build the envelope for a job, stamped with `now`.
    pub fn from_job(job: &VideoJob, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            job_id: job.job_id.to_string(),
            source_location: job.source_location.clone(),
            original_name: job.original_name.clone(),
            payload: serde_json::to_string(job)?,
            enqueued_at: now.timestamp(),
        })
    }

    /// Field/value pairs in wire order.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (Self::FIELD_JOB_ID, self.job_id.clone()),
            (Self::FIELD_SOURCE_LOCATION, self.source_location.clone()),
            (Self::FIELD_ORIGINAL_NAME, self.original_name.clone()),
            (Self::FIELD_PAYLOAD, self.payload.clone()),
            (Self::FIELD_ENQUEUED_AT, self.enqueued_at.to_string()),
        ]
    }

    /// Decode the job carried in `payload`.
    pub fn decode_payload(payload: &str) -> Result<VideoJob, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_generation() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_envelope_fields() {
        let job = VideoJob::new("s3://bucket/src.mp4", "src.mp4").with_job_id("v1");
        let now = Utc::now();
        let envelope = QueueEnvelope::from_job(&job, now).unwrap();

        let fields = envelope.to_fields();
        assert_eq!(fields[0], ("job_id", "v1".to_string()));
        assert_eq!(fields[4], ("enqueued_at", now.timestamp().to_string()));

        let decoded = QueueEnvelope::decode_payload(&envelope.payload).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(QueueEnvelope::decode_payload("{not json").is_err());
        assert!(QueueEnvelope::decode_payload(r#"{"job_id":"x"}"#).is_err());
    }
}
