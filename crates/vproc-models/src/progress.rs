//! Progress events published while a job runs.
//!
//! Events are a best-effort overlay for live UX; the asset row stays the
//! durable record of outcome.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::video::AssetStatus;

/// A single status/progress notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    /// Job the event belongs to
    pub job_id: JobId,
    /// Asset status at the time of the event
    pub status: AssetStatus,
    /// Zero-based index of the rendition being produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage_index: Option<u32>,
    /// Number of renditions in the ladder
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_stages: Option<u32>,
    /// Label of the rendition being produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rendition: Option<String>,
    /// Overall progress (0-100)
    pub percent: u8,
    /// Raw transcoder frame counter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    /// Raw transcoder output position in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_time_ms: Option<i64>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    fn base(job_id: &JobId, status: AssetStatus, percent: u8) -> Self {
        Self {
            job_id: job_id.clone(),
            status,
            current_stage_index: None,
            total_stages: None,
            current_rendition: None,
            percent: percent.min(100),
            frame: None,
            out_time_ms: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Job accepted by the producer.
    pub fn waiting(job_id: &JobId) -> Self {
        Self::base(job_id, AssetStatus::Waiting, 0).with_message("Queued for processing")
    }

    /// Processing started or advanced without a specific stage.
    pub fn processing(job_id: &JobId, percent: u8, message: impl Into<String>) -> Self {
        Self::base(job_id, AssetStatus::Processing, percent).with_message(message)
    }

    /// A rendition stage is about to start.
    pub fn stage(
        job_id: &JobId,
        index: u32,
        total: u32,
        rendition: impl Into<String>,
        percent: u8,
    ) -> Self {
        let rendition = rendition.into();
        let message = format!("Processing {} ({}/{})...", rendition, index + 1, total);
        let mut event = Self::base(job_id, AssetStatus::Processing, percent).with_message(message);
        event.current_stage_index = Some(index);
        event.total_stages = Some(total);
        event.current_rendition = Some(rendition);
        event
    }

    /// Forwarded transcoder tick inside a stage.
    pub fn tick(
        job_id: &JobId,
        index: u32,
        total: u32,
        rendition: impl Into<String>,
        percent: u8,
        frame: u64,
        out_time_ms: i64,
    ) -> Self {
        let mut event = Self::base(job_id, AssetStatus::Processing, percent);
        event.current_stage_index = Some(index);
        event.total_stages = Some(total);
        event.current_rendition = Some(rendition.into());
        event.frame = Some(frame);
        event.out_time_ms = Some(out_time_ms);
        event
    }

    /// Terminal success.
    pub fn completed(job_id: &JobId) -> Self {
        Self::base(job_id, AssetStatus::Completed, 100)
            .with_message("Processing completed successfully!")
    }

    /// Terminal failure at the given percentage.
    pub fn failed(job_id: &JobId, percent: u8, message: impl Into<String>) -> Self {
        Self::base(job_id, AssetStatus::Failed, percent).with_message(message)
    }

    /// Set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Check if the event reports a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
