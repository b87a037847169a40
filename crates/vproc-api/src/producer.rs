//! Job submission.
//!
//! The producer owns the order of the submission writes: the asset row
//! exists before the queue entry does, so a worker never picks up a job
//! whose record is missing.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use validator::Validate;

use vproc_db::MetadataStore;
use vproc_models::{JobId, ProgressEvent, VideoAsset, VideoJob};
use vproc_queue::{DurableQueue, ProgressBus};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// Submission request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitJob {
    /// Explicit job id; one is generated when absent
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub job_id: Option<String>,
    /// URL or object-store key of the uploaded source
    #[validate(length(min = 1, max = 2048))]
    pub source_location: String,
    #[validate(length(max = 255))]
    #[serde(default)]
    pub original_name: Option<String>,
}

impl SubmitJob {
    pub fn new(source_location: impl Into<String>) -> Self {
        Self {
            job_id: None,
            source_location: source_location.into(),
            original_name: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    fn into_job(self) -> ApiResult<VideoJob> {
        let original_name = self
            .original_name
            .unwrap_or_else(|| file_name(&self.source_location).to_string());
        let mut job = VideoJob::new(self.source_location, original_name);
        if let Some(id) = self.job_id {
            if !is_valid_job_id(&id) {
                return Err(ApiError::bad_request("Invalid job ID format"));
            }
            job = job.with_job_id(id);
        }
        Ok(job)
    }
}

/// Creates asset records and enqueues jobs.
#[derive(Clone)]
pub struct JobProducer {
    queue: Arc<dyn DurableQueue>,
    progress: Arc<dyn ProgressBus>,
    db: Arc<dyn MetadataStore>,
}

impl JobProducer {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        progress: Arc<dyn ProgressBus>,
        db: Arc<dyn MetadataStore>,
    ) -> Self {
        Self { queue, progress, db }
    }

    /// Record a waiting asset, append the queue entry and announce it.
    ///
    /// Resubmitting an id that already has a record enqueues it again
    /// without touching the record; the worker decides what to do with it.
    pub async fn submit(&self, request: SubmitJob) -> ApiResult<VideoAsset> {
        request.validate()?;
        let job = request.into_job()?;

        let asset = VideoAsset::waiting(&job);
        let created = self.db.create_asset(&asset).await?;

        let entry_id = self.queue.append(&job).await?;
        metrics::record_job_submitted();

        info!(
            job_id = %job.job_id,
            entry_id = %entry_id,
            resubmitted = !created,
            "Enqueued video job"
        );

        // A live subscriber is a bonus; the snapshot is what matters
        if let Err(e) = self.progress.publish(&ProgressEvent::waiting(&job.job_id)).await {
            warn!(job_id = %job.job_id, "Failed to publish waiting event: {}", e);
        }

        if created {
            return Ok(asset);
        }
        self.db
            .get_asset(&job.job_id)
            .await?
            .ok_or_else(|| ApiError::internal(format!("asset {} vanished after insert", job.job_id)))
    }
}

/// Alphanumerics, hyphens and underscores only.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if is_valid_job_id(raw) {
        Ok(JobId::from(raw))
    } else {
        Err(ApiError::bad_request("Invalid job ID format"))
    }
}

fn file_name(location: &str) -> &str {
    let path = location.split(['?', '#']).next().unwrap_or(location);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(location)
}
