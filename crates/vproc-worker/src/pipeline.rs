//! Per-job processing state machine.
//!
//! `waiting -> processing -> {completed, failed}`: probe the source, pick the
//! rendition ladder, transcode and upload each rendition, then write the
//! master manifest. Every persistence write is keyed on the job id, so a
//! redelivered job overwrites what an earlier attempt left behind.
//!
//! Writes to the metadata store and progress publishes are best-effort:
//! their failures are collected as [`NonFatalError`]s on the outcome and
//! never fail the job. Probe, transcode and upload failures are fatal.
//! A transcode cancelled by shutdown is neither: the asset stays
//! `processing` and no terminal event is published.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vproc_db::MetadataStore;
use vproc_media::probe::is_url;
use vproc_media::{RenditionOutput, RenditionSpec, SourceInfo, TranscodeTick, Transcoder};
use vproc_models::{AssetStatus, JobId, ProgressEvent, Rendition, VideoAsset, VideoJob};
use vproc_queue::ProgressBus;
use vproc_storage::{keys, ObjectStore, PutBody};

use crate::error::{WorkerError, WorkerResult};
use crate::ladder::{rendition_specs, stage_percent, tick_percent};
use crate::manifest::{build_master_manifest, ManifestVariant};
use crate::metrics;

const MANIFEST_CONTENT_TYPE: &str = vproc_media::PLAYLIST_CONTENT_TYPE;

/// Which best-effort step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonFatalKind {
    /// Metadata store write or read
    Persistence,
    /// Progress bus publish
    Progress,
    /// Presigned URL for a stored artifact
    Presign,
}

impl NonFatalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NonFatalKind::Persistence => "persistence",
            NonFatalKind::Progress => "progress",
            NonFatalKind::Presign => "presign",
        }
    }
}

/// A best-effort step that failed without failing the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonFatalError {
    pub kind: NonFatalKind,
    pub operation: String,
    pub message: String,
}

impl fmt::Display for NonFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.operation, self.kind.as_str(), self.message)
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    /// The asset was already completed; nothing was done
    AlreadyCompleted,
    /// The asset was marked failed with this message
    Failed(String),
    /// Cancelled by shutdown; the asset was left as it was
    Interrupted,
}

/// Result of running one job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Renditions stored during this run
    pub renditions: Vec<Rendition>,
    pub non_fatal: Vec<NonFatalError>,
}

impl JobOutcome {
    /// Whether the queue entry is done with. Failed and interrupted jobs
    /// stay pending so they are redelivered.
    pub fn should_ack(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::AlreadyCompleted)
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Progress forwarded for one rendition.
#[derive(Debug, Default)]
struct ForwardSummary {
    last_percent: u8,
    publish_errors: Vec<String>,
}

/// Where a rendition sits in the ladder.
#[derive(Debug, Clone)]
struct Stage {
    index: usize,
    total: usize,
    label: String,
}

/// Mutable state of one run, kept outside the timed future so it
/// survives a timeout.
struct JobRun {
    job: VideoJob,
    renditions: Vec<Rendition>,
    non_fatal: Vec<NonFatalError>,
    last_percent: u8,
    forwarder: Option<JoinHandle<ForwardSummary>>,
}

impl JobRun {
    fn new(job: &VideoJob) -> Self {
        Self {
            job: job.clone(),
            renditions: Vec::new(),
            non_fatal: Vec::new(),
            last_percent: 0,
            forwarder: None,
        }
    }

    fn job_id(&self) -> &JobId {
        &self.job.job_id
    }

    fn best_effort<T, E: fmt::Display>(
        &mut self,
        kind: NonFatalKind,
        operation: &str,
        result: Result<T, E>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(job_id = %self.job.job_id, "Best-effort {} failed: {}", operation, e);
                metrics::record_best_effort_failure(kind.as_str());
                self.non_fatal.push(NonFatalError {
                    kind,
                    operation: operation.to_string(),
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Wait for the tick forwarder to drain. With `abort`, stop it first.
    async fn finish_forwarder(&mut self, abort: bool) {
        let Some(handle) = self.forwarder.take() else {
            return;
        };
        if abort {
            handle.abort();
        }
        match handle.await {
            Ok(summary) => {
                self.last_percent = self.last_percent.max(summary.last_percent);
                for message in summary.publish_errors {
                    metrics::record_best_effort_failure(NonFatalKind::Progress.as_str());
                    self.non_fatal.push(NonFatalError {
                        kind: NonFatalKind::Progress,
                        operation: "publish tick".to_string(),
                        message,
                    });
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!(job_id = %self.job.job_id, "Progress forwarder panicked: {}", e);
            }
        }
    }

    fn into_outcome(self, status: JobStatus) -> JobOutcome {
        JobOutcome {
            job_id: self.job.job_id,
            status,
            renditions: self.renditions,
            non_fatal: self.non_fatal,
        }
    }
}

/// Runs jobs against injected collaborators.
#[derive(Clone)]
pub struct VideoPipeline {
    transcoder: Arc<dyn Transcoder>,
    store: Arc<dyn ObjectStore>,
    db: Arc<dyn MetadataStore>,
    progress: Arc<dyn ProgressBus>,
    job_timeout: Duration,
}

impl VideoPipeline {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        store: Arc<dyn ObjectStore>,
        db: Arc<dyn MetadataStore>,
        progress: Arc<dyn ProgressBus>,
    ) -> Self {
        Self {
            transcoder,
            store,
            db,
            progress,
            job_timeout: Duration::from_secs(7200),
        }
    }

    /// Wall-clock ceiling for one job.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Run one job to a terminal state.
    pub async fn run(&self, job: &VideoJob) -> JobOutcome {
        let mut run = JobRun::new(job);

        let result = match tokio::time::timeout(self.job_timeout, self.execute(&mut run)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout(self.job_timeout)),
        };

        match result {
            Ok(status) => run.into_outcome(status),
            Err(WorkerError::Cancelled) => {
                run.finish_forwarder(true).await;
                info!(job_id = %run.job_id(), "Job interrupted, leaving it for redelivery");
                run.into_outcome(JobStatus::Interrupted)
            }
            Err(e) => {
                // A timed-out run may have left its forwarder running
                run.finish_forwarder(true).await;
                let message = e.to_string();
                self.mark_failed(&mut run, &message).await;
                run.into_outcome(JobStatus::Failed(message))
            }
        }
    }

    async fn execute(&self, run: &mut JobRun) -> WorkerResult<JobStatus> {
        let job_id = run.job_id().clone();

        let current = match self.db.get_asset(&job_id).await {
            Ok(Some(asset)) => asset.status,
            Ok(None) => {
                let created = self.db.create_asset(&VideoAsset::waiting(&run.job)).await;
                run.best_effort(NonFatalKind::Persistence, "create asset", created);
                AssetStatus::Waiting
            }
            Err(e) => {
                run.best_effort::<(), _>(NonFatalKind::Persistence, "get asset", Err(e));
                AssetStatus::Waiting
            }
        };

        if current == AssetStatus::Completed {
            info!(job_id = %job_id, "Asset already completed, skipping");
            return Ok(JobStatus::AlreadyCompleted);
        }
        let next = current.transition(AssetStatus::Processing)?;

        let updated = self.db.update_status(&job_id, next, None).await;
        run.best_effort(NonFatalKind::Persistence, "mark processing", updated);
        self.publish(run, ProgressEvent::processing(&job_id, 0, "Starting processing"))
            .await;

        let source = self.resolve_source(&run.job.source_location).await?;
        let info = self
            .transcoder
            .probe(&source)
            .await
            .map_err(|e| WorkerError::probe_failed(&e))?;
        info!(
            job_id = %job_id,
            width = info.width,
            height = info.height,
            duration = info.duration,
            "Probed source"
        );

        let updated = self
            .db
            .update_source_info(&job_id, info.width, info.height, info.duration)
            .await;
        run.best_effort(NonFatalKind::Persistence, "store source info", updated);

        let specs = rendition_specs(info.height);
        let total = specs.len();
        for (index, spec) in specs.iter().enumerate() {
            let stage = Stage {
                index,
                total,
                label: spec.label.clone(),
            };
            let rendition = self.produce_rendition(run, &source, &info, spec, stage).await?;
            metrics::record_rendition(&rendition.label);

            let upserted = self.db.upsert_rendition(&rendition).await;
            run.best_effort(NonFatalKind::Persistence, "store rendition", upserted);
            run.renditions.push(rendition);
        }

        self.publish(
            run,
            ProgressEvent::processing(&job_id, stage_percent(total, total), "Writing master manifest"),
        )
        .await;
        self.write_master_manifest(run, &info).await?;

        let updated = self.db.update_status(&job_id, AssetStatus::Completed, None).await;
        run.best_effort(NonFatalKind::Persistence, "mark completed", updated);
        self.publish(run, ProgressEvent::completed(&job_id)).await;

        info!(job_id = %job_id, renditions = run.renditions.len(), "Job completed");
        Ok(JobStatus::Completed)
    }

    /// Object-store keys are presigned; URLs are used as-is.
    async fn resolve_source(&self, location: &str) -> WorkerResult<String> {
        if is_url(location) {
            return Ok(location.to_string());
        }
        let url = self
            .store
            .presign_get(location, Duration::from_secs(keys::PRESIGN_TTL_SECS))
            .await?;
        Ok(url)
    }

    async fn produce_rendition(
        &self,
        run: &mut JobRun,
        source: &str,
        info: &SourceInfo,
        spec: &RenditionSpec,
        stage: Stage,
    ) -> WorkerResult<Rendition> {
        let job_id = run.job_id().clone();
        let start_percent = stage_percent(stage.index, stage.total);
        self.publish(
            run,
            ProgressEvent::stage(
                &job_id,
                stage.index as u32,
                stage.total as u32,
                &spec.label,
                start_percent,
            ),
        )
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        run.forwarder = Some(tokio::spawn(forward_ticks(
            Arc::clone(&self.progress),
            job_id.clone(),
            stage.clone(),
            info.duration,
            start_percent,
            rx,
        )));

        // The sender moves into the transcode, so the forwarder drains and
        // exits once the transcode returns.
        let result = self.transcoder.transcode(source, spec, tx).await;
        run.finish_forwarder(false).await;
        let output = result.map_err(|e| WorkerError::transcode_failed(&spec.label, &e))?;

        let (artifact_location, size_bytes) = self.upload_rendition(&job_id, spec, &output).await?;
        let presigned = self
            .store
            .presign_get(&artifact_location, Duration::from_secs(keys::PRESIGN_TTL_SECS))
            .await;
        let artifact_url = run.best_effort(NonFatalKind::Presign, "presign rendition", presigned);

        debug!(
            job_id = %job_id,
            rendition = %spec.label,
            segments = output.segment_count(),
            bytes = size_bytes,
            "Rendition stored"
        );

        Ok(Rendition {
            id: Uuid::new_v4().to_string(),
            video_id: job_id,
            label: spec.label.clone(),
            height: spec.height,
            artifact_location,
            artifact_url,
            segment_count: output.segment_count(),
            size_bytes,
            bandwidth_estimate: spec.bandwidth,
            processed_at: Utc::now(),
        })
    }

    /// Upload segments, then the playlist that references them. Returns the
    /// playlist key and total bytes.
    async fn upload_rendition(
        &self,
        job_id: &JobId,
        spec: &RenditionSpec,
        output: &RenditionOutput,
    ) -> WorkerResult<(String, u64)> {
        let mut size_bytes = 0u64;

        for artifact in output.segments.iter().chain(std::iter::once(&output.playlist)) {
            let key = keys::rendition_file(job_id.as_str(), &spec.label, &artifact.name);
            let stored = self
                .store
                .put(&key, PutBody::File(artifact.path.clone()), artifact.content_type)
                .await
                .map_err(|e| WorkerError::upload_failed(format!("{}: {}", key, e)))?;
            size_bytes += stored.size_bytes;
        }

        let playlist_key = keys::rendition_file(job_id.as_str(), &spec.label, &output.playlist.name);
        Ok((playlist_key, size_bytes))
    }

    async fn write_master_manifest(&self, run: &mut JobRun, info: &SourceInfo) -> WorkerResult<()> {
        let job_id = run.job_id().clone();
        let variants: Vec<ManifestVariant> = run
            .renditions
            .iter()
            .map(|r| ManifestVariant::for_rendition(r, info.width, info.height))
            .collect();
        let manifest = build_master_manifest(&variants);

        let key = keys::master_manifest(job_id.as_str());
        self.store
            .put(&key, PutBody::Bytes(manifest.into_bytes()), MANIFEST_CONTENT_TYPE)
            .await
            .map_err(|e| WorkerError::upload_failed(format!("{}: {}", key, e)))?;

        let presigned = self
            .store
            .presign_get(&key, Duration::from_secs(keys::PRESIGN_TTL_SECS))
            .await;
        let url = run.best_effort(NonFatalKind::Presign, "presign manifest", presigned);

        let stored = self
            .db
            .set_master_manifest(&job_id, &key, url.as_deref())
            .await;
        run.best_effort(NonFatalKind::Persistence, "store manifest location", stored);
        Ok(())
    }

    async fn mark_failed(&self, run: &mut JobRun, message: &str) {
        let job_id = run.job_id().clone();
        warn!(job_id = %job_id, "Job failed: {}", message);

        let updated = self
            .db
            .update_status(&job_id, AssetStatus::Failed, Some(message))
            .await;
        run.best_effort(NonFatalKind::Persistence, "mark failed", updated);

        let percent = run.last_percent;
        self.publish(run, ProgressEvent::failed(&job_id, percent, message))
            .await;
    }

    async fn publish(&self, run: &mut JobRun, event: ProgressEvent) {
        if !event.is_terminal() {
            run.last_percent = run.last_percent.max(event.percent);
        }
        let result = self.progress.publish(&event).await;
        run.best_effort(NonFatalKind::Progress, "publish progress", result);
    }
}

/// Turn raw transcoder ticks into progress events for one stage.
async fn forward_ticks(
    progress: Arc<dyn ProgressBus>,
    job_id: JobId,
    stage: Stage,
    duration_secs: f64,
    start_percent: u8,
    mut ticks: mpsc::UnboundedReceiver<TranscodeTick>,
) -> ForwardSummary {
    let mut summary = ForwardSummary {
        last_percent: start_percent,
        publish_errors: Vec::new(),
    };

    while let Some(tick) = ticks.recv().await {
        let percent = tick_percent(stage.index, stage.total, tick.fraction_of(duration_secs))
            .max(summary.last_percent);
        let event = ProgressEvent::tick(
            &job_id,
            stage.index as u32,
            stage.total as u32,
            stage.label.clone(),
            percent,
            tick.frame,
            tick.out_time_ms,
        );
        match progress.publish(&event).await {
            Ok(()) => summary.last_percent = percent,
            Err(e) => summary.publish_errors.push(e.to_string()),
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_ack_policy() {
        let outcome = |status| JobOutcome {
            job_id: JobId::from("v1"),
            status,
            renditions: Vec::new(),
            non_fatal: Vec::new(),
        };
        assert!(outcome(JobStatus::Completed).should_ack());
        assert!(outcome(JobStatus::AlreadyCompleted).should_ack());
        assert!(!outcome(JobStatus::Failed("boom".to_string())).should_ack());
        assert!(!outcome(JobStatus::Interrupted).should_ack());
        assert!(!outcome(JobStatus::AlreadyCompleted).is_completed());
    }

    #[test]
    fn test_non_fatal_display() {
        let err = NonFatalError {
            kind: NonFatalKind::Persistence,
            operation: "store rendition".to_string(),
            message: "database is locked".to_string(),
        };
        assert_eq!(err.to_string(), "store rendition (persistence): database is locked");
    }
}
