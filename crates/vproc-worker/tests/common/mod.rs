//! Shared fixtures: in-memory queue and bus, SQLite in memory, a local
//! object store and a scripted transcoder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::mpsc;

use vproc_db::{DbError, DbResult, MetadataStore, SqlxMetadataStore};
use vproc_media::{
    MediaError, MediaResult, RenditionOutput, RenditionSpec, SourceInfo, TranscodeTick,
    Transcoder, PLAYLIST_NAME,
};
use vproc_models::{AssetStatus, JobId, ProgressEvent, Rendition, VideoAsset, VideoJob};
use vproc_queue::{MemoryProgressBus, MemoryQueue, ProgressBus, ProgressStream};
use vproc_storage::LocalObjectStore;
use vproc_worker::VideoPipeline;

/// Transcoder that writes a tiny HLS rendition instead of running ffmpeg.
pub struct FakeTranscoder {
    info: SourceInfo,
    probe_error: Option<String>,
    fail_on: Mutex<Option<String>>,
    cancel_on: Mutex<Option<String>>,
    delay: Duration,
    transcoded: Mutex<Vec<String>>,
    probes: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            info: SourceInfo {
                width,
                height,
                duration: 30.0,
                bitrate: 4_000_000,
            },
            probe_error: None,
            fail_on: Mutex::new(None),
            cancel_on: Mutex::new(None),
            delay: Duration::ZERO,
            transcoded: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn failing_probe(mut self, message: &str) -> Self {
        self.probe_error = Some(message.to_string());
        self
    }

    pub fn failing_on(self, label: &str) -> Self {
        self.set_failing_on(Some(label));
        self
    }

    pub fn set_failing_on(&self, label: Option<&str>) {
        *self.fail_on.lock().unwrap() = label.map(str::to_string);
    }

    /// Behave as if shutdown killed ffmpeg while encoding `label`.
    pub fn cancelled_on(self, label: &str) -> Self {
        self.set_cancelled_on(Some(label));
        self
    }

    pub fn set_cancelled_on(&self, label: Option<&str>) {
        *self.cancel_on.lock().unwrap() = label.map(str::to_string);
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Labels transcoded successfully, in order.
    pub fn transcoded(&self) -> Vec<String> {
        self.transcoded.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, _source: &str) -> MediaResult<SourceInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.probe_error {
            Some(message) => Err(MediaError::probe_failed(
                message.clone(),
                Some("moov atom not found".to_string()),
            )),
            None => Ok(self.info),
        }
    }

    async fn transcode(
        &self,
        _source: &str,
        spec: &RenditionSpec,
        ticks: mpsc::UnboundedSender<TranscodeTick>,
    ) -> MediaResult<RenditionOutput> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let total_ms = (self.info.duration * 1000.0) as i64;
        for (i, out_time_ms) in [total_ms / 4, total_ms / 2, total_ms * 3 / 4].into_iter().enumerate() {
            let _ = ticks.send(TranscodeTick {
                frame: (i as u64 + 1) * 180,
                fps: 60.0,
                out_time_ms,
                speed: 2.0,
                is_complete: false,
            });
        }

        if self.cancel_on.lock().unwrap().as_deref() == Some(spec.label.as_str()) {
            return Err(MediaError::Cancelled);
        }

        if self.fail_on.lock().unwrap().as_deref() == Some(spec.label.as_str()) {
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some("Conversion failed!".to_string()),
                Some(1),
            ));
        }

        let _ = ticks.send(TranscodeTick {
            frame: 900,
            fps: 60.0,
            out_time_ms: total_ms,
            speed: 2.0,
            is_complete: true,
        });

        let dir = tempfile::Builder::new()
            .prefix(&format!("fake_{}_", spec.label))
            .tempdir()?;
        std::fs::write(dir.path().join("segment_000.ts"), vec![0u8; 100])?;
        std::fs::write(dir.path().join("segment_001.ts"), vec![0u8; 50])?;
        std::fs::write(
            dir.path().join(PLAYLIST_NAME),
            "#EXTM3U\n#EXT-X-ENDLIST\n",
        )?;

        self.transcoded.lock().unwrap().push(spec.label.clone());
        RenditionOutput::collect(dir, PLAYLIST_NAME).await
    }
}

/// Metadata store whose source-info writes always fail.
pub struct FlakyMetadataStore {
    pub inner: SqlxMetadataStore,
}

#[async_trait]
impl MetadataStore for FlakyMetadataStore {
    async fn create_asset(&self, asset: &VideoAsset) -> DbResult<bool> {
        self.inner.create_asset(asset).await
    }

    async fn get_asset(&self, id: &JobId) -> DbResult<Option<VideoAsset>> {
        self.inner.get_asset(id).await
    }

    async fn list_assets(&self, limit: u32, offset: u32) -> DbResult<Vec<VideoAsset>> {
        self.inner.list_assets(limit, offset).await
    }

    async fn update_status(&self, id: &JobId, status: AssetStatus, error: Option<&str>) -> DbResult<()> {
        self.inner.update_status(id, status, error).await
    }

    async fn update_source_info(&self, _id: &JobId, _w: u32, _h: u32, _d: f64) -> DbResult<()> {
        Err(DbError::invalid_data("database is locked"))
    }

    async fn set_master_manifest(&self, id: &JobId, location: &str, url: Option<&str>) -> DbResult<()> {
        self.inner.set_master_manifest(id, location, url).await
    }

    async fn upsert_rendition(&self, rendition: &Rendition) -> DbResult<()> {
        self.inner.upsert_rendition(rendition).await
    }

    async fn list_renditions(&self, video_id: &JobId) -> DbResult<Vec<Rendition>> {
        self.inner.list_renditions(video_id).await
    }

    async fn delete_asset(&self, id: &JobId) -> DbResult<bool> {
        self.inner.delete_asset(id).await
    }
}

/// Everything a pipeline or worker loop needs, backed by local fakes.
pub struct Harness {
    pub transcoder: Arc<FakeTranscoder>,
    pub db: Arc<SqlxMetadataStore>,
    pub store: Arc<LocalObjectStore>,
    pub bus: Arc<MemoryProgressBus>,
    pub queue: Arc<MemoryQueue>,
    pub root: TempDir,
}

impl Harness {
    pub async fn new(transcoder: FakeTranscoder) -> Self {
        let root = tempfile::tempdir().unwrap();
        Self {
            transcoder: Arc::new(transcoder),
            db: Arc::new(SqlxMetadataStore::in_memory().await.unwrap()),
            store: Arc::new(LocalObjectStore::new(root.path())),
            bus: Arc::new(MemoryProgressBus::default()),
            queue: Arc::new(MemoryQueue::new()),
            root,
        }
    }

    pub fn pipeline(&self) -> VideoPipeline {
        VideoPipeline::new(
            self.transcoder.clone(),
            self.store.clone(),
            self.db.clone(),
            self.bus.clone(),
        )
    }

    /// What the producer does at submission time.
    pub async fn submit(&self, job_id: &str) -> VideoJob {
        let job = VideoJob::new("uploads/src.mp4", "src.mp4").with_job_id(job_id);
        self.db.create_asset(&VideoAsset::waiting(&job)).await.unwrap();
        self.bus.publish(&ProgressEvent::waiting(&job.job_id)).await.unwrap();
        job
    }

    pub async fn asset(&self, job_id: &str) -> VideoAsset {
        self.db
            .get_asset(&JobId::from(job_id))
            .await
            .unwrap()
            .expect("asset exists")
    }

    pub async fn renditions(&self, job_id: &str) -> Vec<Rendition> {
        self.db.list_renditions(&JobId::from(job_id)).await.unwrap()
    }

    pub async fn subscribe(&self, job_id: &str) -> ProgressStream {
        self.bus.subscribe(&JobId::from(job_id)).await.unwrap()
    }
}

/// Drain a subscription up to and including the first terminal event.
pub async fn collect_until_terminal(stream: &mut ProgressStream) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), stream.next()).await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
