//! Rendition transcoding seam and its ffmpeg implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_source, SourceInfo};
use crate::progress::TranscodeTick;

pub const PLAYLIST_NAME: &str = "playlist.m3u8";
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// AAC bitrate for a rendition height.
pub fn audio_bitrate_kbps(height: u32) -> u32 {
    match height {
        h if h >= 1080 => 192,
        h if h >= 720 => 160,
        h if h >= 480 => 128,
        _ => 96,
    }
}

/// Target of one transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionSpec {
    /// Display label, e.g. "720p"
    pub label: String,
    pub height: u32,
    pub audio_bitrate_kbps: u32,
    /// Estimated peak bandwidth in bits/second
    pub bandwidth: u64,
}

impl RenditionSpec {
    pub fn new(label: impl Into<String>, height: u32, bandwidth: u64) -> Self {
        Self {
            label: label.into(),
            height,
            audio_bitrate_kbps: audio_bitrate_kbps(height),
            bandwidth,
        }
    }
}

/// One file produced by a transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name relative to the rendition directory
    pub name: String,
    pub path: PathBuf,
    pub content_type: &'static str,
    pub size: u64,
}

/// Files of one HLS rendition, living in a scratch directory that is
/// removed when the output is dropped.
#[derive(Debug)]
pub struct RenditionOutput {
    dir: TempDir,
    pub playlist: Artifact,
    pub segments: Vec<Artifact>,
}

impl RenditionOutput {
    /// Collect the playlist and `.ts` segments written into `dir`.
    pub async fn collect(dir: TempDir, playlist_name: &str) -> MediaResult<Self> {
        let playlist_path = dir.path().join(playlist_name);
        let playlist_meta = tokio::fs::metadata(&playlist_path)
            .await
            .map_err(|_| MediaError::FileNotFound(playlist_path.clone()))?;

        let mut segments = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".ts") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            segments.push(Artifact {
                name,
                path: entry.path(),
                content_type: SEGMENT_CONTENT_TYPE,
                size: meta.len(),
            });
        }
        segments.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            playlist: Artifact {
                name: playlist_name.to_string(),
                path: playlist_path,
                content_type: PLAYLIST_CONTENT_TYPE,
                size: playlist_meta.len(),
            },
            segments,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn segment_count(&self) -> u32 {
        self.segments.len() as u32
    }

    /// Bytes across segments and playlist.
    pub fn total_size(&self) -> u64 {
        self.segments.iter().map(|a| a.size).sum::<u64>() + self.playlist.size
    }
}

/// Produces renditions from a source.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Inspect the source.
    async fn probe(&self, source: &str) -> MediaResult<SourceInfo>;

    /// Produce one rendition, sending raw progress on `ticks` while it runs.
    ///
    /// A closed `ticks` receiver must not fail the transcode.
    async fn transcode(
        &self,
        source: &str,
        spec: &RenditionSpec,
        ticks: mpsc::UnboundedSender<TranscodeTick>,
    ) -> MediaResult<RenditionOutput>;
}

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    pub preset: String,
    pub crf: u8,
    pub segment_secs: u32,
    /// Parent of the scratch directories (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
    /// Per-rendition ffmpeg ceiling
    pub timeout_secs: Option<u64>,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            preset: "ultrafast".to_string(),
            crf: 23,
            segment_secs: 10,
            work_dir: None,
            timeout_secs: None,
        }
    }
}

impl TranscodeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            preset: std::env::var("FFMPEG_PRESET").unwrap_or(defaults.preset),
            crf: std::env::var("FFMPEG_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.crf),
            segment_secs: std::env::var("HLS_SEGMENT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.segment_secs),
            work_dir: std::env::var("WORKER_WORK_DIR").ok().map(PathBuf::from),
            timeout_secs: std::env::var("FFMPEG_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }
}

/// [`Transcoder`] that shells out to ffprobe/ffmpeg.
pub struct FfmpegTranscoder {
    config: TranscodeConfig,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self {
            config,
            cancel_rx: None,
        }
    }

    /// Kill running encodes when the signal flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    fn scratch_dir(&self, label: &str) -> MediaResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("hls_{}_", label);
        builder.prefix(&prefix);
        let dir = match &self.config.work_dir {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// Command for one rendition into `dir`.
    pub fn command(&self, source: &str, spec: &RenditionSpec, dir: &Path) -> FfmpegCommand {
        FfmpegCommand::new(source, dir.join(PLAYLIST_NAME))
            .discard_corrupt()
            .scale_to_height(spec.height)
            .video_codec("libx264")
            .preset(self.config.preset.clone())
            .crf(self.config.crf)
            .audio_codec("aac")
            .audio_bitrate_kbps(spec.audio_bitrate_kbps)
            .hls_vod(self.config.segment_secs, dir.join(SEGMENT_PATTERN))
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        if let Some(secs) = self.config.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        runner
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, source: &str) -> MediaResult<SourceInfo> {
        probe_source(source).await
    }

    async fn transcode(
        &self,
        source: &str,
        spec: &RenditionSpec,
        ticks: mpsc::UnboundedSender<TranscodeTick>,
    ) -> MediaResult<RenditionOutput> {
        let dir = self.scratch_dir(&spec.label)?;
        let cmd = self.command(source, spec, dir.path());

        info!(rendition = %spec.label, "Transcoding to HLS");
        self.runner()
            .run_with_progress(&cmd, move |tick| {
                let _ = ticks.send(tick);
            })
            .await?;

        let output = RenditionOutput::collect(dir, PLAYLIST_NAME).await?;
        debug!(
            rendition = %spec.label,
            segments = output.segment_count(),
            bytes = output.total_size(),
            "Transcode finished"
        );
        Ok(output)
    }
}
