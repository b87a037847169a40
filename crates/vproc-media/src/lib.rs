//! FFmpeg CLI wrapper for HLS rendition transcoding.
//!
//! This crate provides:
//! - FFmpeg command building and execution with progress parsing
//! - FFprobe source inspection
//! - The [`Transcoder`] seam used by the worker, with an ffmpeg implementation

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod transcoder;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_source, SourceInfo};
pub use progress::TranscodeTick;
pub use transcoder::{
    audio_bitrate_kbps, Artifact, FfmpegTranscoder, RenditionOutput, RenditionSpec,
    TranscodeConfig, Transcoder, PLAYLIST_CONTENT_TYPE, PLAYLIST_NAME, SEGMENT_CONTENT_TYPE,
};
