//! FFprobe source inspection.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// What the pipeline needs to know about a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Duration in seconds
    pub duration: f64,
    /// Bitrate in bits/second (0 when unknown)
    pub bitrate: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
}

/// Whether a locator is a URL rather than a local path.
pub fn is_url(source: &str) -> bool {
    source.contains("://")
}

/// Probe a local path or URL.
pub async fn probe_source(source: &str) -> MediaResult<SourceInfo> {
    if !is_url(source) && !Path::new(source).exists() {
        return Err(MediaError::FileNotFound(source.into()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::probe_failed(
            "FFprobe failed",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }

    parse_probe_output(&output.stdout)
}

/// Parse ffprobe's JSON into a [`SourceInfo`].
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<SourceInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref().unwrap_or("video") == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::probe_failed(
            "failed to parse video dimensions",
            None,
        ));
    }

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let bitrate = video_stream
        .bit_rate
        .as_deref()
        .or_else(|| probe.format.as_ref().and_then(|f| f.bit_rate.as_deref()))
        .and_then(|b| b.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(SourceInfo {
        width,
        height,
        duration,
        bitrate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "bit_rate": "4500000"}
            ],
            "format": {"duration": "62.500000", "bit_rate": "4700000"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.duration - 62.5).abs() < 1e-9);
        assert_eq!(info.bitrate, 4_500_000);
    }

    #[test]
    fn test_bitrate_falls_back_to_format() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360}],
            "format": {"duration": "N/A", "bit_rate": "900000"}
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.bitrate, 900_000);
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn test_missing_dimensions_is_probe_error() {
        let json = br#"{"streams": [{"codec_type": "video"}], "format": {}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::ProbeFailed { .. })
        ));
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [], "format": {"duration": "1.0"}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/a.mp4"));
        assert!(is_url("s3://bucket/a.mp4"));
        assert!(!is_url("uploads/a.mp4"));
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let err = probe_source("/definitely/not/here.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
