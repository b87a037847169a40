//! Real ffmpeg/ffprobe runs. Need both binaries on PATH.

use std::path::Path;

use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use vproc_media::{
    FfmpegTranscoder, MediaError, RenditionSpec, TranscodeConfig, Transcoder, PLAYLIST_NAME,
};

/// Four seconds of test pattern with a tone, 640x360.
async fn synthesize_source(dir: &Path) -> String {
    let path = dir.join("source.mp4");
    let status = Command::new("ffmpeg")
        .args([
            "-y", "-v", "error",
            "-f", "lavfi", "-i", "testsrc=size=640x360:rate=25:duration=4",
            "-f", "lavfi", "-i", "sine=frequency=440:duration=4",
            "-c:v", "libx264", "-preset", "ultrafast", "-c:a", "aac", "-shortest",
        ])
        .arg(&path)
        .status()
        .await
        .expect("ffmpeg not runnable");
    assert!(status.success());
    path.to_string_lossy().to_string()
}

fn transcoder(segment_secs: u32) -> FfmpegTranscoder {
    FfmpegTranscoder::new(TranscodeConfig {
        segment_secs,
        ..TranscodeConfig::default()
    })
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_probe_and_transcode_rendition() {
    let dir = tempfile::tempdir().unwrap();
    let source = synthesize_source(dir.path()).await;
    let transcoder = transcoder(2);

    let info = transcoder.probe(&source).await.unwrap();
    assert_eq!((info.width, info.height), (640, 360));
    assert!((info.duration - 4.0).abs() < 0.5);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let output = transcoder
        .transcode(&source, &RenditionSpec::new("144p", 144, 300_000), tx)
        .await
        .unwrap();

    assert_eq!(output.playlist.name, PLAYLIST_NAME);
    assert!(output.segment_count() >= 2);
    let playlist = std::fs::read_to_string(&output.playlist.path).unwrap();
    assert!(playlist.contains("#EXT-X-ENDLIST"));
    assert!(playlist.contains("segment_000.ts"));

    let mut ticks = Vec::new();
    while let Ok(tick) = rx.try_recv() {
        ticks.push(tick);
    }
    assert!(ticks.last().is_some_and(|t| t.is_complete));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_probe_rejects_non_video() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "not a video").unwrap();

    let err = transcoder(10)
        .probe(&path.to_string_lossy())
        .await
        .unwrap_err();
    assert!(!matches!(err, MediaError::FfprobeNotFound));
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_cancel_kills_encode() {
    let dir = tempfile::tempdir().unwrap();
    let source = synthesize_source(dir.path()).await;

    let (cancel_tx, cancel_rx) = watch::channel(true);
    let transcoder = transcoder(2).with_cancel(cancel_rx);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = transcoder
        .transcode(&source, &RenditionSpec::new("360p", 360, 800_000), tx)
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::Cancelled));
    drop(cancel_tx);
}
