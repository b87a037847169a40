//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// One progress report from a running transcode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeTick {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl TranscodeTick {
    /// Fraction of the source already encoded, in `[0, 1]`.
    pub fn fraction_of(&self, duration_secs: f64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        if duration_secs <= 0.0 || self.out_time_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / (duration_secs * 1000.0)).clamp(0.0, 1.0)
    }
}

/// Fold one line of `-progress` output into `current`.
///
/// Returns a snapshot at each `progress=` line, which terminates a block.
pub fn parse_progress_line(line: &str, current: &mut TranscodeTick) -> Option<TranscodeTick> {
    let (key, value) = line.trim().split_once('=')?;

    match key {
        // ffmpeg reports both in microseconds despite the name
        "out_time_us" | "out_time_ms" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            // "1.5x" or "N/A"
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return Some(current.clone());
        }
        _ => {}
    }

    None
}
