//! Rendition records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// One transcoded output of a video at a target height.
///
/// Renditions are unique per `(video_id, label)`; re-running a job
/// overwrites the existing row for the same label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rendition {
    /// Row id
    pub id: String,
    /// Owning asset
    pub video_id: JobId,
    /// Display label, e.g. "720p"
    pub label: String,
    /// Target height in pixels
    pub height: u32,
    /// Object-store key of the rendition playlist
    pub artifact_location: String,
    /// Presigned URL of the playlist, when one could be generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    /// Number of media segments uploaded
    #[serde(default)]
    pub segment_count: u32,
    /// Total uploaded bytes (segments + playlist)
    pub size_bytes: u64,
    /// Estimated peak bandwidth in bits/second
    pub bandwidth_estimate: u64,
    /// When the rendition finished uploading
    pub processed_at: DateTime<Utc>,
}

impl Rendition {
    /// Label used for a rendition of the given height.
    pub fn label_for(height: u32) -> String {
        format!("{}p", height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_for_height() {
        assert_eq!(Rendition::label_for(1080), "1080p");
        assert_eq!(Rendition::label_for(100), "100p");
    }
}
