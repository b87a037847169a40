//! Video asset models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::job::{JobId, VideoJob};

/// Processing status of a video asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Submitted, not yet picked up by a worker
    #[default]
    Waiting,
    /// A worker owns the job
    Processing,
    /// All renditions and the master manifest are stored
    Completed,
    /// Processing stopped with an error
    Failed,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AssetStatus,
    pub to: AssetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown asset status: {0}")]
pub struct ParseStatusError(pub String);

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Waiting => "waiting",
            AssetStatus::Processing => "processing",
            AssetStatus::Completed => "completed",
            AssetStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetStatus::Completed | AssetStatus::Failed)
    }

    /// Whether a worker may move an asset from `self` to `next`.
    ///
    /// `Processing -> Processing` covers a reclaimed job whose previous owner
    /// crashed; `Failed -> Processing` covers redelivery of an unacked entry.
    /// Nothing leaves `Completed`.
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        use AssetStatus::*;
        matches!(
            (self, next),
            (Waiting, Processing)
                | (Processing, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }

    /// Validate a transition.
    pub fn transition(self, next: AssetStatus) -> Result<AssetStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssetStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(AssetStatus::Waiting),
            "processing" => Ok(AssetStatus::Processing),
            "completed" => Ok(AssetStatus::Completed),
            "failed" => Ok(AssetStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Persistent record of one submitted video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoAsset {
    /// Asset id (equal to the job id)
    pub id: JobId,

    /// Name of the uploaded file
    pub original_name: String,

    /// Source locator the worker reads from
    pub source_location: String,

    /// Processing status
    #[serde(default)]
    pub status: AssetStatus,

    /// Probed source width in pixels
    #[serde(default)]
    pub source_width: u32,

    /// Probed source height in pixels
    #[serde(default)]
    pub source_height: u32,

    /// Probed duration in seconds
    #[serde(default)]
    pub duration_seconds: f64,

    /// Error message (set only when failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Completion timestamp (set only when completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Object-store key of the master manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_manifest_location: Option<String>,

    /// Presigned URL of the master manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_manifest_url: Option<String>,
}

impl VideoAsset {
    /// Create a waiting asset for a submitted job.
    pub fn waiting(job: &VideoJob) -> Self {
        let now = Utc::now();
        Self {
            id: job.job_id.clone(),
            original_name: job.original_name.clone(),
            source_location: job.source_location.clone(),
            status: AssetStatus::Waiting,
            source_width: 0,
            source_height: 0,
            duration_seconds: 0.0,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            master_manifest_location: None,
            master_manifest_url: None,
        }
    }

    /// Check if the asset is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
