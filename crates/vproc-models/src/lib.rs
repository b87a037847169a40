//! Shared data models for the video processing pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Queue jobs and their wire envelope
//! - Persistent video assets and renditions
//! - Asset status with explicit transition rules
//! - Progress events fanned out to observers

pub mod job;
pub mod progress;
pub mod rendition;
pub mod video;

// Re-export common types
pub use job::{JobId, QueueEnvelope, VideoJob};
pub use progress::ProgressEvent;
pub use rendition::Rendition;
pub use video::{AssetStatus, InvalidTransition, ParseStatusError, VideoAsset};
