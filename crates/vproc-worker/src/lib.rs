//! Video transcoding worker.
//!
//! This crate provides:
//! - The worker loop: consumer-group reads, crash recovery, ack policy
//! - The per-job processing pipeline and its progress reporting
//! - Rendition ladder selection and HLS master manifests
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod ladder;
pub mod logging;
pub mod manifest;
pub mod metrics;
pub mod pipeline;
pub mod retry;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{EntryDisposition, ShutdownHandle, WorkerLoop, WorkerState};
pub use ladder::{estimate_bandwidth, select_ladder, stage_percent};
pub use logging::JobLogger;
pub use manifest::{build_master_manifest, ManifestVariant};
pub use pipeline::{JobOutcome, JobStatus, NonFatalError, NonFatalKind, VideoPipeline};
pub use retry::{Backoff, RetryPolicy};
