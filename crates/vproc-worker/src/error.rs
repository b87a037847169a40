//! Worker error types.

use std::time::Duration;

use thiserror::Error;

use vproc_models::InvalidTransition;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Transcode of {rendition} failed: {message}")]
    TranscodeFailed { rendition: String, message: String },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job interrupted by shutdown")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] vproc_storage::StorageError),

    #[error("Database error: {0}")]
    Db(#[from] vproc_db::DbError),

    #[error("Media error: {0}")]
    Media(#[from] vproc_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn probe_failed(err: &vproc_media::MediaError) -> Self {
        match err {
            vproc_media::MediaError::Cancelled => Self::Cancelled,
            _ => Self::ProbeFailed(err.detail()),
        }
    }

    pub fn transcode_failed(rendition: impl Into<String>, err: &vproc_media::MediaError) -> Self {
        match err {
            vproc_media::MediaError::Cancelled => Self::Cancelled,
            _ => Self::TranscodeFailed {
                rendition: rendition.into(),
                message: err.detail(),
            },
        }
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Infrastructure errors the worker loop should back off on.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Queue(e) => e.is_transient(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }
}
