//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Dequeue failed: {0}")]
    DequeueFailed(String),

    #[error("Unknown consumer group: {0}")]
    UnknownGroup(String),

    #[error("Malformed entry {entry_id}: {reason}")]
    Malformed { entry_id: String, reason: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn enqueue_failed(msg: impl Into<String>) -> Self {
        Self::EnqueueFailed(msg.into())
    }

    pub fn malformed(entry_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            entry_id: entry_id.into(),
            reason: reason.into(),
        }
    }

    /// A malformed entry will never decode, no matter how often it is retried.
    pub fn is_malformed(&self) -> bool {
        matches!(self, QueueError::Malformed { .. })
    }

    /// Infrastructure errors worth backing off and retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) | QueueError::DequeueFailed(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
            }
            _ => false,
        }
    }
}
