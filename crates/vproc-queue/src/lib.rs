//! Durable job queue and progress bus.
//!
//! This crate provides:
//! - Consumer-group job delivery over Redis Streams (or in memory)
//! - Pending-entry listing and claiming for crash recovery
//! - Progress fan-out per job and globally, with a TTL'd latest snapshot

pub mod error;
pub mod memory;
pub mod memory_bus;
pub mod progress;
pub mod queue;
pub mod redis_stream;

pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use memory_bus::MemoryProgressBus;
pub use progress::{
    ProgressBus, ProgressStream, RedisProgressBus, DEFAULT_SNAPSHOT_TTL_SECS,
    PROGRESS_ALL_CHANNEL, PROGRESS_CHANNEL_PREFIX, SNAPSHOT_KEY_PREFIX,
};
pub use queue::{
    DurableQueue, PendingEntry, QueueConfig, QueueEntry, DEFAULT_CONSUMER_GROUP,
    DEFAULT_STREAM_NAME,
};
pub use redis_stream::RedisStreamQueue;
