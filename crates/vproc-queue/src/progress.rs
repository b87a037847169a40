//! Progress events via Redis Pub/Sub, with a TTL'd snapshot of the latest
//! event per job.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::AsyncCommands;
use tracing::{debug, warn};

use vproc_models::{JobId, ProgressEvent};

use crate::error::QueueResult;
use crate::queue::QueueConfig;

pub const PROGRESS_CHANNEL_PREFIX: &str = "video:progress:";
pub const PROGRESS_ALL_CHANNEL: &str = "video:progress:all";
pub const SNAPSHOT_KEY_PREFIX: &str = "progress:";
pub const DEFAULT_SNAPSHOT_TTL_SECS: u64 = 86_400;

/// Live progress events. Ends when the underlying subscription closes.
pub type ProgressStream = BoxStream<'static, ProgressEvent>;

/// Fan-out of progress events with a latest-value snapshot.
///
/// Delivery is best-effort: events published while nobody is subscribed
/// are lost, only the snapshot survives.
#[async_trait]
pub trait ProgressBus: Send + Sync {
    /// Deliver to per-job and global subscribers and replace the snapshot.
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()>;

    /// Latest event for a job, if one was published within the TTL.
    async fn get_snapshot(&self, job_id: &JobId) -> QueueResult<Option<ProgressEvent>>;

    /// Events for one job from now on.
    async fn subscribe(&self, job_id: &JobId) -> QueueResult<ProgressStream>;

    /// Events for every job from now on.
    async fn subscribe_all(&self) -> QueueResult<ProgressStream>;
}

/// Get the channel name for a job.
pub fn channel_name(job_id: &JobId) -> String {
    format!("{}{}", PROGRESS_CHANNEL_PREFIX, job_id)
}

/// Get the snapshot key for a job.
pub fn snapshot_key(job_id: &JobId) -> String {
    format!("{}{}", SNAPSHOT_KEY_PREFIX, job_id)
}

/// Redis-backed [`ProgressBus`].
pub struct RedisProgressBus {
    client: redis::Client,
    snapshot_ttl: Duration,
}

impl RedisProgressBus {
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            snapshot_ttl: config.snapshot_ttl,
        })
    }

    async fn subscribe_channel(&self, channel: String) -> QueueResult<ProgressStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        debug!("Subscribed to {}", channel);

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str::<ProgressEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping undecodable progress event: {}", e);
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[async_trait]
impl ProgressBus for RedisProgressBus {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;

        debug!(
            "Publishing progress for {} ({}%)",
            event.job_id, event.percent
        );

        redis::pipe()
            .publish(channel_name(&event.job_id), &payload)
            .ignore()
            .publish(PROGRESS_ALL_CHANNEL, &payload)
            .ignore()
            .set_ex(snapshot_key(&event.job_id), &payload, self.snapshot_ttl.as_secs().max(1))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_snapshot(&self, job_id: &JobId) -> QueueResult<Option<ProgressEvent>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(snapshot_key(job_id)).await?;

        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn subscribe(&self, job_id: &JobId) -> QueueResult<ProgressStream> {
        self.subscribe_channel(channel_name(job_id)).await
    }

    async fn subscribe_all(&self) -> QueueResult<ProgressStream> {
        self.subscribe_channel(PROGRESS_ALL_CHANNEL.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_and_key_names() {
        let id = JobId::from("v1");
        assert_eq!(channel_name(&id), "video:progress:v1");
        assert_eq!(snapshot_key(&id), "progress:v1");
    }
}
