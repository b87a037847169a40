//! Job queue using Redis Streams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, info};

use vproc_models::VideoJob;

use crate::error::{QueueError, QueueResult};
use crate::queue::{DurableQueue, PendingEntry, QueueConfig, QueueEntry};

/// Upper bound on entries returned by one pending scan.
const PENDING_SCAN_LIMIT: usize = 1000;

/// Refreshes idle time only for entries still owned by the caller, so a
/// heartbeat racing a claim never takes the entry back.
///
/// KEYS[1] stream, ARGV[1] group, ARGV[2] consumer, ARGV[3..] entry ids.
const HEARTBEAT_SCRIPT: &str = r#"
local refreshed = 0
for i = 3, #ARGV do
  local pending = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[i], ARGV[i], 1)
  if pending[1] and pending[1][2] == ARGV[2] then
    redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[2], 0, ARGV[i], 'JUSTID')
    refreshed = refreshed + 1
  end
end
return refreshed
"#;

/// Redis Streams backed [`DurableQueue`].
pub struct RedisStreamQueue {
    client: redis::Client,
    stream_name: String,
}

impl RedisStreamQueue {
    /// Create a new queue client.
    pub fn new(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            stream_name: config.stream_name.clone(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(&QueueConfig::from_env())
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// PING the server.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

fn to_entry(stream_id: StreamId) -> QueueEntry {
    let fields: HashMap<String, String> = stream_id
        .map
        .iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|s| (k.clone(), s))
        })
        .collect();
    QueueEntry::new(stream_id.id, fields)
}

#[async_trait]
impl DurableQueue for RedisStreamQueue {
    async fn ensure_group(&self, group: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        // "0" so entries appended before the group existed are still delivered
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    async fn append(&self, job: &VideoJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let fields = QueueEntry::fields_for(job)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream_name).arg("*");
        for (field, value) in &fields {
            cmd.arg(*field).arg(value);
        }

        let entry_id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with entry ID {}", job.job_id, entry_id);
        Ok(entry_id)
    }

    async fn read_as_group(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>> {
        let mut conn = self.connection().await?;

        // BLOCK 0 means forever
        let block_ms = (max_wait.as_millis() as u64).max(1);

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count.max(1))
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                if e.to_string().contains("NOGROUP") {
                    QueueError::UnknownGroup(group.to_string())
                } else {
                    QueueError::Redis(e)
                }
            })?;

        let entries: Vec<QueueEntry> = reply
            .unwrap_or_default()
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(to_entry)
            .collect();

        if !entries.is_empty() {
            debug!("Read {} entries as {}/{}", entries.len(), group, consumer);
        }
        Ok(entries)
    }

    async fn list_pending(&self, group: &str) -> QueueResult<Vec<PendingEntry>> {
        let mut conn = self.connection().await?;

        let reply: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.stream_name)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(PENDING_SCAN_LIMIT)
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                entry_id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        entry_ids: &[String],
        min_idle: Duration,
    ) -> QueueResult<Vec<QueueEntry>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;

        // XCLAIM checks idle time and reassigns in one step
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream_name)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for id in entry_ids {
            cmd.arg(id);
        }
        let reply: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let entries: Vec<QueueEntry> = reply.ids.into_iter().map(to_entry).collect();
        for entry in &entries {
            info!("Claimed pending entry {} for {}", entry.entry_id, consumer);
        }
        Ok(entries)
    }

    async fn heartbeat(&self, group: &str, consumer: &str, entry_ids: &[String]) -> QueueResult<usize> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection().await?;

        // JUSTID leaves the delivery counter alone
        let script = redis::Script::new(HEARTBEAT_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(&self.stream_name).arg(group).arg(consumer);
        for id in entry_ids {
            invocation.arg(id);
        }
        let refreshed: usize = invocation.invoke_async(&mut conn).await.map_err(|e| {
            if e.to_string().contains("NOGROUP") {
                QueueError::UnknownGroup(group.to_string())
            } else {
                QueueError::Redis(e)
            }
        })?;

        debug!("Heartbeat refreshed {}/{} entries for {}", refreshed, entry_ids.len(), consumer);
        Ok(refreshed)
    }

    async fn ack(&self, group: &str, entry_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.stream_name)
            .arg(group)
            .arg(entry_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged entry: {}", entry_id);
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.stream_name).await?;
        Ok(len)
    }
}
