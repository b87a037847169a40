//! In-process [`DurableQueue`] with the same consumer-group semantics as
//! the Redis Streams backend. Useful for tests and single-process setups.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use vproc_models::VideoJob;

use crate::error::{QueueError, QueueResult};
use crate::queue::{DurableQueue, PendingEntry, QueueEntry};

#[derive(Debug)]
struct PendingRecord {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next never-delivered log entry
    cursor: usize,
    /// Pending entries keyed by log index
    pending: BTreeMap<usize, PendingRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    log: Vec<QueueEntry>,
    index: HashMap<String, usize>,
    groups: HashMap<String, GroupState>,
}

/// Memory-backed queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    appended: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_new(&self, group: &str, consumer: &str, count: usize) -> QueueResult<Vec<QueueEntry>> {
        let mut inner = self.lock();
        let Inner { log, groups, .. } = &mut *inner;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| QueueError::UnknownGroup(group.to_string()))?;

        let end = (state.cursor + count.max(1)).min(log.len());
        let now = Instant::now();
        let mut delivered = Vec::with_capacity(end - state.cursor);
        for idx in state.cursor..end {
            state.pending.insert(
                idx,
                PendingRecord {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            delivered.push(log[idx].clone());
        }
        state.cursor = end;
        Ok(delivered)
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn ensure_group(&self, group: &str) -> QueueResult<()> {
        self.lock().groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn append(&self, job: &VideoJob) -> QueueResult<String> {
        let fields = QueueEntry::fields_for(job)?
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let entry_id = {
            let mut inner = self.lock();
            let seq = inner.log.len();
            let entry_id = format!("{}-0", seq + 1);
            inner.log.push(QueueEntry::new(entry_id.clone(), fields));
            inner.index.insert(entry_id.clone(), seq);
            entry_id
        };

        self.appended.notify_waiters();
        debug!("Appended job {} as {}", job.job_id, entry_id);
        Ok(entry_id)
    }

    async fn read_as_group(
        &self,
        group: &str,
        consumer: &str,
        max_wait: Duration,
        count: usize,
    ) -> QueueResult<Vec<QueueEntry>> {
        let deadline = Instant::now() + max_wait;

        loop {
            // Register interest before checking so an append in between is not missed
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.take_new(group, consumer, count)?;
            if !entries.is_empty() {
                return Ok(entries);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn list_pending(&self, group: &str) -> QueueResult<Vec<PendingEntry>> {
        let inner = self.lock();
        let state = inner
            .groups
            .get(group)
            .ok_or_else(|| QueueError::UnknownGroup(group.to_string()))?;

        Ok(state
            .pending
            .iter()
            .map(|(idx, record)| PendingEntry {
                entry_id: inner.log[*idx].entry_id.clone(),
                consumer: record.consumer.clone(),
                idle: record.delivered_at.elapsed(),
                delivery_count: record.delivery_count,
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
        let mut inner = self.lock();
        let Inner { log, index, groups } = &mut *inner;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| QueueError::UnknownGroup(group.to_string()))?;

        let now = Instant::now();
        let mut claimed = Vec::new();
        for entry_id in entry_ids {
            let Some(idx) = index.get(entry_id) else {
                continue;
            };
            let Some(record) = state.pending.get_mut(idx) else {
                continue;
            };
            if now.duration_since(record.delivered_at) < min_idle {
                continue;
            }
            record.consumer = consumer.to_string();
            record.delivered_at = now;
            record.delivery_count += 1;
            claimed.push(log[*idx].clone());
        }
        Ok(claimed)
    }

    async fn heartbeat(&self, group: &str, consumer: &str, entry_ids: &[String]) -> QueueResult<usize> {
        let mut inner = self.lock();
        let Inner { index, groups, .. } = &mut *inner;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| QueueError::UnknownGroup(group.to_string()))?;

        let now = Instant::now();
        let mut refreshed = 0;
        for entry_id in entry_ids {
            let Some(record) = index.get(entry_id).and_then(|idx| state.pending.get_mut(idx)) else {
                continue;
            };
            if record.consumer == consumer {
                record.delivered_at = now;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    async fn ack(&self, group: &str, entry_id: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        let Some(idx) = inner.index.get(entry_id).copied() else {
            return Ok(());
        };
        if let Some(state) = inner.groups.get_mut(group) {
            state.pending.remove(&idx);
        }
        Ok(())
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.lock().log.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "video-workers";

    fn job(id: &str) -> VideoJob {
        VideoJob::new(format!("uploads/{id}.mp4"), format!("{id}.mp4")).with_job_id(id)
    }

    #[tokio::test]
    async fn test_group_created_after_append_sees_backlog() {
        let queue = MemoryQueue::new();
        queue.append(&job("v1")).await.unwrap();
        queue.ensure_group(GROUP).await.unwrap();

        let entries = queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decode().unwrap().job_id.as_str(), "v1");
    }

    #[tokio::test]
    async fn test_entries_delivered_once_per_group() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        queue.append(&job("v1")).await.unwrap();

        let first = queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 10)
            .await
            .unwrap();
        let second = queue
            .read_as_group(GROUP, "w2", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_read_wakes_on_append() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        queue.ensure_group(GROUP).await.unwrap();

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .read_as_group(GROUP, "w1", Duration::from_secs(5), 1)
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.append(&job("v1")).await.unwrap();

        let entries = reader.await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_ack_keeps_log_and_clears_pending() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        let id = queue.append(&job("v1")).await.unwrap();
        queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 1)
            .await
            .unwrap();
        assert_eq!(queue.list_pending(GROUP).await.unwrap().len(), 1);

        queue.ack(GROUP, &id).await.unwrap();
        queue.ack(GROUP, &id).await.unwrap();
        queue.ack(GROUP, "999-0").await.unwrap();

        assert!(queue.list_pending(GROUP).await.unwrap().is_empty());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_respects_min_idle() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        let id = queue.append(&job("v1")).await.unwrap();
        queue
            .read_as_group(GROUP, "crashed", Duration::from_millis(10), 1)
            .await
            .unwrap();

        let ids = vec![id.clone()];
        let early = queue
            .claim(GROUP, "w2", &ids, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let claimed = queue
            .claim(GROUP, "w2", &ids, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = queue.list_pending(GROUP).await.unwrap();
        assert_eq!(pending[0].consumer, "w2");
        assert_eq!(pending[0].delivery_count, 2);

        // Second claimer loses: the entry was just redelivered
        let again = queue
            .claim(GROUP, "w3", &ids, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_entry_from_recoverers() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        let id = queue.append(&job("v1")).await.unwrap();
        queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 1)
            .await
            .unwrap();
        let ids = vec![id.clone()];

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(queue.heartbeat(GROUP, "w1", &ids).await.unwrap(), 1);
        tokio::time::advance(Duration::from_secs(50)).await;

        // 100s since delivery, but only 50s since the last heartbeat
        let stolen = queue
            .claim(GROUP, "w2", &ids, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(stolen.is_empty());

        let pending = queue.list_pending(GROUP).await.unwrap();
        assert_eq!(pending[0].consumer, "w1");
        assert_eq!(pending[0].delivery_count, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_ignores_entries_owned_by_others() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        let id = queue.append(&job("v1")).await.unwrap();
        queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 1)
            .await
            .unwrap();

        let ids = vec![id.clone(), "999-0".to_string()];
        assert_eq!(queue.heartbeat(GROUP, "w2", &ids).await.unwrap(), 0);

        queue.ack(GROUP, &id).await.unwrap();
        assert_eq!(queue.heartbeat(GROUP, "w1", &ids).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_skips_acked_entries() {
        let queue = MemoryQueue::new();
        queue.ensure_group(GROUP).await.unwrap();
        let id = queue.append(&job("v1")).await.unwrap();
        queue
            .read_as_group(GROUP, "w1", Duration::from_millis(10), 1)
            .await
            .unwrap();
        queue.ack(GROUP, &id).await.unwrap();

        let claimed = queue
            .claim(GROUP, "w2", &[id], Duration::ZERO)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group_errors() {
        let queue = MemoryQueue::new();
        let err = queue
            .read_as_group("nope", "w1", Duration::from_millis(1), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::UnknownGroup(_)));
    }
}
