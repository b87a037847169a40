//! In-process [`ProgressBus`] built on broadcast channels.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::warn;

use vproc_models::{JobId, ProgressEvent};

use crate::error::QueueResult;
use crate::progress::{ProgressBus, ProgressStream, DEFAULT_SNAPSHOT_TTL_SECS};

const CHANNEL_CAPACITY: usize = 256;

struct Snapshot {
    event: ProgressEvent,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    topics: HashMap<JobId, broadcast::Sender<ProgressEvent>>,
    snapshots: HashMap<JobId, Snapshot>,
}

/// Memory-backed progress bus.
pub struct MemoryProgressBus {
    inner: Mutex<Inner>,
    all: broadcast::Sender<ProgressEvent>,
    snapshot_ttl: Duration,
}

impl Default for MemoryProgressBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_SNAPSHOT_TTL_SECS))
    }
}

impl MemoryProgressBus {
    pub fn new(snapshot_ttl: Duration) -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            all,
            snapshot_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn into_stream(rx: broadcast::Receiver<ProgressEvent>) -> ProgressStream {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Progress subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl ProgressBus for MemoryProgressBus {
    async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();

        let unobserved = inner
            .topics
            .get(&event.job_id)
            .is_some_and(|tx| tx.send(event.clone()).is_err());
        if unobserved {
            inner.topics.remove(&event.job_id);
        }
        let _ = self.all.send(event.clone());

        inner.snapshots.retain(|_, s| s.expires_at > now);
        inner.snapshots.insert(
            event.job_id.clone(),
            Snapshot {
                event: event.clone(),
                expires_at: now + self.snapshot_ttl,
            },
        );
        Ok(())
    }

    async fn get_snapshot(&self, job_id: &JobId) -> QueueResult<Option<ProgressEvent>> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .snapshots
            .get(job_id)
            .filter(|s| s.expires_at > now)
            .map(|s| s.event.clone()))
    }

    async fn subscribe(&self, job_id: &JobId) -> QueueResult<ProgressStream> {
        let rx = self
            .lock()
            .topics
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(into_stream(rx))
    }

    async fn subscribe_all(&self) -> QueueResult<ProgressStream> {
        Ok(into_stream(self.all.subscribe()))
    }
}
