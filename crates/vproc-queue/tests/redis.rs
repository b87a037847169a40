//! Redis-backed queue and progress bus. Run with `--ignored` against a
//! server at `REDIS_URL`.

use std::time::Duration;

use futures::StreamExt;

use vproc_models::{AssetStatus, JobId, ProgressEvent, VideoJob};
use vproc_queue::{DurableQueue, ProgressBus, QueueConfig, RedisProgressBus, RedisStreamQueue};

/// Fresh stream per test so runs never see each other's entries.
fn config() -> QueueConfig {
    dotenvy::dotenv().ok();
    QueueConfig {
        stream_name: format!("vproc:test:{}", uuid::Uuid::new_v4()),
        ..QueueConfig::from_env()
    }
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let queue = RedisStreamQueue::new(&config()).expect("Failed to create queue");
    queue.ping().await.expect("Redis not reachable");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_append_read_ack_cycle() {
    let queue = RedisStreamQueue::new(&config()).unwrap();
    let job = VideoJob::new("uploads/a.mp4", "a.mp4").with_job_id("redis-v1");

    // Appended before the group exists, still delivered
    let entry_id = queue.append(&job).await.unwrap();
    queue.ensure_group("g").await.unwrap();
    queue.ensure_group("g").await.unwrap();

    let entries = queue
        .read_as_group("g", "c1", Duration::from_millis(100), 10)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_id, entry_id);
    assert_eq!(entries[0].decode().unwrap(), job);

    let pending = queue.list_pending("g").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].consumer, "c1");
    assert_eq!(pending[0].delivery_count, 1);

    queue.ack("g", &entry_id).await.unwrap();
    queue.ack("g", &entry_id).await.unwrap();
    queue.ack("g", "0-1").await.unwrap();
    assert!(queue.list_pending("g").await.unwrap().is_empty());

    // Acked entries stay in the log
    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_claim_respects_min_idle() {
    let queue = RedisStreamQueue::new(&config()).unwrap();
    queue.ensure_group("g").await.unwrap();
    queue
        .append(&VideoJob::new("uploads/b.mp4", "b.mp4"))
        .await
        .unwrap();

    let taken = queue
        .read_as_group("g", "crashed", Duration::from_millis(100), 1)
        .await
        .unwrap();
    let ids = vec![taken[0].entry_id.clone()];

    let too_soon = queue
        .claim("g", "survivor", &ids, Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(too_soon.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let claimed = queue
        .claim("g", "survivor", &ids, Duration::from_millis(10))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    let pending = queue.list_pending("g").await.unwrap();
    assert_eq!(pending[0].consumer, "survivor");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_heartbeat_resets_idle_for_owner_only() {
    let queue = RedisStreamQueue::new(&config()).unwrap();
    queue.ensure_group("g").await.unwrap();
    queue
        .append(&VideoJob::new("uploads/c.mp4", "c.mp4"))
        .await
        .unwrap();

    let taken = queue
        .read_as_group("g", "owner", Duration::from_millis(100), 1)
        .await
        .unwrap();
    let ids = vec![taken[0].entry_id.clone()];

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.heartbeat("g", "intruder", &ids).await.unwrap(), 0);
    assert_eq!(queue.heartbeat("g", "owner", &ids).await.unwrap(), 1);

    let stolen = queue
        .claim("g", "intruder", &ids, Duration::from_millis(250))
        .await
        .unwrap();
    assert!(stolen.is_empty());

    let pending = queue.list_pending("g").await.unwrap();
    assert_eq!(pending[0].consumer, "owner");
    assert_eq!(pending[0].delivery_count, 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unknown_group_is_reported() {
    let queue = RedisStreamQueue::new(&config()).unwrap();
    queue.ensure_group("g").await.unwrap();

    let err = queue
        .read_as_group("missing", "c1", Duration::from_millis(10), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, vproc_queue::QueueError::UnknownGroup(_)));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_progress_pubsub_and_snapshot() {
    let bus = RedisProgressBus::new(&config()).expect("Failed to create progress bus");
    let job_id = JobId::new();

    let mut per_job = bus.subscribe(&job_id).await.unwrap();
    let mut all = bus.subscribe_all().await.unwrap();

    bus.publish(&ProgressEvent::processing(&job_id, 0, "Starting")).await.unwrap();
    bus.publish(&ProgressEvent::completed(&job_id)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), per_job.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, AssetStatus::Processing);

    let global = tokio::time::timeout(Duration::from_secs(2), all.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(global.job_id, job_id);

    let snapshot = bus.get_snapshot(&job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, AssetStatus::Completed);
}
