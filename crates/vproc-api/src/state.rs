//! Application state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use vproc_db::{DbConfig, MetadataStore, SqlxMetadataStore};
use vproc_queue::{DurableQueue, ProgressBus, QueueConfig, RedisProgressBus, RedisStreamQueue};
use vproc_storage::{LocalObjectStore, ObjectStore, S3ObjectStore};

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::producer::JobProducer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub queue: Arc<dyn DurableQueue>,
    pub progress: Arc<dyn ProgressBus>,
    pub db: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn ObjectStore>,
    pub producer: JobProducer,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Assemble state from already-constructed backends.
    pub fn new(
        config: ApiConfig,
        queue: Arc<dyn DurableQueue>,
        progress: Arc<dyn ProgressBus>,
        db: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        let producer = JobProducer::new(
            Arc::clone(&queue),
            Arc::clone(&progress),
            Arc::clone(&db),
        );
        Self {
            config,
            queue,
            progress,
            db,
            storage,
            producer,
            shutdown: Arc::new(watch::channel(false).0),
        }
    }

    /// Ask long-lived responses to finish so graceful shutdown can complete.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`AppState::begin_shutdown`] has been called.
    pub fn shutdown_requested(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            let _ = rx.wait_for(|stopping| *stopping).await;
        }
    }

    /// Connect to Redis, the metadata database and object storage.
    pub async fn from_env(config: ApiConfig) -> ApiResult<Self> {
        let queue_config = QueueConfig::from_env();
        let queue = Arc::new(RedisStreamQueue::new(&queue_config)?);
        let progress = Arc::new(RedisProgressBus::new(&queue_config)?);

        let storage: Arc<dyn ObjectStore> = match std::env::var("LOCAL_STORAGE_DIR") {
            Ok(dir) => {
                info!("Using local object store at {}", dir);
                Arc::new(LocalObjectStore::new(dir))
            }
            Err(_) => Arc::new(S3ObjectStore::from_env()?),
        };
        if let Err(e) = storage.check_connectivity().await {
            warn!("Object store connectivity check failed: {}", e);
        }

        let db = Arc::new(SqlxMetadataStore::connect(&DbConfig::from_env()).await?);

        Ok(Self::new(config, queue, progress, db, storage))
    }
}
