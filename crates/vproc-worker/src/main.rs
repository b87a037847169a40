//! Video transcoding worker binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vproc_db::{DbConfig, SqlxMetadataStore};
use vproc_media::{check_ffmpeg, check_ffprobe, FfmpegTranscoder, TranscodeConfig};
use vproc_queue::{QueueConfig, RedisProgressBus, RedisStreamQueue};
use vproc_storage::{LocalObjectStore, ObjectStore, S3ObjectStore};
use vproc_worker::{metrics, VideoPipeline, WorkerConfig, WorkerError, WorkerLoop, WorkerResult};

#[tokio::main]
async fn main() {
    // Redis TLS and the S3 client share the ring provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting vproc-worker");

    if let Err(e) = run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vproc=info,sqlx=warn,aws=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    config.validate()?;

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
        info!("Metrics exporter listening on port {}", port);
    }

    check_ffmpeg()?;
    check_ffprobe()?;

    let queue_config = QueueConfig::from_env();
    let queue = Arc::new(RedisStreamQueue::new(&queue_config)?);
    let progress = Arc::new(RedisProgressBus::new(&queue_config)?);

    let store: Arc<dyn ObjectStore> = match std::env::var("LOCAL_STORAGE_DIR") {
        Ok(dir) => {
            info!("Using local object store at {}", dir);
            Arc::new(LocalObjectStore::new(dir))
        }
        Err(_) => Arc::new(S3ObjectStore::from_env()?),
    };
    if let Err(e) = store.check_connectivity().await {
        warn!("Object store connectivity check failed: {}", e);
    }

    let db = Arc::new(SqlxMetadataStore::connect(&DbConfig::from_env()).await?);

    // Fired only when graceful shutdown runs out of time; the job is then
    // reported as interrupted and stays pending
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let transcoder =
        Arc::new(FfmpegTranscoder::new(TranscodeConfig::from_env()).with_cancel(cancel_rx));

    let pipeline = VideoPipeline::new(transcoder, store, db, progress)
        .with_job_timeout(config.job_timeout);
    let shutdown_timeout = config.shutdown_timeout;
    let worker = WorkerLoop::new(config, queue, pipeline);
    let shutdown = worker.shutdown_handle();

    let mut task = tokio::spawn(async move { worker.run().await });

    tokio::select! {
        result = &mut task => return join_result(result),
        _ = shutdown_signal() => {}
    }

    info!("Received shutdown signal, finishing in-flight job");
    shutdown.shutdown();

    match tokio::time::timeout(shutdown_timeout, &mut task).await {
        Ok(result) => join_result(result),
        Err(_) => {
            warn!(
                "In-flight job did not finish within {:?}, cancelling; it stays pending for redelivery",
                shutdown_timeout
            );
            let _ = cancel_tx.send(true);
            join_result(task.await)
        }
    }
}

fn join_result(result: Result<WorkerResult<()>, tokio::task::JoinError>) -> WorkerResult<()> {
    result.map_err(|e| WorkerError::internal(format!("worker task failed: {}", e)))?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
