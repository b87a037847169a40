//! Worker loop: one consumer-group member.
//!
//! `Startup -> Recovering -> Consuming -> ShuttingDown -> Stopped`. Jobs run
//! one at a time. An entry is acked when its job completed (or was already
//! completed) and when it cannot be decoded; failed and interrupted jobs
//! stay pending and come back through recovery. While a job runs its entry
//! is heartbeated, so recovery on a sibling never takes it over.

use std::future::Future;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

use vproc_queue::{DurableQueue, PendingEntry, QueueEntry, QueueError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{JobOutcome, JobStatus, VideoPipeline};
use crate::retry::{retry_async, Backoff, RetryPolicy};

/// Lifecycle of a [`WorkerLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Startup,
    Recovering,
    Consuming,
    ShuttingDown,
    Stopped,
}

/// Requests a cooperative shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop reading new entries. The job in flight runs to completion.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// What happened to a delivered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDisposition {
    /// Job finished and the entry was acked
    Acked(JobStatus),
    /// Payload could not be decoded; acked and dropped
    DroppedMalformed,
    /// Job failed; the entry stays pending for redelivery
    LeftPending(String),
    /// Job cancelled by shutdown; the entry stays pending for redelivery
    Interrupted,
}

/// Consumes jobs from the queue and runs them through the pipeline.
pub struct WorkerLoop {
    config: WorkerConfig,
    queue: Arc<dyn DurableQueue>,
    pipeline: VideoPipeline,
    shutdown_tx: Arc<watch::Sender<bool>>,
    state_tx: watch::Sender<WorkerState>,
    retry: RetryPolicy,
}

impl WorkerLoop {
    pub fn new(config: WorkerConfig, queue: Arc<dyn DurableQueue>, pipeline: VideoPipeline) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(WorkerState::Startup);
        Self {
            config,
            queue,
            pipeline,
            shutdown_tx: Arc::new(shutdown_tx),
            state_tx,
            retry: RetryPolicy::default(),
        }
    }

    /// Backoff used for group creation and failed reads.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Watch the loop's state.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        debug!(consumer = %self.config.consumer_name, "Worker state: {:?}", state);
        self.state_tx.send_replace(state);
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run until shutdown is requested.
    pub async fn run(&self) -> WorkerResult<()> {
        let group = self.config.consumer_group.clone();
        let consumer = self.config.consumer_name.clone();
        info!(consumer = %consumer, group = %group, "Starting worker loop");

        self.set_state(WorkerState::Startup);
        if let Err(e) = self.config.validate() {
            self.set_state(WorkerState::Stopped);
            return Err(e);
        }
        if let Err(e) = retry_async(&self.retry, "ensure consumer group", || {
            self.queue.ensure_group(&group)
        })
        .await
        {
            self.set_state(WorkerState::Stopped);
            return Err(e.into());
        }

        self.set_state(WorkerState::Recovering);
        if let Err(e) = self.recover(true).await {
            warn!(consumer = %consumer, "Startup recovery failed: {}", e);
        }

        if !self.is_shutting_down() {
            self.set_state(WorkerState::Consuming);
            self.consume().await;
        }

        self.set_state(WorkerState::ShuttingDown);
        info!(consumer = %consumer, "Worker loop shutting down");
        self.set_state(WorkerState::Stopped);
        Ok(())
    }

    async fn consume(&self) {
        let group = &self.config.consumer_group;
        let consumer = &self.config.consumer_name;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut backoff = Backoff::new(self.retry.clone());
        let mut last_recovery = Instant::now();

        while !self.is_shutting_down() {
            if last_recovery.elapsed() >= self.config.claim_interval {
                if let Err(e) = self.recover(false).await {
                    warn!(consumer = %consumer, "Periodic recovery failed: {}", e);
                }
                last_recovery = Instant::now();
                continue;
            }

            let read = tokio::select! {
                _ = shutdown_rx.changed() => break,
                read = self.queue.read_as_group(
                    group,
                    consumer,
                    self.config.block_time,
                    self.config.read_count,
                ) => read,
            };

            match read {
                Ok(entries) => {
                    backoff.reset();
                    for entry in entries {
                        self.handle_entry(entry).await;
                    }
                }
                Err(e) => {
                    metrics::record_read_error();
                    let delay = backoff.next_delay();
                    error!(
                        consumer = %consumer,
                        failures = backoff.failures(),
                        "Failed to read jobs, retrying in {:?}: {}", delay, e
                    );
                    if matches!(e, QueueError::UnknownGroup(_)) {
                        if let Err(e) = self.queue.ensure_group(group).await {
                            warn!("Failed to recreate consumer group: {}", e);
                        }
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Claim and process abandoned entries.
    ///
    /// At startup this consumer's own pending entries are taken back
    /// immediately: they were left by a previous run under the same name.
    /// Everything else, including this consumer's own failed jobs later on,
    /// moves only once idle for `claim_min_idle`.
    pub async fn recover(&self, startup: bool) -> WorkerResult<usize> {
        let group = &self.config.consumer_group;
        let consumer = &self.config.consumer_name;

        let pending = self.queue.list_pending(group).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let (own, others): (Vec<PendingEntry>, Vec<PendingEntry>) =
            pending.into_iter().partition(|p| &p.consumer == consumer);

        let own_min_idle = if startup {
            Duration::ZERO
        } else {
            self.config.claim_min_idle
        };

        let mut claimed = Vec::new();
        for (entries, min_idle) in [(own, own_min_idle), (others, self.config.claim_min_idle)] {
            if entries.is_empty() {
                continue;
            }
            let ids: Vec<String> = entries.into_iter().map(|p| p.entry_id).collect();
            claimed.extend(self.queue.claim(group, consumer, &ids, min_idle).await?);
        }

        if claimed.is_empty() {
            return Ok(0);
        }

        info!(consumer = %consumer, count = claimed.len(), "Recovered pending entries");
        metrics::record_jobs_reclaimed(claimed.len());

        let count = claimed.len();
        for entry in claimed {
            if self.is_shutting_down() {
                info!("Shutdown requested, leaving remaining recovered entries pending");
                break;
            }
            self.handle_entry(entry).await;
        }
        Ok(count)
    }

    /// Decode, run and ack one entry.
    pub async fn handle_entry(&self, entry: QueueEntry) -> EntryDisposition {
        let job = match entry.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!(entry_id = %entry.entry_id, "Dropping malformed entry: {}", e);
                metrics::record_job_malformed();
                self.ack(&entry.entry_id).await;
                return EntryDisposition::DroppedMalformed;
            }
        };

        let logger = JobLogger::new(&job.job_id, &entry.entry_id);
        logger.log_start(&job.original_name);
        let started = Instant::now();

        let work = self.pipeline.run(&job).instrument(logger.span());
        let outcome = self.with_heartbeat(&entry.entry_id, work).await;
        self.report(&logger, &outcome, started.elapsed().as_secs_f64());

        match outcome.status {
            JobStatus::Failed(message) => EntryDisposition::LeftPending(message),
            JobStatus::Interrupted => EntryDisposition::Interrupted,
            status => {
                self.ack(&entry.entry_id).await;
                EntryDisposition::Acked(status)
            }
        }
    }

    /// Drive `work` to completion, refreshing the entry's idle time every
    /// `heartbeat_interval`.
    async fn with_heartbeat<F: Future>(&self, entry_id: &str, work: F) -> F::Output {
        if self.config.heartbeat_interval.is_zero() {
            return work.await;
        }
        let group = &self.config.consumer_group;
        let consumer = &self.config.consumer_name;
        let ids = [entry_id.to_string()];

        tokio::pin!(work);
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the entry was just delivered
        ticker.tick().await;

        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => {
                    match self.queue.heartbeat(group, consumer, &ids).await {
                        Ok(0) => warn!(
                            entry_id = %entry_id,
                            consumer = %consumer,
                            "In-flight entry is no longer owned by this consumer"
                        ),
                        Ok(_) => debug!(entry_id = %entry_id, "Heartbeat"),
                        Err(e) => warn!(entry_id = %entry_id, "Heartbeat failed: {}", e),
                    }
                }
            }
        }
    }

    fn report(&self, logger: &JobLogger, outcome: &JobOutcome, elapsed_secs: f64) {
        if !outcome.non_fatal.is_empty() {
            logger.log_warning(&format!(
                "{} best-effort step(s) failed",
                outcome.non_fatal.len()
            ));
        }
        match &outcome.status {
            JobStatus::Completed => {
                metrics::record_job_completed(elapsed_secs);
                logger.log_completion(&format!(
                    "{} renditions in {:.1}s",
                    outcome.renditions.len(),
                    elapsed_secs
                ));
            }
            JobStatus::AlreadyCompleted => {
                metrics::record_job_skipped();
                logger.log_progress("already completed, acking redelivery");
            }
            JobStatus::Failed(message) => {
                metrics::record_job_failed(elapsed_secs);
                logger.log_error(message);
            }
            JobStatus::Interrupted => {
                metrics::record_job_interrupted();
                logger.log_warning("interrupted by shutdown, left pending");
            }
        }
    }

    async fn ack(&self, entry_id: &str) {
        if let Err(e) = self.queue.ack(&self.config.consumer_group, entry_id).await {
            // The entry will be redelivered; completed jobs are skipped then
            error!(entry_id = %entry_id, "Failed to ack entry: {}", WorkerError::from(e));
        }
    }
}
