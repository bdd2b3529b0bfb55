//! # Run Scheduler
//!
//! Every run path ends in [`RunExecutor::execute`], which holds the tenant
//! lock for the whole run. Users runs go straight to the worker pool through
//! a bounded channel; every other run is written to the queue table and picked
//! up by the [`QueueWorker`]. The [`Autosync`] loop feeds automatic pipes into
//! the same queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::DbErr;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::{AutosyncConfig, WorkerConfig};
use crate::error::PipeError;
use crate::locks::TenantLocks;
use crate::pipes::{Pipe, RunState, Status};
use crate::repositories::{PRIORITY_HIGH, PRIORITY_NORMAL, PipeRepository, QueueRepository, QueuedRun};
use crate::sync::PipeSyncService;

/// Acknowledgment returned when a run is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunTicket {
    /// A worker picked the run up; poll the status or log for the outcome.
    Accepted,
    /// The run waits in the queue.
    Queued,
}

/// Serializes runs per workspace around the orchestrator.
pub struct RunExecutor {
    sync: PipeSyncService,
    locks: TenantLocks,
}

impl RunExecutor {
    pub fn new(sync: PipeSyncService, locks: TenantLocks) -> Self {
        Self { sync, locks }
    }

    pub fn sync(&self) -> &PipeSyncService {
        &self.sync
    }

    pub fn locks(&self) -> &TenantLocks {
        &self.locks
    }

    /// Runs the pipe while holding its workspace lock.
    pub async fn execute(&self, pipe: Pipe) -> Status {
        let _guard = self.locks.acquire(pipe.workspace_id).await;
        gauge!("pipes_runs_in_flight").increment(1.0);
        scopeguard::defer! {
            gauge!("pipes_runs_in_flight").decrement(1.0);
        }
        self.sync.synchronize(pipe).await
    }
}

/// Front door for run requests.
#[derive(Clone)]
pub struct RunScheduler {
    sender: mpsc::Sender<Pipe>,
    queue: QueueRepository,
    pipes: PipeRepository,
}

impl RunScheduler {
    /// Spawns `config.concurrency` workers reading from a channel of
    /// `config.channel_capacity` runs. Workers exit when `shutdown` fires.
    pub fn start(
        executor: Arc<RunExecutor>,
        queue: QueueRepository,
        pipes: PipeRepository,
        config: &WorkerConfig,
        shutdown: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..config.concurrency.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    executor.clone(),
                    receiver.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        (
            Self {
                sender,
                queue,
                pipes,
            },
            handles,
        )
    }

    /// Hands the pipe to the worker pool and returns without waiting for the
    /// run. Waits only while the channel is full.
    pub async fn run_now(&self, pipe: Pipe) -> Result<RunTicket, PipeError> {
        debug!(workspace_id = pipe.workspace_id, vendor = %pipe.vendor, pipe = %pipe.id, "run submitted");
        self.sender
            .send(pipe)
            .await
            .map_err(|_| PipeError::internal("run workers are not running"))?;
        counter!("pipes_runs_submitted_total", "path" => "direct").increment(1);
        Ok(RunTicket::Accepted)
    }

    /// Queues the pipe ahead of autosync runs.
    pub async fn enqueue_first(&self, pipe: &Pipe) -> Result<RunTicket, PipeError> {
        enqueue(&self.queue, &self.pipes, pipe, PRIORITY_HIGH).await?;
        counter!("pipes_runs_submitted_total", "path" => "queue").increment(1);
        Ok(RunTicket::Queued)
    }
}

async fn run_worker(
    worker: usize,
    executor: Arc<RunExecutor>,
    receiver: Arc<Mutex<mpsc::Receiver<Pipe>>>,
    shutdown: CancellationToken,
) {
    debug!(worker, "run worker started");
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            pipe = async { receiver.lock().await.recv().await } => pipe,
        };
        let Some(pipe) = next else { break };
        executor.execute(pipe).await;
    }
    debug!(worker, "run worker stopped");
}

/// Inserts a queue row and marks the pipe status as queued. Nothing is
/// written when an unclaimed row already exists, and a running status is
/// left alone.
async fn enqueue(
    queue: &QueueRepository,
    pipes: &PipeRepository,
    pipe: &Pipe,
    priority: i32,
) -> Result<bool, DbErr> {
    let inserted = queue
        .enqueue(pipe.workspace_id, pipe.vendor, pipe.id, priority)
        .await?;
    if !inserted {
        return Ok(false);
    }
    let key = pipe.key();
    let previous = pipes.load_status(pipe.workspace_id, &key).await?;
    // A run in progress keeps its status; the row runs after it.
    if previous.as_ref().is_some_and(|status| status.state == RunState::Running) {
        debug!(workspace_id = pipe.workspace_id, key = %key, "queued behind a running run");
        return Ok(true);
    }
    pipes
        .save_status(&Status::queued(pipe.workspace_id, key, previous.as_ref()))
        .await?;
    Ok(true)
}

/// Seconds finished queue rows are kept.
const QUEUE_RETENTION_SECS: i64 = 3_600;

/// Drains the queue table.
pub struct QueueWorker {
    executor: Arc<RunExecutor>,
    queue: QueueRepository,
    pipes: PipeRepository,
    tick: Duration,
    batch: u64,
}

impl QueueWorker {
    pub fn new(
        executor: Arc<RunExecutor>,
        queue: QueueRepository,
        pipes: PipeRepository,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            executor,
            queue,
            pipes,
            tick: Duration::from_millis(config.queue_tick_ms.max(1)),
            batch: config.queue_claim_batch.max(1),
        }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting queue worker");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Queue worker shutdown requested");
                    break;
                }
                _ = sleep(self.tick) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Queue worker tick failed");
                    }
                    histogram!("pipes_queue_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }
        info!("Queue worker stopped");
    }

    /// Claims one batch and runs it to completion. Returns the number of
    /// claimed rows.
    pub async fn tick(&self) -> Result<usize, DbErr> {
        let claimed = self.queue.claim(self.batch).await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        counter!("pipes_queue_claimed_total").increment(claimed.len() as u64);

        let count = claimed.len();
        let mut runs = JoinSet::new();
        for row in claimed {
            let executor = self.executor.clone();
            let queue = self.queue.clone();
            let pipes = self.pipes.clone();
            runs.spawn(async move { run_queued(executor, queue, pipes, row).await });
        }
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(Err(err)) => error!(error = %err, "queued run bookkeeping failed"),
                Err(err) => error!(error = %err, "queued run task failed"),
                Ok(Ok(())) => {}
            }
        }

        let cutoff = Utc::now() - chrono::Duration::seconds(QUEUE_RETENTION_SECS);
        match self.queue.prune_synced(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "pruned finished queue rows"),
            Err(err) => warn!(error = %err, "could not prune queue rows"),
        }
        debug!(claimed = count, "Queue tick completed");
        Ok(count)
    }
}

async fn run_queued(
    executor: Arc<RunExecutor>,
    queue: QueueRepository,
    pipes: PipeRepository,
    row: QueuedRun,
) -> Result<(), DbErr> {
    let key = crate::pipes::pipes_key(row.vendor, row.pipe);
    match pipes.load(row.workspace_id, &key).await? {
        Some(pipe) if pipe.configured => {
            let run = tokio::spawn(async move { executor.execute(pipe).await });
            if let Err(err) = run.await {
                error!(workspace_id = row.workspace_id, key = %key, error = %err, "queued run panicked");
            }
        }
        _ => warn!(
            workspace_id = row.workspace_id,
            key = %key,
            "skipping queued run for a pipe that is no longer configured"
        ),
    }
    queue.mark_synced(row.id).await
}

/// Periodically queues every configured automatic pipe.
pub struct Autosync {
    queue: QueueRepository,
    pipes: PipeRepository,
    interval: Duration,
}

impl Autosync {
    pub fn new(queue: QueueRepository, pipes: PipeRepository, config: &AutosyncConfig) -> Self {
        Self {
            queue,
            pipes,
            interval: Duration::from_secs(config.interval_seconds.max(1)),
        }
    }

    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_seconds = self.interval.as_secs(), "Starting autosync");
        // First pass is jittered by up to one interval, capped at a minute.
        let jitter_ms = rand::thread_rng().gen_range(0..=self.interval.as_millis().min(60_000) as u64);
        let mut wait = Duration::from_millis(jitter_ms);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Autosync shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    let tick_started = Instant::now();
                    match self.tick().await {
                        Ok(queued) => debug!(queued, "Autosync tick completed"),
                        Err(err) => error!(error = %err, "Autosync tick failed"),
                    }
                    histogram!("pipes_autosync_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                    wait = self.interval;
                }
            }
        }
        info!("Autosync stopped");
    }

    /// Queues the automatic pipes. Returns how many rows were inserted.
    pub async fn tick(&self) -> Result<usize, DbErr> {
        let mut queued = 0;
        for pipe in self.pipes.list_automatic().await? {
            match enqueue(&self.queue, &self.pipes, &pipe, PRIORITY_NORMAL).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    workspace_id = pipe.workspace_id,
                    key = %pipe.key(),
                    error = %err,
                    "could not queue automatic pipe"
                ),
            }
        }
        gauge!("pipes_autosync_queued").set(queued as f64);
        Ok(queued)
    }
}
