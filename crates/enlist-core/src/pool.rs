//! Run coordinator: owns the worker set, the per-run queue, and run state.
//!
//! # Run lifecycle
//!
//! ```text
//! IDLE --start_run--> PROCESSING --all worker loops returned--> COMPLETED
//!                          ^                                        |
//!                          +----------------start_run---------------+
//! ```
//!
//! `start_run` is rejected while a run is processing. A run stays processing
//! until every loop it launched has returned, so loops from two runs never
//! drain at the same time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::AppError;
use crate::events::{Event, EventBus, EventKind};
use crate::job::{Job, RunStatus, WorkerState};
use crate::job_queue::JobQueue;
use crate::policy::{Disposition, Outcome, RateLimitPolicy};
use crate::stats::{RunStats, RunStatsSnapshot};
use crate::traits::Connection;
use crate::worker::{Cooldown, RunContext, WorkerLoop};

/// Returned by a successful `start_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub target: String,
    pub jobs: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub account_key: String,
    pub state: WorkerState,
}

/// Observability snapshot of the pool. Eventually consistent.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub status: RunStatus,
    pub active_workers: usize,
    pub queue_size: usize,
    /// Jobs taken by a loop and not yet settled.
    pub in_flight: usize,
    pub running: bool,
    pub target: Option<String>,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stats: RunStatsSnapshot,
    pub workers: Vec<WorkerStatus>,
}

struct WorkerSlot<C> {
    connection: Arc<C>,
    state: Arc<watch::Sender<WorkerState>>,
    cooldown: Cooldown,
}

impl<C> Clone for WorkerSlot<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            state: self.state.clone(),
            cooldown: self.cooldown.clone(),
        }
    }
}

struct RunState {
    status: RunStatus,
    run_id: Option<Uuid>,
    target: Option<String>,
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
    stats: Arc<RunStats>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn idle() -> Self {
        Self {
            status: RunStatus::Idle,
            run_id: None,
            target: None,
            queue: Arc::new(JobQueue::new()),
            cancel: CancellationToken::new(),
            stats: Arc::new(RunStats::new()),
            started_at: None,
            finished_at: None,
        }
    }

    fn running(&self) -> bool {
        self.status == RunStatus::Processing && !self.cancel.is_cancelled()
    }
}

struct PoolInner<C> {
    workers: Mutex<BTreeMap<String, WorkerSlot<C>>>,
    run: Mutex<RunState>,
    status_tx: watch::Sender<RunStatus>,
    bus: EventBus,
    policy: RateLimitPolicy,
}

/// Coordinates worker loops over a shared job queue.
///
/// Cheap to clone; clones share the same pool.
pub struct WorkerPool<C: Connection> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connection> Clone for WorkerPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connection> WorkerPool<C> {
    pub fn new(config: &EngineConfig) -> Self {
        let bus = EventBus::new(config.event_history, config.event_replay);
        Self::with_bus(RateLimitPolicy::new(config.policy.clone()), bus)
    }

    pub fn with_bus(policy: RateLimitPolicy, bus: EventBus) -> Self {
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        Self {
            inner: Arc::new(PoolInner {
                workers: Mutex::new(BTreeMap::new()),
                run: Mutex::new(RunState::idle()),
                status_tx,
                bus,
                policy,
            }),
        }
    }

    /// The bus every worker loop and the coordinator publish to.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Register a worker for future runs, replacing any worker with the same key.
    ///
    /// A replaced worker keeps its state and cooldown, since both belong to
    /// the account rather than the session. Its old connection is
    /// disconnected unless a run is processing, in which case the old loop
    /// keeps using it until the run ends.
    pub async fn add_worker(&self, account_key: impl Into<String>, connection: C) {
        let account_key = account_key.into();
        let connection = Arc::new(connection);
        let previous = {
            let mut workers = self.inner.lock_workers();
            match workers.get_mut(&account_key) {
                Some(slot) => Some(std::mem::replace(&mut slot.connection, connection)),
                None => {
                    let (state, _) = watch::channel(WorkerState::Idle);
                    workers.insert(
                        account_key.clone(),
                        WorkerSlot {
                            connection,
                            state: Arc::new(state),
                            cooldown: Cooldown::new(),
                        },
                    );
                    None
                }
            }
        };

        let replaced = previous.is_some();
        if let Some(previous) = previous {
            let processing = self.inner.lock_run().status == RunStatus::Processing;
            if !processing {
                previous.disconnect().await;
            }
        }

        tracing::info!(%account_key, replaced, "Worker registered");
        self.inner.bus.publish(
            Event::info(EventKind::WorkerRegistered, format!("Worker ready: {account_key}"))
                .with_worker(account_key),
        );
    }

    /// Unregister a worker. Returns false if the key was unknown.
    ///
    /// A loop already running for this worker is left to finish on its own.
    /// The connection is disconnected right away only when no run is
    /// processing; otherwise it is released when its loop returns.
    pub async fn remove_worker(&self, account_key: &str) -> bool {
        let slot = self.inner.lock_workers().remove(account_key);
        let Some(slot) = slot else {
            return false;
        };

        let processing = self.inner.lock_run().status == RunStatus::Processing;
        if !processing {
            slot.connection.disconnect().await;
        }

        tracing::info!(%account_key, processing, "Worker removed");
        self.inner.bus.publish(
            Event::info(EventKind::WorkerRemoved, format!("Worker removed: {account_key}"))
                .with_worker(account_key),
        );
        true
    }

    pub fn worker_status(&self, account_key: &str) -> Option<WorkerStatus> {
        self.inner
            .lock_workers()
            .get(account_key)
            .map(|slot| WorkerStatus {
                account_key: account_key.to_string(),
                state: *slot.state.borrow(),
            })
    }

    pub fn worker_keys(&self) -> Vec<String> {
        self.inner.lock_workers().keys().cloned().collect()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock_workers().len()
    }

    /// Start a run over `jobs` against `target` and return immediately.
    ///
    /// Fails with [`AppError::AlreadyRunning`] while a run is processing and
    /// with [`AppError::NoWorkers`] when no worker is registered; neither
    /// failure changes state or emits events. Must be called from within a
    /// tokio runtime.
    pub fn start_run(
        &self,
        target: impl Into<String>,
        jobs: impl IntoIterator<Item = Job>,
    ) -> Result<RunTicket, AppError> {
        let target = target.into();
        let mut run = self.inner.lock_run();
        if !run.status.accepts_new_run() {
            return Err(AppError::AlreadyRunning);
        }

        let workers: Vec<(String, WorkerSlot<C>)> = self
            .inner
            .lock_workers()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();
        if workers.is_empty() {
            return Err(AppError::NoWorkers);
        }

        let queue = Arc::new(JobQueue::new());
        let job_count = queue.fill(jobs)?;
        let run_id = Uuid::new_v4();
        let ctx = Arc::new(RunContext {
            target: target.clone(),
            queue: queue.clone(),
            policy: self.inner.policy.clone(),
            cancel: CancellationToken::new(),
            stats: Arc::new(RunStats::new()),
        });

        *run = RunState {
            status: RunStatus::Processing,
            run_id: Some(run_id),
            target: Some(target.clone()),
            queue,
            cancel: ctx.cancel.clone(),
            stats: ctx.stats.clone(),
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        self.inner.status_tx.send_replace(RunStatus::Processing);

        tracing::info!(%run_id, %target, jobs = job_count, workers = workers.len(), "Run started");
        self.inner.bus.publish(Event::info(
            EventKind::RunStarted,
            format!(
                "Started adding {job_count} members to {target} using {} accounts",
                workers.len()
            ),
        ));

        for (_, slot) in &workers {
            slot.state.send_replace(WorkerState::Idle);
        }

        let ticket = RunTicket {
            run_id,
            target,
            jobs: job_count,
            workers: workers.len(),
        };

        let inner = self.inner.clone();
        tokio::spawn(async move { inner.drive_run(run_id, ctx, workers).await });

        Ok(ticket)
    }

    /// Ask the active run to stop. Loops stop at their next queue check or
    /// wait; in-flight attempts complete. Safe to call at any time.
    pub fn stop(&self) {
        let run = self.inner.lock_run();
        if !run.running() {
            return;
        }
        run.cancel.cancel();

        tracing::info!(run_id = ?run.run_id, "Stop requested");
        self.inner.bus.publish(Event::info(
            EventKind::RunStopping,
            "Stop requested; workers finish their current attempt",
        ));
    }

    pub fn run_status(&self) -> RunStatus {
        self.inner.lock_run().status
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_run().running()
    }

    pub fn status(&self) -> PoolStatus {
        let workers: Vec<WorkerStatus> = self
            .inner
            .lock_workers()
            .iter()
            .map(|(key, slot)| WorkerStatus {
                account_key: key.clone(),
                state: *slot.state.borrow(),
            })
            .collect();

        let run = self.inner.lock_run();
        PoolStatus {
            status: run.status,
            active_workers: workers.len(),
            queue_size: run.queue.len(),
            in_flight: run.queue.in_flight(),
            running: run.running(),
            target: run.target.clone(),
            run_id: run.run_id,
            started_at: run.started_at,
            finished_at: run.finished_at,
            stats: run.stats.snapshot(),
            workers,
        }
    }

    /// Resolves once no run is processing.
    pub async fn wait_for_completion(&self) {
        let mut rx = self.inner.status_tx.subscribe();
        let _ = rx.wait_for(|status| status.accepts_new_run()).await;
    }

    /// Stop the active run, wait for its loops, then disconnect and drop
    /// every worker.
    pub async fn shutdown(&self) {
        self.stop();
        self.wait_for_completion().await;

        let workers = std::mem::take(&mut *self.inner.lock_workers());
        for (account_key, slot) in workers {
            slot.connection.disconnect().await;
            tracing::debug!(%account_key, "Worker disconnected");
        }
    }
}

impl<C: Connection> PoolInner<C> {
    fn lock_workers(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, WorkerSlot<C>>> {
        self.workers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned worker registry mutex");
            poisoned.into_inner()
        })
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned run state mutex");
            poisoned.into_inner()
        })
    }

    /// Launch one loop per worker and wait for all of them.
    async fn drive_run(
        self: Arc<Self>,
        run_id: Uuid,
        ctx: Arc<RunContext>,
        workers: Vec<(String, WorkerSlot<C>)>,
    ) {
        let mut handles = Vec::with_capacity(workers.len());
        for (key, slot) in workers {
            let worker = WorkerLoop::new(key.clone(), slot.connection, slot.state.clone(), ctx.clone())
                .with_cooldown(slot.cooldown);
            let held = worker.held_job();
            let bus = self.bus.clone();
            let handle = tokio::spawn(async move { worker.run(&bus).await });
            handles.push((key, slot.state, held, handle));
        }

        for (account_key, state, held, handle) in handles {
            if let Err(e) = handle.await {
                // A loop that died mid-attempt never acknowledged its job.
                if let Some(job) = held.take() {
                    ctx.stats
                        .record(&Outcome::Failed(format!("worker crashed: {e}")), Disposition::Skip);
                    ctx.queue.task_done();
                    tracing::warn!(%account_key, job = %job.identity, "Settled job held by crashed worker");
                }
                state.send_replace(WorkerState::Done);
                tracing::error!(%account_key, error = %e, "Worker loop crashed");
                self.bus.publish(
                    Event::error(EventKind::WorkerFailed, format!("Worker crash: {e}"))
                        .with_worker(account_key),
                );
            }
        }

        self.finish_run(run_id, &ctx);
    }

    fn finish_run(&self, run_id: Uuid, ctx: &RunContext) {
        let mut run = self.lock_run();
        if run.run_id != Some(run_id) {
            return;
        }
        run.status = RunStatus::Completed;
        run.finished_at = Some(Utc::now());

        let stats = ctx.stats.snapshot();
        let remaining = ctx.queue.len();
        let message = if ctx.cancel.is_cancelled() && remaining > 0 {
            format!(
                "Run stopped with {remaining} members unprocessed: {} added, {} skipped, {} failed, {} dropped",
                stats.added, stats.skipped, stats.failed, stats.dropped
            )
        } else {
            format!(
                "All members processed: {} added, {} skipped, {} failed, {} dropped",
                stats.added, stats.skipped, stats.failed, stats.dropped
            )
        };

        tracing::info!(%run_id, remaining, ?stats, "Run completed");
        self.bus.publish(Event::info(EventKind::RunCompleted, message));
        self.status_tx.send_replace(RunStatus::Completed);
    }
}
