use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::events::{Event, EventBus, EventKind, Severity};
use crate::job::{Job, WorkerState};
use crate::job_queue::JobQueue;
use crate::policy::{Decision, Disposition, Outcome, RateLimitPolicy};
use crate::stats::RunStats;
use crate::traits::Connection;
use crate::util::format_duration;

/// Events emitted by a worker loop for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_key: &'a str,
    },
    TargetResolved {
        worker_key: &'a str,
        target: &'a str,
    },
    /// A cooldown from an earlier run has not yet expired.
    CooldownPending {
        worker_key: &'a str,
        remaining: Duration,
    },
    TargetUnresolved {
        worker_key: &'a str,
        target: &'a str,
        error: &'a ProviderError,
    },
    JobFinished {
        worker_key: &'a str,
        job: &'a Job,
        outcome: &'a Outcome,
        decision: &'a Decision,
    },
    Stopped {
        worker_key: &'a str,
        exit: WorkerExit,
    },
}

impl WorkerEvent<'_> {
    /// Convert into a bus event.
    pub fn to_event(&self) -> Event {
        let (severity, kind, message, worker_key) = match self {
            WorkerEvent::Started { worker_key } => (
                Severity::Debug,
                EventKind::WorkerStarted,
                "Worker started".to_string(),
                *worker_key,
            ),
            WorkerEvent::TargetResolved { worker_key, target } => (
                Severity::Debug,
                EventKind::WorkerStarted,
                format!("Resolved target {target}"),
                *worker_key,
            ),
            WorkerEvent::CooldownPending {
                worker_key,
                remaining,
            } => (
                Severity::Warning,
                EventKind::Cooldown,
                format!(
                    "Still cooling down from a provider wait; resuming in {}",
                    format_duration(*remaining)
                ),
                *worker_key,
            ),
            WorkerEvent::TargetUnresolved {
                worker_key,
                target,
                error,
            } => (
                Severity::Error,
                EventKind::WorkerFailed,
                format!("Could not resolve target {target}: {error}"),
                *worker_key,
            ),
            WorkerEvent::JobFinished {
                worker_key,
                job,
                outcome,
                decision,
            } => {
                let (severity, kind, message) = describe_outcome(job, outcome, decision);
                (severity, kind, message, *worker_key)
            }
            WorkerEvent::Stopped { worker_key, exit } => (
                Severity::Debug,
                EventKind::WorkerFinished,
                format!("Worker finished: {exit}"),
                *worker_key,
            ),
        };
        Event::new(severity, kind, message).with_worker(worker_key)
    }
}

fn describe_outcome(job: &Job, outcome: &Outcome, decision: &Decision) -> (Severity, EventKind, String) {
    match outcome {
        Outcome::Added => (
            Severity::Info,
            EventKind::JobAdded,
            format!("Successfully added {job}"),
        ),
        Outcome::PeerFlood => (
            Severity::Warning,
            EventKind::Cooldown,
            format!(
                "Account hit flood limit. Cooling down for {} ({job} dropped)",
                format_duration(decision.wait)
            ),
        ),
        Outcome::FloodWait { seconds } => (
            Severity::Warning,
            EventKind::FloodWait,
            format!("Flood wait: {seconds}s ({job} dropped)"),
        ),
        Outcome::PrivacyRestricted => (
            Severity::Debug,
            EventKind::JobSkipped,
            format!("Privacy restricted: {job}"),
        ),
        Outcome::NotFound => (
            Severity::Warning,
            EventKind::JobSkipped,
            format!("Identity not found: {job}"),
        ),
        Outcome::Failed(message) => (
            Severity::Error,
            EventKind::JobFailed,
            format!("Error adding {job}: {message}"),
        ),
    }
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Publishes worker events on the bus and mirrors them to `tracing`.
impl WorkerReporter for EventBus {
    fn report(&self, event: WorkerEvent<'_>) {
        match &event {
            WorkerEvent::Started { worker_key } => {
                tracing::debug!(%worker_key, "Worker started");
            }
            WorkerEvent::TargetResolved { worker_key, target } => {
                tracing::debug!(%worker_key, %target, "Target resolved");
            }
            WorkerEvent::CooldownPending {
                worker_key,
                remaining,
            } => {
                tracing::warn!(%worker_key, remaining_secs = remaining.as_secs_f64(), "Cooldown carried over from previous run");
            }
            WorkerEvent::TargetUnresolved {
                worker_key,
                target,
                error,
            } => {
                tracing::error!(%worker_key, %target, %error, "Target resolution failed");
            }
            WorkerEvent::JobFinished {
                worker_key,
                job,
                outcome,
                decision,
            } => {
                let wait_secs = decision.wait.as_secs_f64();
                match decision.disposition {
                    Disposition::Success => {
                        tracing::info!(%worker_key, job = %job.identity, wait_secs, "Job added");
                    }
                    Disposition::Skip => {
                        tracing::warn!(%worker_key, job = %job.identity, ?outcome, wait_secs, "Job skipped");
                    }
                    Disposition::RetryAfter(_) | Disposition::AbortWorker => {
                        tracing::warn!(%worker_key, job = %job.identity, ?outcome, wait_secs, "Worker throttled");
                    }
                }
            }
            WorkerEvent::Stopped { worker_key, exit } => {
                tracing::info!(%worker_key, %exit, "Worker stopped");
            }
        }
        self.publish(event.to_event());
    }
}

/// How a worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue ran dry.
    Drained,
    /// The run was stopped.
    Cancelled,
    /// The destination could not be resolved with this worker's connection.
    TargetUnresolved,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Drained => write!(f, "queue drained"),
            WorkerExit::Cancelled => write!(f, "cancelled"),
            WorkerExit::TargetUnresolved => write!(f, "target unresolved"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Earliest instant a worker may contact the provider again.
///
/// Owned by the worker's registration, not by a run, so a provider wait cut
/// short by `stop` is still honored by the next run.
#[derive(Debug, Clone, Default)]
pub struct Cooldown(Arc<Mutex<Option<Instant>>>);

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the deadline out to `now + wait`. Never shortens it.
    pub fn extend(&self, wait: Duration) {
        let until = Instant::now() + wait;
        let mut deadline = lock(&self.0);
        if (*deadline).is_none_or(|current| current < until) {
            *deadline = Some(until);
        }
    }

    /// Time left before the worker may send again.
    pub fn remaining(&self) -> Duration {
        let deadline = *lock(&self.0);
        deadline
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }
}

/// The job a loop has taken and not yet acknowledged.
///
/// Lets the coordinator settle the job if the loop's task dies mid-attempt.
#[derive(Debug, Clone, Default)]
pub struct HeldJob(Arc<Mutex<Option<Job>>>);

impl HeldJob {
    fn hold(&self, job: &Job) {
        *lock(&self.0) = Some(job.clone());
    }

    fn release(&self) {
        lock(&self.0).take();
    }

    /// Remove and return the held job, if any.
    pub fn take(&self) -> Option<Job> {
        lock(&self.0).take()
    }
}

/// State shared by every worker loop of one run.
#[derive(Debug)]
pub struct RunContext {
    pub target: String,
    pub queue: Arc<JobQueue>,
    pub policy: RateLimitPolicy,
    pub cancel: CancellationToken,
    pub stats: Arc<RunStats>,
}

/// One worker's consumption loop for a single run.
pub struct WorkerLoop<C: Connection> {
    key: String,
    connection: Arc<C>,
    state: Arc<watch::Sender<WorkerState>>,
    cooldown: Cooldown,
    held: HeldJob,
    ctx: Arc<RunContext>,
}

impl<C: Connection> WorkerLoop<C> {
    pub fn new(
        key: impl Into<String>,
        connection: Arc<C>,
        state: Arc<watch::Sender<WorkerState>>,
        ctx: Arc<RunContext>,
    ) -> Self {
        Self {
            key: key.into(),
            connection,
            state,
            cooldown: Cooldown::new(),
            held: HeldJob::default(),
            ctx,
        }
    }

    /// Share a cooldown that outlives this run.
    pub fn with_cooldown(mut self, cooldown: Cooldown) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Handle to the job this loop is currently attempting.
    pub fn held_job(&self) -> HeldJob {
        self.held.clone()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }

    /// Drain the run's queue until it is empty or the run is cancelled.
    pub async fn run<WR: WorkerReporter>(&self, reporter: &WR) -> WorkerExit {
        reporter.report(WorkerEvent::Started {
            worker_key: &self.key,
        });

        let exit = self.drive(reporter).await;

        self.set_state(WorkerState::Done);
        reporter.report(WorkerEvent::Stopped {
            worker_key: &self.key,
            exit,
        });
        exit
    }

    async fn drive<WR: WorkerReporter>(&self, reporter: &WR) -> WorkerExit {
        let remaining = self.cooldown.remaining();
        if !remaining.is_zero() {
            self.set_state(WorkerState::CoolingDown);
            reporter.report(WorkerEvent::CooldownPending {
                worker_key: &self.key,
                remaining,
            });
            if !self.pause(remaining).await {
                return WorkerExit::Cancelled;
            }
        }

        self.set_state(WorkerState::ResolvingTarget);
        let target = match self.connection.resolve_target(&self.ctx.target).await {
            Ok(target) => target,
            Err(error) => {
                reporter.report(WorkerEvent::TargetUnresolved {
                    worker_key: &self.key,
                    target: &self.ctx.target,
                    error: &error,
                });
                return WorkerExit::TargetUnresolved;
            }
        };
        reporter.report(WorkerEvent::TargetResolved {
            worker_key: &self.key,
            target: &self.ctx.target,
        });

        self.set_state(WorkerState::Draining);
        loop {
            if self.ctx.cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }
            let Some(job) = self.ctx.queue.try_take() else {
                return WorkerExit::Drained;
            };
            self.held.hold(&job);

            let outcome = self.attempt(&target, &job).await;
            let decision = self.ctx.policy.decide(&outcome);
            self.ctx.stats.record(&outcome, decision.disposition);
            reporter.report(WorkerEvent::JobFinished {
                worker_key: &self.key,
                job: &job,
                outcome: &outcome,
                decision: &decision,
            });
            self.held.release();
            self.ctx.queue.task_done();

            if decision.disposition.drops_job() {
                self.cooldown.extend(decision.wait);
                self.set_state(WorkerState::CoolingDown);
            }
            let resumed = self.pause(decision.wait).await;
            self.set_state(WorkerState::Draining);
            if !resumed {
                return WorkerExit::Cancelled;
            }
        }
    }

    /// One add attempt with this worker's own connection.
    async fn attempt(&self, target: &C::Target, job: &Job) -> Outcome {
        let identity = match self.connection.resolve_identity(&job.identity).await {
            Ok(identity) => identity,
            Err(error) => return error.into(),
        };
        self.connection.invite(target, &identity).await.into()
    }

    /// Sleep for `wait`, waking early on cancellation. Returns false if the
    /// run was cancelled.
    async fn pause(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            tokio::task::yield_now().await;
            return !self.ctx.cancel.is_cancelled();
        }
        tokio::select! {
            () = tokio::time::sleep(wait) => true,
            () = self.ctx.cancel.cancelled() => false,
        }
    }
}
