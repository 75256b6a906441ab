use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::AppError;
use crate::job::Job;

/// In-memory FIFO shared by every worker loop of a run.
///
/// `try_take` pops under a mutex, so a job is handed to exactly one taker.
/// Jobs are never re-inserted once taken. Each take is matched by a
/// `task_done` call; [`join`](Self::join) resolves once the queue is empty and
/// every taken job has been acknowledged.
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    filled: AtomicBool,
    drained: Notify,
}

#[derive(Debug, Default)]
struct QueueInner {
    jobs: VecDeque<Job>,
    in_flight: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job queue mutex");
            poisoned.into_inner()
        })
    }

    /// Populate the queue for a run. Allowed once per queue.
    ///
    /// Jobs whose identity already appeared earlier in `jobs` are skipped.
    /// Returns the number of jobs enqueued.
    pub fn fill(&self, jobs: impl IntoIterator<Item = Job>) -> Result<usize, AppError> {
        if self.filled.swap(true, Ordering::SeqCst) {
            return Err(AppError::QueueAlreadyFilled);
        }

        let mut seen = HashSet::new();
        let mut inner = self.lock_inner();
        for job in jobs {
            if seen.insert(job.identity.clone()) {
                inner.jobs.push_back(job);
            } else {
                tracing::debug!(identity = %job.identity, "Skipping duplicate job");
            }
        }
        Ok(inner.jobs.len())
    }

    /// Take the next job without waiting. `None` means the queue is empty.
    pub fn try_take(&self) -> Option<Job> {
        let mut inner = self.lock_inner();
        let job = inner.jobs.pop_front()?;
        inner.in_flight += 1;
        Some(job)
    }

    /// Acknowledge a job previously returned by `try_take`.
    pub fn task_done(&self) {
        let mut inner = self.lock_inner();
        if inner.in_flight == 0 {
            tracing::warn!("task_done called with no job in flight");
            return;
        }
        inner.in_flight -= 1;
        if inner.in_flight == 0 && inner.jobs.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Jobs still waiting to be taken.
    pub fn len(&self) -> usize {
        self.lock_inner().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().jobs.is_empty()
    }

    /// Jobs taken but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.lock_inner().in_flight
    }

    /// Wait until every job has been taken and acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.lock_inner();
                if inner.jobs.is_empty() && inner.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }
}
