use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::policy::{Disposition, Outcome};

/// Per-run counters, updated by every worker loop of the run.
#[derive(Debug, Default)]
pub struct RunStats {
    taken: AtomicU64,
    added: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome, disposition: Disposition) {
        self.taken.fetch_add(1, Ordering::Relaxed);
        let counter = match (disposition, outcome) {
            (Disposition::Success, _) => &self.added,
            (Disposition::RetryAfter(_) | Disposition::AbortWorker, _) => &self.dropped,
            (Disposition::Skip, Outcome::Failed(_)) => &self.failed,
            (Disposition::Skip, _) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunStatsSnapshot {
        RunStatsSnapshot {
            taken: self.taken.load(Ordering::Relaxed),
            added: self.added.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatsSnapshot {
    pub taken: u64,
    pub added: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl RunStatsSnapshot {
    /// Share of taken jobs that were added, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.taken == 0 {
            0.0
        } else {
            self.added as f64 * 100.0 / self.taken as f64
        }
    }
}
