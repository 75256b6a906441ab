//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ProviderError;
use crate::job::{IdentityRef, Job};
use crate::traits::Connection;
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockConnection
// ---------------------------------------------------------------------------

/// One recorded invite attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub identity: IdentityRef,
    pub at: Instant,
}

/// Mock provider connection with scripted invite results.
///
/// Each `invite` call pops the next scripted result; once the script is
/// exhausted every invite succeeds.
#[derive(Clone, Default)]
pub struct MockConnection {
    outcomes: Arc<Mutex<VecDeque<Result<(), ProviderError>>>>,
    target_error: Arc<Mutex<Option<ProviderError>>>,
    identity_errors: Arc<Mutex<HashMap<IdentityRef, ProviderError>>>,
    latency: Duration,
    panic_on_invite: bool,
    panic_on_resolve: bool,
    attempts: Arc<Mutex<Vec<Attempt>>>,
    invited: Arc<Mutex<Vec<IdentityRef>>>,
    disconnected: Arc<AtomicBool>,
}

impl MockConnection {
    /// Connection whose invites always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), ProviderError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            ..Self::default()
        }
    }

    pub fn with_target_error(self, error: ProviderError) -> Self {
        *self.target_error.lock().unwrap() = Some(error);
        self
    }

    pub fn with_identity_error(self, identity: IdentityRef, error: ProviderError) -> Self {
        self.identity_errors.lock().unwrap().insert(identity, error);
        self
    }

    /// Simulated round-trip time of every invite.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every invite panic, as a broken connection library might.
    pub fn panicking(mut self) -> Self {
        self.panic_on_invite = true;
        self
    }

    /// Make target resolution panic, before any job is taken.
    pub fn panicking_on_resolve(mut self) -> Self {
        self.panic_on_resolve = true;
        self
    }

    /// Identities that were invited successfully, in order.
    pub fn invited(&self) -> Vec<IdentityRef> {
        self.invited.lock().unwrap().clone()
    }

    /// Every invite attempt, successful or not, in order.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    type Target = String;
    type Identity = IdentityRef;

    async fn resolve_target(&self, name: &str) -> Result<String, ProviderError> {
        if self.panic_on_resolve {
            panic!("mock connection panicked while resolving {name}");
        }
        let err = self.target_error.lock().unwrap().clone();
        match err {
            Some(e) => Err(e),
            None => Ok(name.to_string()),
        }
    }

    async fn resolve_identity(&self, identity: &IdentityRef) -> Result<IdentityRef, ProviderError> {
        let err = self.identity_errors.lock().unwrap().get(identity).cloned();
        match err {
            Some(e) => Err(e),
            None => Ok(identity.clone()),
        }
    }

    async fn invite(&self, _target: &String, identity: &IdentityRef) -> Result<(), ProviderError> {
        if self.panic_on_invite {
            panic!("mock connection panicked while inviting {identity}");
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.attempts.lock().unwrap().push(Attempt {
            identity: identity.clone(),
            at: Instant::now(),
        });
        let result = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            self.invited.lock().unwrap().push(identity.clone());
        }
        result
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::TargetResolved { .. } => "TargetResolved",
            WorkerEvent::CooldownPending { .. } => "CooldownPending",
            WorkerEvent::TargetUnresolved { .. } => "TargetUnresolved",
            WorkerEvent::JobFinished { .. } => "JobFinished",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Jobs `@member1` .. `@memberN`.
pub fn make_jobs(n: usize) -> Vec<Job> {
    (1..=n)
        .map(|i| Job::username(format!("member{i}")).with_display_name(format!("Member {i}")))
        .collect()
}
