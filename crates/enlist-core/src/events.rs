//! Event bus: bounded history plus push-based fan-out to subscribers.
//!
//! Publishing appends to a fixed-capacity ring and sends on a tokio broadcast
//! channel. The broadcast channel never waits for receivers, so a slow
//! subscriber only loses its own backlog and never stalls a worker loop.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default number of retained events.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Default number of retained events replayed to a new subscriber.
pub const DEFAULT_REPLAY_COUNT: usize = 100;

/// Largest history a bus will allocate.
pub const MAX_HISTORY_CAPACITY: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine-readable tag for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkerRegistered,
    WorkerRemoved,
    RunStarted,
    RunStopping,
    RunCompleted,
    WorkerStarted,
    WorkerFailed,
    WorkerFinished,
    JobAdded,
    JobSkipped,
    JobFailed,
    FloodWait,
    Cooldown,
    Message,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::WorkerRegistered => "worker_registered",
            EventKind::WorkerRemoved => "worker_removed",
            EventKind::RunStarted => "run_started",
            EventKind::RunStopping => "run_stopping",
            EventKind::RunCompleted => "run_completed",
            EventKind::WorkerStarted => "worker_started",
            EventKind::WorkerFailed => "worker_failed",
            EventKind::WorkerFinished => "worker_finished",
            EventKind::JobAdded => "job_added",
            EventKind::JobSkipped => "job_skipped",
            EventKind::JobFailed => "job_failed",
            EventKind::FloodWait => "flood_wait",
            EventKind::Cooldown => "cooldown",
            EventKind::Message => "message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub kind: EventKind,
    pub message: String,
    pub worker_key: Option<String>,
}

impl Event {
    pub fn new(severity: Severity, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            kind,
            message: message.into(),
            worker_key: None,
        }
    }

    pub fn info(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, message)
    }

    pub fn warning(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn error(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    pub fn with_worker(mut self, worker_key: impl Into<String>) -> Self {
        self.worker_key = Some(worker_key.into());
        self
    }
}

#[derive(Debug)]
struct BusInner {
    history: Mutex<VecDeque<Event>>,
    tx: broadcast::Sender<Event>,
    capacity: usize,
    replay: usize,
}

/// Cheap-to-clone handle to a shared event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus retaining `capacity` events and replaying the newest
    /// `replay` of them to each new subscriber.
    ///
    /// `capacity` is clamped to `1..=MAX_HISTORY_CAPACITY` and `replay` to at
    /// most `capacity`.
    pub fn new(capacity: usize, replay: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY_CAPACITY);
        let replay = replay.min(capacity);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(BusInner {
                history: Mutex::new(VecDeque::with_capacity(capacity)),
                tx,
                capacity,
                replay,
            }),
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.inner.history.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned event history mutex");
            poisoned.into_inner()
        })
    }

    /// Record an event and push it to live subscribers. Never blocks on them.
    pub fn publish(&self, event: Event) {
        let mut history = self.lock_history();
        if history.len() == self.inner.capacity {
            history.pop_front();
        }
        history.push_back(event.clone());
        // Sent under the history lock so `subscribe` sees each event exactly
        // once: either in its replay slice or on its receiver.
        let _ = self.inner.tx.send(event);
    }

    /// Register a live consumer. It first yields the newest retained events
    /// (at most the configured replay count), then the live feed.
    pub fn subscribe(&self) -> Subscription {
        let history = self.lock_history();
        let skip = history.len().saturating_sub(self.inner.replay);
        let backlog: VecDeque<Event> = history.iter().skip(skip).cloned().collect();
        let rx = self.inner.tx.subscribe();
        drop(history);

        tracing::debug!(replayed = backlog.len(), "New event subscriber");
        Subscription {
            backlog,
            rx: Some(rx),
        }
    }

    /// Retained events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.lock_history().iter().cloned().collect()
    }

    /// The newest `limit` retained events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let history = self.lock_history();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_history().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_COUNT)
    }
}

/// A live event feed. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    backlog: VecDeque<Event>,
    rx: Option<broadcast::Receiver<Event>>,
}

impl Subscription {
    /// Next event: replayed history first, then live events.
    ///
    /// Returns `None` once unsubscribed or when the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged, skipping missed events");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Event> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged, skipping missed events");
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Stop receiving. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.backlog.clear();
        self.rx = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.rx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn numbered(n: usize) -> Event {
        Event::info(EventKind::Message, format!("event {n}"))
    }

    #[test]
    fn kind_names_match_wire_format() {
        for kind in [EventKind::WorkerRegistered, EventKind::FloodWait, EventKind::RunCompleted] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, kind.as_str());
        }
    }

    #[test]
    fn retains_at_most_capacity() {
        let bus = EventBus::new(10, 5);
        for i in 0..25 {
            bus.publish(numbered(i));
        }
        let history = bus.history();
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().unwrap().message, "event 15");
        assert_eq!(history.last().unwrap().message, "event 24");
    }

    #[test]
    fn late_subscriber_gets_only_recent_replay() {
        let bus = EventBus::new(10, 3);
        for i in 0..8 {
            bus.publish(numbered(i));
        }

        let mut sub = bus.subscribe();
        let replayed: Vec<String> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.message)
            .collect();
        assert_eq!(replayed, vec!["event 5", "event 6", "event 7"]);
    }

    #[tokio::test]
    async fn subscriber_receives_live_events_after_replay() {
        let bus = EventBus::new(10, 2);
        bus.publish(numbered(0));
        let mut sub = bus.subscribe();
        bus.publish(numbered(1));

        assert_eq!(sub.recv().await.unwrap().message, "event 0");
        assert_eq!(sub.recv().await.unwrap().message, "event 1");
    }

    #[tokio::test]
    async fn publish_does_not_wait_for_slow_subscriber() {
        let bus = EventBus::new(4, 0);
        let mut slow = bus.subscribe();

        // Far more events than the channel holds; publishing must not block.
        tokio::time::timeout(Duration::from_secs(1), async {
            for i in 0..100 {
                bus.publish(numbered(i));
            }
        })
        .await
        .expect("publish should never block");

        // The lagging subscriber skips ahead and keeps receiving.
        let next = slow.recv().await.unwrap();
        assert!(next.message.starts_with("event 9"), "got {}", next.message);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new(10, 10);
        bus.publish(numbered(0));
        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_subscribed());
        assert_eq!(bus.subscriber_count(), 0);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::default();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn replay_is_clamped_to_capacity() {
        let bus = EventBus::new(3, 50);
        for i in 0..5 {
            bus.publish(numbered(i));
        }
        let mut sub = bus.subscribe();
        let replayed: Vec<Event> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(replayed.len(), 3);
        assert_eq!(bus.recent(2).len(), 2);
        assert_eq!(bus.recent(2)[1].message, "event 4");
    }

    #[test]
    fn event_builders_set_fields() {
        let event = Event::warning(EventKind::FloodWait, "Flood wait: 5s").with_worker("+1555");
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.kind, EventKind::FloodWait);
        assert_eq!(event.worker_key.as_deref(), Some("+1555"));
        assert!(Severity::Error > Severity::Warning);
    }
}
