pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod job_queue;
pub mod policy;
pub mod pool;
pub mod stats;
pub mod traits;
pub mod util;
pub mod worker;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::EngineConfig;
pub use error::{AppError, ProviderError};
pub use events::{Event, EventBus, EventKind, Severity, Subscription};
pub use job::{IdentityRef, Job, MemberRecord, RunStatus, WorkerState};
pub use job_queue::JobQueue;
pub use policy::{Decision, Disposition, Outcome, PolicyConfig, RateLimitPolicy};
pub use pool::{PoolStatus, RunTicket, WorkerPool, WorkerStatus};
pub use stats::{RunStats, RunStatsSnapshot};
pub use traits::Connection;
pub use worker::{
    Cooldown, HeldJob, RunContext, WorkerEvent, WorkerExit, WorkerLoop, WorkerReporter,
};
