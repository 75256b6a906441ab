//! Rate-limit policy: maps the outcome of one add attempt to a decision.
//!
//! ```text
//! Added              -> Success      wait = pacing delay
//! PeerFlood          -> AbortWorker  wait = flood cooldown
//! FloodWait(N)       -> RetryAfter   wait = N seconds, verbatim
//! PrivacyRestricted  -> Skip         wait = pacing delay
//! NotFound           -> Skip         wait = pacing delay
//! Failed             -> Skip         wait = pacing delay
//! ```
//!
//! The policy holds only configuration; [`RateLimitPolicy::decide`] has no
//! side effects. Applying the wait is the worker loop's job.

use std::time::Duration;

use serde::Serialize;

use crate::error::ProviderError;

/// Outcome of a single add attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Added,
    PeerFlood,
    FloodWait { seconds: u64 },
    PrivacyRestricted,
    NotFound,
    Failed(String),
}

impl From<ProviderError> for Outcome {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::PeerFlood => Outcome::PeerFlood,
            ProviderError::FloodWait { seconds } => Outcome::FloodWait { seconds },
            ProviderError::PrivacyRestricted => Outcome::PrivacyRestricted,
            ProviderError::NotFound(_) => Outcome::NotFound,
            ProviderError::Other(message) => Outcome::Failed(message),
        }
    }
}

impl From<Result<(), ProviderError>> for Outcome {
    fn from(result: Result<(), ProviderError>) -> Self {
        match result {
            Ok(()) => Outcome::Added,
            Err(err) => err.into(),
        }
    }
}

/// What happens to the worker after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "disposition", content = "seconds")]
pub enum Disposition {
    Success,
    RetryAfter(u64),
    Skip,
    AbortWorker,
}

impl Disposition {
    /// The triggering job is dropped for this run rather than completed or
    /// skipped on its own merits.
    pub fn drops_job(&self) -> bool {
        matches!(self, Disposition::RetryAfter(_) | Disposition::AbortWorker)
    }
}

/// Result of evaluating one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub disposition: Disposition,
    pub wait: Duration,
}

/// Tunable delays for the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Applied after every attempt that does not pause the worker.
    pub pacing_delay: Duration,

    /// Applied when the provider signals account-level flooding.
    pub flood_cooldown: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            pacing_delay: Duration::from_secs(15),
            flood_cooldown: Duration::from_secs(300),
        }
    }
}

impl PolicyConfig {
    pub fn new(pacing_delay: Duration, flood_cooldown: Duration) -> Self {
        Self {
            pacing_delay,
            flood_cooldown,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    config: PolicyConfig,
}

impl RateLimitPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn decide(&self, outcome: &Outcome) -> Decision {
        let pacing = self.config.pacing_delay;
        match outcome {
            Outcome::Added => Decision {
                disposition: Disposition::Success,
                wait: pacing,
            },
            Outcome::PeerFlood => Decision {
                disposition: Disposition::AbortWorker,
                wait: self.config.flood_cooldown,
            },
            Outcome::FloodWait { seconds } => Decision {
                disposition: Disposition::RetryAfter(*seconds),
                wait: Duration::from_secs(*seconds),
            },
            Outcome::PrivacyRestricted | Outcome::NotFound | Outcome::Failed(_) => Decision {
                disposition: Disposition::Skip,
                wait: pacing,
            },
        }
    }
}
