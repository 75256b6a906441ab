use std::time::Duration;

use crate::error::AppError;
use crate::events::{DEFAULT_HISTORY_CAPACITY, DEFAULT_REPLAY_COUNT, MAX_HISTORY_CAPACITY};
use crate::policy::PolicyConfig;

/// Engine configuration: policy delays and event retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub policy: PolicyConfig,

    /// Number of events the bus retains.
    pub event_history: usize,

    /// Number of retained events replayed to a new subscriber.
    pub event_replay: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            event_history: DEFAULT_HISTORY_CAPACITY,
            event_replay: DEFAULT_REPLAY_COUNT,
        }
    }
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// - `ENLIST_PACING_DELAY_SECS` (optional, defaults to 15)
    /// - `ENLIST_FLOOD_COOLDOWN_SECS` (optional, defaults to 300)
    /// - `ENLIST_EVENT_HISTORY` (optional, defaults to 1000, between 1 and 1_000_000)
    /// - `ENLIST_EVENT_REPLAY` (optional, defaults to 100, at most the history)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let pacing_delay = match lookup("ENLIST_PACING_DELAY_SECS") {
            None => defaults.policy.pacing_delay,
            Some(raw) => Duration::from_secs(parse_u64("ENLIST_PACING_DELAY_SECS", &raw)?),
        };
        let flood_cooldown = match lookup("ENLIST_FLOOD_COOLDOWN_SECS") {
            None => defaults.policy.flood_cooldown,
            Some(raw) => Duration::from_secs(parse_u64("ENLIST_FLOOD_COOLDOWN_SECS", &raw)?),
        };
        let event_history = match lookup("ENLIST_EVENT_HISTORY") {
            None => defaults.event_history,
            Some(raw) => {
                let parsed = parse_u64("ENLIST_EVENT_HISTORY", &raw)?;
                if parsed == 0 || parsed > MAX_HISTORY_CAPACITY as u64 {
                    return Err(AppError::ConfigError(format!(
                        "ENLIST_EVENT_HISTORY must be between 1 and {MAX_HISTORY_CAPACITY}, got {parsed}"
                    )));
                }
                parsed as usize
            }
        };
        let event_replay = match lookup("ENLIST_EVENT_REPLAY") {
            None => defaults.event_replay.min(event_history),
            Some(raw) => {
                let parsed = parse_u64("ENLIST_EVENT_REPLAY", &raw)? as usize;
                if parsed > event_history {
                    return Err(AppError::ConfigError(format!(
                        "ENLIST_EVENT_REPLAY ({parsed}) must not exceed ENLIST_EVENT_HISTORY ({event_history})"
                    )));
                }
                parsed
            }
        };

        Ok(Self {
            policy: PolicyConfig::new(pacing_delay, flood_cooldown),
            event_history,
            event_replay,
        })
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.policy.pacing_delay = delay;
        self
    }

    pub fn with_flood_cooldown(mut self, cooldown: Duration) -> Self {
        self.policy.flood_cooldown = cooldown;
        self
    }

    pub fn with_event_retention(mut self, history: usize, replay: usize) -> Self {
        self.event_history = history.clamp(1, MAX_HISTORY_CAPACITY);
        self.event_replay = replay.min(self.event_history);
        self
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, AppError> {
    raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a non-negative integer"
        ))
    })
}
