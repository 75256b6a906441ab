use thiserror::Error;

/// Application-wide error types for enlist.
#[derive(Error, Debug)]
pub enum AppError {
    /// A run is already processing; the new run was not admitted.
    #[error("A run is already processing")]
    AlreadyRunning,

    /// No workers are registered, so a run cannot start.
    #[error("No authenticated workers available")]
    NoWorkers,

    /// No worker is registered under the given account key.
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// The job queue for this run was already filled.
    #[error("Job queue already filled for this run")]
    QueueAlreadyFilled,

    /// A job record could not be turned into a job.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The remote provider rejected or failed a request.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// HTTP transport to the provider gateway failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true for errors that reject a run at admission time.
    pub fn is_admission_error(&self) -> bool {
        matches!(self, AppError::AlreadyRunning | AppError::NoWorkers)
    }
}

/// Classified failure of a single provider call.
///
/// The set is closed: every response the gateway can produce maps onto one
/// of these variants, and the rate-limit policy matches them exhaustively.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Account-level flood signal with no explicit retry time.
    #[error("account hit the flood limit")]
    PeerFlood,

    /// Explicit throttle: wait exactly `seconds` before the next request.
    #[error("flood wait of {seconds}s requested")]
    FloodWait { seconds: u64 },

    /// The identity's privacy settings prevent adding it.
    #[error("identity has privacy restrictions")]
    PrivacyRestricted,

    /// The identity or target does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else the provider or transport reported.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Returns true if the provider asked this account to slow down.
    pub fn is_throttle(&self) -> bool {
        matches!(
            self,
            ProviderError::PeerFlood | ProviderError::FloodWait { .. }
        )
    }
}
