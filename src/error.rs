//! Error taxonomy for the topology synchronization engine
//!
//! Fetch failures are classified once, inside the data source, and travel
//! upward unchanged. Configuration errors are raised at setup time and are
//! never retried.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Umbrella error for everything the engine can surface to its owner
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl SyncError {
    /// The underlying fetch failure, if this error came from a refresh cycle
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            SyncError::Fetch(e) => Some(e),
            SyncError::Scheduler(SchedulerError::TickFailed(inner)) => inner.as_fetch(),
            _ => None,
        }
    }
}

/// A snapshot fetch that exhausted its retry budget
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Snapshot request timed out after {attempts} attempt(s); last timeout was {last_timeout:?}")]
    TimeoutExceeded {
        attempts: u32,
        last_timeout: Duration,
    },

    #[error("Snapshot payload is invalid after {attempts} attempt(s): {message}")]
    InvalidPayload { attempts: u32, message: String },

    #[error("Snapshot transport failed after {attempts} attempt(s): {message}")]
    TransportError { attempts: u32, message: String },
}

impl FetchError {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::TimeoutExceeded { attempts, .. }
            | FetchError::InvalidPayload { attempts, .. }
            | FetchError::TransportError { attempts, .. } => *attempts,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::TimeoutExceeded { .. } => FailureKind::Timeout,
            FetchError::InvalidPayload { .. } => FailureKind::Data,
            FetchError::TransportError { .. } => FailureKind::Transport,
        }
    }
}

/// Classification of a single failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Request exceeded its per-attempt timeout and was cancelled
    Timeout,
    /// Request completed but the payload was malformed
    Data,
    /// Connection-level or HTTP-level failure
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Data => "data",
            FailureKind::Transport => "transport",
        }
    }
}

/// Setup-time configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Retry budget {requested} exceeds the maximum of {max}")]
    RetryBudget { requested: u32, max: u32 },

    #[error("Polling interval must be greater than zero")]
    ZeroInterval,

    #[error("Fetch timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Unknown refresh rate '{0}' (expected low, medium, high, or milliseconds)")]
    UnknownRefreshRate(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Scheduler lifecycle errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Refresh cycle failed: {0}")]
    TickFailed(#[source] Arc<SyncError>),

    #[error("Scheduler task ended abnormally: {0}")]
    TaskAborted(String),
}

impl From<FetchError> for SchedulerError {
    fn from(error: FetchError) -> Self {
        SchedulerError::TickFailed(Arc::new(SyncError::Fetch(error)))
    }
}
