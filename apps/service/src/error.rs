use thiserror::Error;

use crate::monitoring::types::TargetId;

/// A target was rejected before it could reach the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("target URL cannot be empty")]
    EmptyUrl,

    #[error("URL must include scheme (http:// or https://)")]
    MissingScheme,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid scheme '{0}', must be http or https")]
    UnsupportedScheme(String),

    #[error("URL must have a valid host")]
    MissingHost,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unsupported interval of {0} seconds, expected 10, 30 or 60")]
    UnsupportedInterval(u64),

    #[error("unknown interval '{0}', expected TEN, THIRTY or SIXTY")]
    UnknownInterval(String),

    #[error("unknown status '{0}', expected ACTIVE or PAUSED")]
    UnknownStatus(String),

    #[error("userId must be positive, got {0}")]
    InvalidUserId(i64),
}

/// Failure reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database query failed: {0}")]
    Query(#[from] libsql::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Corrupt(err.to_string())
    }
}

/// Errors surfaced by lifecycle operations on the job registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("monitoring is already running for {0}")]
    AlreadyRunning(TargetId),

    #[error("monitoring is not paused for {0}")]
    NotPaused(TargetId),

    #[error("website monitoring is not running for URL: {0}")]
    NotRunning(TargetId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// The schedule was torn down but deleting persisted state failed.
    #[error("failed to stop monitoring for {target}: {source}")]
    SchedulerStopFailure {
        target: TargetId,
        #[source]
        source: PersistenceError,
    },
}
