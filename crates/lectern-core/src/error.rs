//! Error types for the lectern job engine.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using lectern's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lectern operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found in the ledger
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// A control command is not valid from the job's current status
    #[error("Cannot {action} job in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },

    /// Job is already executing in this process
    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Work-unit collection failed or produced nothing usable
    #[error("Collection error: {0}")]
    Collection(String),

    /// Planner failed or returned an inconsistent plan
    #[error("Planning error: {0}")]
    Planning(String),

    /// Generator failed or returned invalid items
    #[error("Generation error: {0}")]
    Generation(String),

    /// Inference backend call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Transient inference failure (rate limit, 5xx, timeout); safe to retry
    #[error("Transient inference error: {0}")]
    Transient(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Network-level request failures, explicit transient inference errors
    /// and pool timeouts qualify; validation and configuration errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) | Error::Request(_) => true,
            Error::Database(e) => matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Transient(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
