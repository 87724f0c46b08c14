//! Error types for CCBuilder.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using CCBuilder's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for CCBuilder operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (non-connectivity sqlx errors)
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// The persistence store could not be reached
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimisation job not found
    #[error("Optimisation job not found: {0}")]
    JobNotFound(Uuid),

    /// A job status change not permitted by the state machine
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Result requested for a job that has not completed
    #[error("Optimisation job {id} is not complete (status: {status})")]
    JobNotComplete { id: Uuid, status: JobStatus },

    /// The external modeling engine failed for this request
    #[error("Optimisation failure: {0}")]
    Optimization(String),

    /// Scheduler bookkeeping error (queue, assignment table)
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the operation may succeed if retried against the same store.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PersistenceUnavailable(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Error::PersistenceUnavailable(e.to_string()),
            other => Error::Database(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
