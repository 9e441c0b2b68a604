//! Error types for jobq operations.
//!
//! Defines the error taxonomy shared by jobs, queues and the worker:
//! - Guard errors: `run()` called on a job whose preconditions do not hold
//! - Handler errors: failures raised by a task's work unit
//! - Storage errors: backing store or serialization failures
//! - Unexpected errors: anything else, caught at the worker iteration boundary
//! - Worker errors: conditions that stop the worker loop itself

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A precondition of [`Job::run`](crate::scheduler::Job::run) was violated.
///
/// Guard errors are caller-contract bugs. They never consume a retry attempt
/// and leave the job untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("job is not due until {scheduled_at}")]
    NotYetDue { scheduled_at: DateTime<Utc> },

    #[error("job has already completed")]
    AlreadyCompleted,

    #[error("job has already failed permanently")]
    AlreadyFailed,
}

/// The task's work unit returned an error.
///
/// Raised after the failure counter (and the schedule, if a retry interval is
/// configured) has been updated on the job.
#[derive(Debug, Error)]
#[error("task failed (failure {failure_count}): {source}")]
pub struct HandlerError {
    /// Failure counter value after this failure was recorded.
    pub failure_count: u32,
    /// Error returned by the task.
    #[source]
    pub source: anyhow::Error,
}

/// Outcome of an unsuccessful [`Job::run`](crate::scheduler::Job::run).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("run precondition failed: {0}")]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Errors that can occur while talking to a backing store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// A job record could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failure outside the known taxonomy, caught so the worker loop survives.
#[derive(Debug, Clone, Error)]
#[error("unexpected error: {message}")]
pub struct UnexpectedError {
    pub message: String,
}

impl UnexpectedError {
    /// Builds an error from a panic payload captured by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self { message }
    }
}

/// Errors that terminate [`Worker::run`](crate::scheduler::Worker::run).
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The store kept failing; a supervisor is expected to restart the process.
    #[error("storage unavailable after {failures} consecutive failures: {last}")]
    StorageUnavailable {
        failures: u32,
        #[source]
        last: StorageError,
    },
}
