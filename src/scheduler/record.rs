//! Serialized form of a job.
//!
//! Jobs are stored as JSON records with an explicit schema version:
//!
//! ```json
//! {
//!   "version": "v1",
//!   "id": "6f1c...",
//!   "completed": false,
//!   "failure_count": 1,
//!   "max_failures": 2,
//!   "created_at": "2024-01-01T00:00:00.123456789Z",
//!   "scheduled_at": "2024-01-01T00:00:03.100Z",
//!   "retry_interval": { "secs": 2, "nanos": 0 },
//!   "task": { "type": "log", "message": "hello" }
//! }
//! ```
//!
//! The task payload is whatever tagged enum the caller registered as its
//! [`Task`] type. A record with an unknown `version` fails to decode instead of
//! being misread.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobState, Task};
use crate::error::StorageError;

/// Versioned envelope for stored jobs.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum JobRecord<T> {
    #[serde(rename = "v1")]
    V1(JobRecordV1<T>),
}

/// Version 1 of the job record schema.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobRecordV1<T> {
    pub id: Uuid,
    pub completed: bool,
    pub failure_count: u32,
    pub max_failures: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub retry_interval: Option<Duration>,
    pub task: T,
}

impl<T: Clone> From<&Job<T>> for JobRecord<T> {
    fn from(job: &Job<T>) -> Self {
        JobRecord::V1(JobRecordV1 {
            id: job.id,
            completed: job.state.completed,
            failure_count: job.state.failure_count,
            max_failures: job.state.max_failures,
            created_at: job.state.created_at,
            scheduled_at: job.state.scheduled_at,
            retry_interval: job.state.retry_interval,
            task: job.task.clone(),
        })
    }
}

impl<T> From<JobRecord<T>> for Job<T> {
    fn from(record: JobRecord<T>) -> Self {
        match record {
            JobRecord::V1(r) => Job {
                id: r.id,
                state: JobState {
                    completed: r.completed,
                    failure_count: r.failure_count,
                    max_failures: r.max_failures,
                    created_at: r.created_at,
                    scheduled_at: r.scheduled_at,
                    retry_interval: r.retry_interval,
                },
                task: r.task,
            },
        }
    }
}

/// Borrowing view used for encoding, so pushing a job never clones its task.
#[derive(Serialize)]
#[serde(tag = "version")]
enum JobRecordRef<'a, T> {
    #[serde(rename = "v1")]
    V1 {
        id: Uuid,
        completed: bool,
        failure_count: u32,
        max_failures: Option<u32>,
        created_at: DateTime<Utc>,
        scheduled_at: Option<DateTime<Utc>>,
        retry_interval: Option<Duration>,
        task: &'a T,
    },
}

/// Encodes a job as a JSON record.
pub fn encode<T: Task>(job: &Job<T>) -> Result<String, StorageError> {
    let record = JobRecordRef::V1 {
        id: job.id,
        completed: job.state.completed,
        failure_count: job.state.failure_count,
        max_failures: job.state.max_failures,
        created_at: job.state.created_at,
        scheduled_at: job.state.scheduled_at,
        retry_interval: job.state.retry_interval,
        task: &job.task,
    };
    Ok(serde_json::to_string(&record)?)
}

/// Decodes a JSON record back into a job.
pub fn decode<T: Task>(data: &str) -> Result<Job<T>, StorageError> {
    let record: JobRecord<T> = serde_json::from_str(data)?;
    Ok(record.into())
}

/// Key of a job in the delayed partition: its scheduled time rounded up to
/// whole epoch seconds.
///
/// Rounding up means a job never migrates before it is due when the cutoff
/// is `floor(now)`. Jobs without a schedule key to the epoch start, so they
/// migrate on the next pop.
pub fn delay_key<T>(job: &Job<T>) -> i64 {
    job.state.scheduled_at.map_or(0, |at| {
        let secs = at.timestamp();
        if at.timestamp_subsec_nanos() > 0 {
            secs.saturating_add(1)
        } else {
            secs
        }
    })
}
