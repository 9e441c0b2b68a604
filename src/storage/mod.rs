//! Job storage backends.
//!
//! This module provides:
//! - [`Queue`] trait - the pop/push contract every backing store implements
//! - [`RedisQueue`] - Redis store shared by any number of worker processes
//! - [`MemoryQueue`] - In-process store for tests and single-process use
//!
//! # Partitions
//!
//! Every store keeps two partitions:
//!
//! - **ready**: FIFO of jobs eligible to run now
//! - **delayed**: jobs keyed by their scheduled epoch second
//!
//! `push` routes a job by [`Job::is_time_to_run`]. `pop` first migrates every
//! delayed job whose key is at or before the current second into the ready
//! tail, then takes the ready head, so a due job is never missed just
//! because it was parked in the delayed partition.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::scheduler::{Job, Task};

pub mod memory;
pub mod redis_queue;

pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;

/// Pop/push contract over job storage.
///
/// Implementations must be safe to share between tasks, and each call must be
/// atomic with respect to other callers of the same store.
#[async_trait]
pub trait Queue<T: Task>: Send + Sync {
    /// Removes and returns the next ready job, or `None` if nothing is ready.
    ///
    /// Never waits. Due delayed jobs are migrated to ready before popping.
    async fn pop(&self) -> Result<Option<Job<T>>, StorageError>;

    /// Stores a job: ready tail if it is due, delayed partition otherwise.
    async fn push(&self, job: &Job<T>) -> Result<(), StorageError>;

    /// Returns the size of both partitions.
    async fn stats(&self) -> Result<QueueStats, StorageError>;
}

#[async_trait]
impl<T, Q> Queue<T> for Arc<Q>
where
    T: Task,
    Q: Queue<T> + ?Sized,
{
    async fn pop(&self) -> Result<Option<Job<T>>, StorageError> {
        self.as_ref().pop().await
    }

    async fn push(&self, job: &Job<T>) -> Result<(), StorageError> {
        self.as_ref().push(job).await
    }

    async fn stats(&self) -> Result<QueueStats, StorageError> {
        self.as_ref().stats().await
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of jobs eligible to run now.
    pub ready: usize,
    /// Number of jobs waiting for their scheduled time.
    pub delayed: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in both partitions.
    pub fn total(&self) -> usize {
        self.ready + self.delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_stats_total() {
        let stats = QueueStats {
            ready: 10,
            delayed: 5,
        };
        assert_eq!(stats.total(), 15);
        assert_eq!(QueueStats::default().total(), 0);
    }

    #[test]
    fn test_queue_stats_serialization() {
        let stats = QueueStats {
            ready: 3,
            delayed: 1,
        };
        let json = serde_json::to_value(stats).expect("serialization should work");
        assert_eq!(json["ready"], 3);
        assert_eq!(json["delayed"], 1);
    }
}
