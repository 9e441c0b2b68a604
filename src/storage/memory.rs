//! In-memory storage implementation for testing and simple use cases.
//!
//! Jobs are kept as encoded records, exactly as [`RedisQueue`](super::RedisQueue)
//! stores them, so every push/pop goes through the same serialization path.

use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Queue, QueueStats};
use crate::error::StorageError;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::record::{decode, delay_key, encode};
use crate::scheduler::{Job, Task};

#[derive(Debug, Default)]
struct Partitions {
    ready: VecDeque<String>,
    delayed: BTreeMap<i64, VecDeque<String>>,
}

impl Partitions {
    /// Moves every delayed record keyed at or before `now_key` to the ready tail.
    fn migrate(&mut self, now_key: i64) -> usize {
        let later = match now_key.checked_add(1) {
            Some(bound) => self.delayed.split_off(&bound),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.delayed, later);

        let mut moved = 0;
        for (_, records) in due {
            moved += records.len();
            self.ready.extend(records);
        }
        moved
    }

    fn delayed_len(&self) -> usize {
        self.delayed.values().map(VecDeque::len).sum()
    }
}

/// In-memory job storage.
///
/// Cloning creates a new handle to the **same** underlying partitions.
pub struct MemoryQueue<T> {
    partitions: Arc<Mutex<Partitions>>,
    clock: Arc<dyn Clock>,
    _task: PhantomData<fn() -> T>,
}

impl<T> Clone for MemoryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            partitions: Arc::clone(&self.partitions),
            clock: Arc::clone(&self.clock),
            _task: PhantomData,
        }
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MemoryQueue<T> {
    /// Creates an empty queue driven by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty queue that reads "now" from `clock` when migrating.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: Arc::new(Mutex::new(Partitions::default())),
            clock,
            _task: PhantomData,
        }
    }

    /// Get the number of jobs in both partitions.
    #[must_use = "this returns the count, it doesn't modify the queue"]
    pub async fn len(&self) -> usize {
        let partitions = self.partitions.lock().await;
        partitions.ready.len() + partitions.delayed_len()
    }

    /// Check if both partitions are empty.
    #[must_use = "this returns a boolean, it doesn't modify the queue"]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<T: Task> Queue<T> for MemoryQueue<T> {
    async fn pop(&self) -> Result<Option<Job<T>>, StorageError> {
        let now_key = self.clock.now().timestamp();

        let record = {
            let mut partitions = self.partitions.lock().await;
            partitions.migrate(now_key);
            partitions.ready.pop_front()
        };

        record.map(|data| decode(&data)).transpose()
    }

    async fn push(&self, job: &Job<T>) -> Result<(), StorageError> {
        let data = encode(job)?;
        let due = job.is_time_to_run_at(self.clock.now());

        let mut partitions = self.partitions.lock().await;
        if due {
            partitions.ready.push_back(data);
        } else {
            partitions
                .delayed
                .entry(delay_key(job))
                .or_default()
                .push_back(data);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, StorageError> {
        let partitions = self.partitions.lock().await;
        Ok(QueueStats {
            ready: partitions.ready.len(),
            delayed: partitions.delayed_len(),
        })
    }
}
