//! Redis-based job queue shared by any number of worker processes.
//!
//! # Queue Structure
//!
//! The queue uses two Redis keys:
//!
//! - `{queue_name}`: list of ready job records (RPUSH to the tail, LPOP from the head)
//! - `{queue_name}:delayed`: sorted set of delayed job records, scored by
//!   scheduled epoch second (rounded up)
//!
//! # Reliability
//!
//! Migration of due jobs from the sorted set to the list runs as a single Lua
//! script, so it is atomic with respect to pushes and pops from other
//! processes: a job is never stranded in both partitions or dropped between
//! them. There is no processing list or acknowledgment; a worker that crashes
//! between `pop` and re-`push` loses the job it held.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{Queue, QueueStats};
use crate::error::StorageError;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::record::{decode, delay_key, encode};
use crate::scheduler::{Job, Task};

/// Moves delayed members with score <= ARGV[1] to the tail of the ready list.
///
/// KEYS[1] = ready list, KEYS[2] = delayed sorted set. Returns the number moved.
const MIGRATE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, record in ipairs(due) do
    redis.call('RPUSH', KEYS[1], record)
end
if #due > 0 then
    redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
end
return #due
"#;

/// Redis-backed implementation of [`Queue`].
pub struct RedisQueue<T> {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the ready list.
    queue_name: String,
    /// Name of the delayed sorted set.
    delayed_key: String,
    migrate: Script,
    clock: Arc<dyn Clock>,
    _task: PhantomData<fn() -> T>,
}

impl<T> Clone for RedisQueue<T> {
    fn clone(&self) -> Self {
        Self {
            redis: self.redis.clone(),
            queue_name: self.queue_name.clone(),
            delayed_key: self.delayed_key.clone(),
            migrate: self.migrate.clone(),
            clock: Arc::clone(&self.clock),
            _task: PhantomData,
        }
    }
}

impl<T> RedisQueue<T> {
    /// Connects to Redis and creates a new job queue.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `queue_name` - Name of the queue (used as prefix for Redis keys)
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a queue from an existing ConnectionManager.
    ///
    /// Useful when sharing a connection across multiple components.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let (queue_name, delayed_key) = key_names(queue_name);
        Self {
            redis,
            queue_name,
            delayed_key,
            migrate: Script::new(MIGRATE_SCRIPT),
            clock: Arc::new(SystemClock),
            _task: PhantomData,
        }
    }

    /// Replaces the clock used to pick the migration cutoff and to route pushes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Moves every delayed job whose scheduled second has arrived to the ready tail.
    ///
    /// Called by `pop`; exposed for administrative tooling.
    pub async fn migrate_due(&self) -> Result<usize, StorageError> {
        let mut conn = self.redis.clone();
        let cutoff = self.clock.now().timestamp();

        let moved: usize = self
            .migrate
            .key(&self.queue_name)
            .key(&self.delayed_key)
            .arg(cutoff)
            .invoke_async(&mut conn)
            .await?;

        Ok(moved)
    }

    /// Deletes both partitions.
    ///
    /// **Warning**: This permanently deletes all jobs. Use with caution.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().del(&self.queue_name).del(&self.delayed_key);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Returns the ready list key.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Returns the delayed sorted set key.
    pub fn delayed_key(&self) -> &str {
        &self.delayed_key
    }
}

#[async_trait]
impl<T: Task> Queue<T> for RedisQueue<T> {
    async fn pop(&self) -> Result<Option<Job<T>>, StorageError> {
        self.migrate_due().await?;

        let mut conn = self.redis.clone();
        let data: Option<String> = conn.lpop(&self.queue_name, None).await?;

        data.map(|d| decode(&d)).transpose()
    }

    async fn push(&self, job: &Job<T>) -> Result<(), StorageError> {
        let serialized = encode(job)?;
        let mut conn = self.redis.clone();

        if job.is_time_to_run_at(self.clock.now()) {
            conn.rpush::<_, _, ()>(&self.queue_name, serialized).await?;
        } else {
            redis::cmd("ZADD")
                .arg(&self.delayed_key)
                .arg(delay_key(job))
                .arg(serialized)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut conn = self.redis.clone();

        let (ready, delayed): (usize, usize) = redis::pipe()
            .llen(&self.queue_name)
            .zcard(&self.delayed_key)
            .query_async(&mut conn)
            .await?;

        Ok(QueueStats { ready, delayed })
    }
}

fn key_names(queue_name: &str) -> (String, String) {
    (queue_name.to_string(), format!("{}:delayed", queue_name))
}
