//! jobq: minimal job queue with delayed jobs, retry policies and a polling worker.
//!
//! This library provides the job state machine, the queue contract with
//! Redis and in-memory backing stores, and the worker loop that executes
//! jobs and requeues recoverable failures.

// Core modules
pub mod cli;
pub mod error;
pub mod scheduler;
pub mod storage;
pub mod tasks;

// Re-export commonly used types
pub use error::{GuardError, HandlerError, RunError, StorageError, UnexpectedError, WorkerError};
pub use scheduler::{Clock, Job, Task, Worker, WorkerConfig};
pub use storage::{MemoryQueue, Queue, QueueStats, RedisQueue};
