//! Job scheduling: jobs, their retry state machine, and the worker loop.
//!
//! This module provides the execution side of the queue:
//!
//! - **Task**: the work unit a caller implements for each job type
//! - **Job**: a task plus completion/failure/schedule state with retry logic
//! - **Worker**: a polling loop that pops, runs, and requeues or drops jobs
//! - **Clock**: injectable time source used for every due check
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────┐  push   ┌─────────────────────────────┐
//!   │ Producer │────────►│ Queue                       │
//!   └──────────┘         │  ready   [FIFO list]        │
//!                        │  delayed [sorted by second] │
//!                        └──────┬──────────────▲───────┘
//!                     pop       │              │ push (retry / early)
//!               (migrate first) ▼              │
//!                        ┌─────────────────────┴───────┐
//!                        │ Worker ── Job::run ── Task  │
//!                        └─────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jobq::scheduler::{Job, Worker, WorkerConfig};
//! use jobq::storage::{Queue, RedisQueue};
//! use jobq::tasks::BuiltinTask;
//! use std::time::Duration;
//!
//! let config = WorkerConfig::from_env()?;
//! let queue: RedisQueue<BuiltinTask> =
//!     RedisQueue::connect(&config.redis_url, &config.queue_name).await?;
//!
//! // Enqueue a job that runs in 10 seconds and retries twice, 30s apart.
//! let job = Job::new(BuiltinTask::Log { message: "hello".into() })
//!     .delayed_by(Duration::from_secs(10))
//!     .with_max_failures(3)
//!     .with_retry_interval(Duration::from_secs(30));
//! queue.push(&job).await?;
//!
//! // Run a worker until Ctrl-C.
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let worker = Worker::new(&config, queue);
//! worker.run(shutdown_rx).await?;
//! ```

pub mod clock;
pub mod config;
pub mod job;
pub mod record;
pub mod worker;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, WorkerConfig};
pub use job::{Job, Task};
pub use record::{JobRecord, JobRecordV1};
pub use worker::{Iteration, Worker, WorkerStats};
