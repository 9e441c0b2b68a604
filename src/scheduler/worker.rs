//! Polling worker that executes jobs from a queue.
//!
//! A worker is a single polling loop: pop a job, check that it is really due,
//! run it, then push it back or drop it depending on the job's resulting
//! state. Every failure is converted into a log record inside the iteration
//! that produced it, so one bad job never stops the jobs behind it.
//!
//! Horizontal scaling is done by running more worker processes against the
//! same store; a worker has no internal parallelism.
//!
//! # Log severities
//!
//! - `info`: job completed
//! - `error`: job attempt failed (retried or dropped)
//! - `error` with `severity = "critical"`: storage failures and panics

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::WorkerConfig;
use super::job::{Job, Task};
use crate::error::{GuardError, RunError, StorageError, UnexpectedError, WorkerError};
use crate::storage::Queue;

/// What a single worker iteration did.
#[derive(Debug)]
pub enum Iteration {
    /// No job was ready.
    Idle,
    /// A job surfaced before its scheduled time and was pushed back.
    Deferred,
    /// A job ran successfully.
    Completed,
    /// A job failed and was pushed back for another attempt.
    Retried,
    /// A job failed and is terminal; it was not pushed back.
    Dropped,
    /// The store failed; an in-flight job may have been lost.
    StorageFailed(StorageError),
    /// A task panicked; its job was dropped.
    Unexpected(UnexpectedError),
}

/// Counters describing what a worker has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub deferred: u64,
    pub storage_errors: u64,
    pub unexpected_errors: u64,
}

impl WorkerStats {
    /// Returns the number of job attempts that ran to an outcome.
    pub fn total_processed(&self) -> u64 {
        self.completed + self.retried + self.dropped + self.unexpected_errors
    }
}

/// Shared state for tracking worker statistics.
#[derive(Default)]
struct SharedWorkerStats {
    completed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    deferred: AtomicU64,
    storage_errors: AtomicU64,
    unexpected_errors: AtomicU64,
}

impl SharedWorkerStats {
    fn record(&self, iteration: &Iteration) {
        let counter = match iteration {
            Iteration::Idle => return,
            Iteration::Deferred => &self.deferred,
            Iteration::Completed => &self.completed,
            Iteration::Retried => &self.retried,
            Iteration::Dropped => &self.dropped,
            Iteration::StorageFailed(_) => &self.storage_errors,
            Iteration::Unexpected(_) => &self.unexpected_errors,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            completed: self.completed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            deferred: self.deferred.load(Ordering::SeqCst),
            storage_errors: self.storage_errors.load(Ordering::SeqCst),
            unexpected_errors: self.unexpected_errors.load(Ordering::SeqCst),
        }
    }
}

/// A single worker that processes jobs from a queue.
pub struct Worker<T, Q> {
    /// Unique identifier for this worker.
    id: String,
    queue: Q,
    clock: Arc<dyn Clock>,
    /// Wait after an empty pop or a storage failure.
    backoff: Duration,
    max_storage_failures: Option<u32>,
    stats: Arc<SharedWorkerStats>,
    _task: PhantomData<fn() -> T>,
}

impl<T, Q> Worker<T, Q>
where
    T: Task,
    Q: Queue<T>,
{
    /// Creates a worker polling `queue` with the settings from `config`.
    pub fn new(config: &WorkerConfig, queue: Q) -> Self {
        Self {
            id: config.worker_id.clone(),
            queue,
            clock: Arc::new(SystemClock),
            backoff: config.backoff,
            max_storage_failures: config.max_storage_failures,
            stats: Arc::new(SharedWorkerStats::default()),
            _task: PhantomData,
        }
    }

    /// Replaces the clock used for due checks and retry scheduling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    /// Main worker loop.
    ///
    /// Polls the queue until a shutdown signal arrives (or the sender is
    /// dropped). Sleeps for the backoff after an empty pop or a storage
    /// failure; otherwise moves straight on to the next job.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::StorageUnavailable` once `max_storage_failures`
    /// consecutive storage failures have occurred, so that a process
    /// supervisor can restart the worker.
    pub async fn run(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<WorkerStats, WorkerError> {
        info!(worker_id = %self.id, "Worker started");
        let mut storage_failures: u32 = 0;

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            let wait = match self.process_next().await {
                Iteration::Idle => {
                    storage_failures = 0;
                    true
                }
                Iteration::StorageFailed(e) => {
                    storage_failures = storage_failures.saturating_add(1);
                    if let Some(limit) = self.max_storage_failures {
                        if storage_failures >= limit {
                            error!(
                                worker_id = %self.id,
                                severity = "critical",
                                failures = storage_failures,
                                error = %e,
                                "Storage unavailable, stopping worker"
                            );
                            return Err(WorkerError::StorageUnavailable {
                                failures: storage_failures,
                                last: e,
                            });
                        }
                    }
                    true
                }
                _ => {
                    storage_failures = 0;
                    false
                }
            };

            if wait {
                tokio::select! {
                    _ = tokio::time::sleep(self.backoff) => {}
                    _ = shutdown_rx.recv() => {
                        info!(worker_id = %self.id, "Worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        let stats = self.stats();
        info!(
            worker_id = %self.id,
            completed = stats.completed,
            retried = stats.retried,
            dropped = stats.dropped,
            deferred = stats.deferred,
            storage_errors = stats.storage_errors,
            unexpected_errors = stats.unexpected_errors,
            "Worker stopped"
        );
        Ok(stats)
    }

    /// Runs one iteration of the worker loop without sleeping.
    pub async fn process_next(&self) -> Iteration {
        let iteration = match self.queue.pop().await {
            Ok(Some(job)) => self.process_job(job).await,
            Ok(None) => {
                debug!(worker_id = %self.id, "No jobs available");
                Iteration::Idle
            }
            Err(e) => {
                error!(
                    worker_id = %self.id,
                    severity = "critical",
                    error = %e,
                    "Failed to pop job"
                );
                Iteration::StorageFailed(e)
            }
        };

        self.stats.record(&iteration);
        iteration
    }

    /// Processes a single popped job.
    async fn process_job(&self, mut job: Job<T>) -> Iteration {
        let job_id = job.id();

        if !job.is_time_to_run_at(self.clock.now()) {
            debug!(
                worker_id = %self.id,
                job_id = %job_id,
                scheduled_at = ?job.scheduled_at(),
                "Job surfaced before its schedule, pushing back"
            );
            return match self.queue.push(&job).await {
                Ok(()) => Iteration::Deferred,
                Err(e) => self.requeue_failed(&job, e),
            };
        }

        let outcome = AssertUnwindSafe(job.run_with(self.clock.as_ref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                info!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    task = job.task().name(),
                    failure_count = job.failure_count(),
                    "Job completed successfully"
                );
                Iteration::Completed
            }
            Ok(Err(e)) => self.handle_failure(job, e).await,
            Err(panic) => {
                let e = UnexpectedError::from_panic(panic);
                error!(
                    worker_id = %self.id,
                    severity = "critical",
                    job_id = %job_id,
                    task = job.task().name(),
                    error = %e,
                    "Task panicked, dropping job"
                );
                Iteration::Unexpected(e)
            }
        }
    }

    /// Pushes a failed job back unless it reached a terminal state.
    async fn handle_failure(&self, job: Job<T>, e: RunError) -> Iteration {
        let job_id = job.id();

        if let RunError::Guard(GuardError::AlreadyCompleted | GuardError::AlreadyFailed) = &e {
            warn!(
                worker_id = %self.id,
                job_id = %job_id,
                task = job.task().name(),
                error = %e,
                "Terminal job found in queue, dropping"
            );
            return Iteration::Dropped;
        }

        if job.is_completed() || job.is_failed() {
            error!(
                worker_id = %self.id,
                job_id = %job_id,
                task = job.task().name(),
                failure_count = job.failure_count(),
                error = %e,
                "Job failed permanently, dropping"
            );
            return Iteration::Dropped;
        }

        match self.queue.push(&job).await {
            Ok(()) => {
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    task = job.task().name(),
                    failure_count = job.failure_count(),
                    remaining_attempts = ?job.remaining_attempts(),
                    retry_at = ?job.scheduled_at(),
                    error = %e,
                    "Job failed, requeued for retry"
                );
                Iteration::Retried
            }
            Err(push_err) => {
                error!(
                    worker_id = %self.id,
                    job_id = %job_id,
                    error = %e,
                    "Job failed"
                );
                self.requeue_failed(&job, push_err)
            }
        }
    }

    fn requeue_failed(&self, job: &Job<T>, e: StorageError) -> Iteration {
        error!(
            worker_id = %self.id,
            severity = "critical",
            job_id = %job.id(),
            task = job.task().name(),
            failure_count = job.failure_count(),
            error = %e,
            "Failed to push job back, job is lost"
        );
        Iteration::StorageFailed(e)
    }
}
