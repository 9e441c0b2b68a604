//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `Task`: the work-type capability a caller implements (one async work unit)
//! - `Job`: a task plus its completion, failure and scheduling state
//! - `JobState`: the retry/delay state machine shared by every task type
//!
//! A job moves through `Pending -> (Delayed) -> Ready -> {Completed | Failed}`.
//! A failed attempt that has not exhausted `max_failures` goes back to
//! Delayed when a retry interval is configured, or straight to Ready otherwise.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::clock::{offset, Clock, SystemClock};
use crate::error::{GuardError, HandlerError, RunError};

/// A unit of work that can be stored in a queue and executed by a worker.
///
/// Implement this for a `#[serde(tag = "type")]` enum listing every work type
/// your workers understand. The enum is the payload of the stored job record,
/// so adding a variant never changes how existing records decode.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// #[serde(tag = "type", rename_all = "snake_case")]
/// enum MailTask {
///     Welcome { to: String },
/// }
///
/// #[async_trait]
/// impl Task for MailTask {
///     fn name(&self) -> &str {
///         "welcome"
///     }
///
///     async fn handle(&self) -> anyhow::Result<()> {
///         send_welcome().await
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short name used in log records.
    fn name(&self) -> &str;

    /// Executes the work unit. Returning `Err` counts as one failure.
    async fn handle(&self) -> anyhow::Result<()>;
}

/// Completion, failure and scheduling state of a job.
///
/// Every mutation after the job is first enqueued goes through the
/// transition methods below, which are only reachable from [`Job::run_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JobState {
    pub(crate) completed: bool,
    pub(crate) failure_count: u32,
    pub(crate) max_failures: Option<u32>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) scheduled_at: Option<DateTime<Utc>>,
    pub(crate) retry_interval: Option<Duration>,
}

impl JobState {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            completed: false,
            failure_count: 0,
            max_failures: None,
            created_at,
            scheduled_at: None,
            retry_interval: None,
        }
    }

    fn is_failed(&self) -> bool {
        !self.completed
            && self
                .max_failures
                .is_some_and(|max| self.failure_count >= max)
    }

    fn is_time_to_run(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.map_or(true, |at| at <= now)
    }

    fn check_runnable(&self, now: DateTime<Utc>) -> Result<(), GuardError> {
        if self.completed {
            return Err(GuardError::AlreadyCompleted);
        }
        if self.is_failed() {
            return Err(GuardError::AlreadyFailed);
        }
        match self.scheduled_at {
            Some(scheduled_at) if scheduled_at > now => Err(GuardError::NotYetDue { scheduled_at }),
            _ => Ok(()),
        }
    }

    fn record_success(&mut self) {
        self.completed = true;
    }

    fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count = self.failure_count.saturating_add(1);

        let exhausted = self
            .max_failures
            .is_some_and(|max| self.failure_count >= max);

        if let (Some(interval), false) = (self.retry_interval, exhausted) {
            self.scheduled_at = Some(offset(now, interval));
        }
    }
}

/// A job representing a unit of work to be executed.
///
/// Jobs are stored in a queue and processed by workers. The retry policy
/// (`max_failures`, `retry_interval`) and the initial schedule are set by the
/// enqueuing caller before the first push; after that the state only changes
/// through [`Job::run`].
#[derive(Debug, Clone)]
pub struct Job<T> {
    pub(crate) id: Uuid,
    pub(crate) state: JobState,
    pub(crate) task: T,
}

impl<T: Task> Job<T> {
    /// Creates a new job, due immediately, with no failure limit and no retry interval.
    pub fn new(task: T) -> Self {
        Self::new_at(task, Utc::now())
    }

    /// Creates a new job with an explicit creation timestamp.
    pub fn new_at(task: T, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::new(created_at),
            task,
        }
    }

    /// Sets the number of failures after which the job is abandoned.
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.set_max_failures(Some(max_failures));
        self
    }

    /// Sets the delay applied after each failure.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.set_retry_interval(Some(interval));
        self
    }

    /// Schedules the first execution at `at`.
    pub fn with_schedule(mut self, at: DateTime<Utc>) -> Self {
        self.set_scheduled_at(Some(at));
        self
    }

    /// Schedules the first execution `delay` after the creation time.
    pub fn delayed_by(mut self, delay: Duration) -> Self {
        let at = offset(self.state.created_at, delay);
        self.set_scheduled_at(Some(at));
        self
    }

    /// Replaces the failure threshold. Intended for use before the first enqueue.
    pub fn set_max_failures(&mut self, max_failures: Option<u32>) {
        self.state.max_failures = max_failures;
    }

    /// Replaces the retry interval. Intended for use before the first enqueue.
    pub fn set_retry_interval(&mut self, interval: Option<Duration>) {
        self.state.retry_interval = interval;
    }

    /// Replaces the scheduled execution time. Intended for use before the first enqueue.
    pub fn set_scheduled_at(&mut self, at: Option<DateTime<Utc>>) {
        self.state.scheduled_at = at;
    }

    /// Runs the job against the system clock.
    pub async fn run(&mut self) -> Result<(), RunError> {
        self.run_with(&SystemClock).await
    }

    /// Runs the job, reading "now" from `clock`.
    ///
    /// # Errors
    ///
    /// - [`RunError::Guard`] if the job is not due, already completed or
    ///   already failed. Nothing is mutated.
    /// - [`RunError::Handler`] if the task returned an error. The failure
    ///   counter has been incremented and, when a retry interval applies, the
    ///   job has been rescheduled.
    pub async fn run_with(&mut self, clock: &dyn Clock) -> Result<(), RunError> {
        self.state.check_runnable(clock.now())?;

        match self.task.handle().await {
            Ok(()) => {
                self.state.record_success();
                Ok(())
            }
            Err(source) => {
                self.state.record_failure(clock.now());
                Err(HandlerError {
                    failure_count: self.state.failure_count,
                    source,
                }
                .into())
            }
        }
    }
}

impl<T> Job<T> {
    /// Unique identifier for this job.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The task this job executes.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Whether the task has run successfully. Terminal.
    pub fn is_completed(&self) -> bool {
        self.state.completed
    }

    /// Whether the job has exhausted its failure budget. Terminal.
    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Whether the job is due according to the system clock.
    pub fn is_time_to_run(&self) -> bool {
        self.is_time_to_run_at(Utc::now())
    }

    /// Whether the job is due at `now`. A schedule equal to `now` counts as due.
    pub fn is_time_to_run_at(&self, now: DateTime<Utc>) -> bool {
        self.state.is_time_to_run(now)
    }

    /// Number of failed attempts so far.
    pub fn failure_count(&self) -> u32 {
        self.state.failure_count
    }

    /// Failure threshold, if any.
    pub fn max_failures(&self) -> Option<u32> {
        self.state.max_failures
    }

    /// Attempts left before the job fails permanently; `None` when unlimited.
    pub fn remaining_attempts(&self) -> Option<u32> {
        self.state
            .max_failures
            .map(|max| max.saturating_sub(self.state.failure_count))
    }

    /// When this job was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.created_at
    }

    /// When this job is next allowed to run, if scheduled.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.state.scheduled_at
    }

    /// Delay applied after each failure, if any.
    pub fn retry_interval(&self) -> Option<Duration> {
        self.state.retry_interval
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.state.created_at
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scheduler::clock::ManualClock;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Task used across scheduler tests: fails its first `fail_times` runs.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub(crate) enum TestTask {
        Succeed,
        Fail { reason: String },
        Panic,
        Flaky {
            fail_times: u32,
            #[serde(skip)]
            calls: Arc<AtomicU32>,
        },
    }

    #[async_trait]
    impl Task for TestTask {
        fn name(&self) -> &str {
            match self {
                TestTask::Succeed => "succeed",
                TestTask::Fail { .. } => "fail",
                TestTask::Panic => "panic",
                TestTask::Flaky { .. } => "flaky",
            }
        }

        async fn handle(&self) -> anyhow::Result<()> {
            match self {
                TestTask::Succeed => Ok(()),
                TestTask::Fail { reason } => Err(anyhow::anyhow!("{reason}")),
                TestTask::Panic => panic!("task exploded"),
                TestTask::Flaky { fail_times, calls } => {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    if call < *fail_times {
                        anyhow::bail!("flaky failure {}", call + 1)
                    }
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    pub(crate) fn failing() -> TestTask {
        TestTask::Fail {
            reason: "handler failed".to_string(),
        }
    }

    #[test]
    fn test_job_new_defaults() {
        let job = Job::new_at(TestTask::Succeed, t0());

        assert!(!job.id().is_nil());
        assert!(!job.is_completed());
        assert!(!job.is_failed());
        assert_eq!(job.failure_count(), 0);
        assert_eq!(job.max_failures(), None);
        assert_eq!(job.remaining_attempts(), None);
        assert_eq!(job.created_at(), t0());
        assert_eq!(job.scheduled_at(), None);
        assert_eq!(job.retry_interval(), None);
        assert!(job.is_time_to_run_at(t0()));
    }

    #[test]
    fn test_job_builder() {
        let job = Job::new_at(TestTask::Succeed, t0())
            .with_max_failures(3)
            .with_retry_interval(Duration::from_secs(30))
            .delayed_by(Duration::from_secs(10));

        assert_eq!(job.max_failures(), Some(3));
        assert_eq!(job.remaining_attempts(), Some(3));
        assert_eq!(job.retry_interval(), Some(Duration::from_secs(30)));
        assert_eq!(job.scheduled_at(), Some(t0() + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_is_time_to_run_boundary() {
        let at = t0() + chrono::Duration::seconds(5);
        let job = Job::new_at(TestTask::Succeed, t0()).with_schedule(at);

        assert!(!job.is_time_to_run_at(at - chrono::Duration::nanoseconds(1)));
        assert!(job.is_time_to_run_at(at));
        assert!(job.is_time_to_run_at(at + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_run_success_completes() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(TestTask::Succeed, t0());

        job.run_with(&clock).await.expect("run should succeed");

        assert!(job.is_completed());
        assert!(!job.is_failed());
        assert_eq!(job.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_run_on_completed_job_is_guarded() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(TestTask::Succeed, t0());
        job.run_with(&clock).await.expect("first run should succeed");

        let err = job.run_with(&clock).await.expect_err("second run must be rejected");

        assert!(matches!(err, RunError::Guard(GuardError::AlreadyCompleted)));
        assert_eq!(job.failure_count(), 0);
        assert!(job.is_completed());
    }

    #[tokio::test]
    async fn test_run_before_schedule_is_guarded() {
        let clock = ManualClock::new(t0());
        let at = t0() + chrono::Duration::seconds(1);
        let mut job = Job::new_at(failing(), t0()).with_schedule(at);

        let err = job.run_with(&clock).await.expect_err("job is not due");

        match err {
            RunError::Guard(GuardError::NotYetDue { scheduled_at }) => assert_eq!(scheduled_at, at),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(job.failure_count(), 0);
        assert_eq!(job.scheduled_at(), Some(at));
    }

    #[tokio::test]
    async fn test_failure_without_interval_stays_due() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(failing(), t0());

        let err = job.run_with(&clock).await.expect_err("task fails");

        match err {
            RunError::Handler(e) => {
                assert_eq!(e.failure_count, 1);
                assert!(e.source.to_string().contains("handler failed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(job.failure_count(), 1);
        assert_eq!(job.scheduled_at(), None);
        assert!(job.is_time_to_run_at(t0()));
        assert!(!job.is_failed());
    }

    #[tokio::test]
    async fn test_failure_with_interval_reschedules() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(failing(), t0())
            .with_max_failures(3)
            .with_retry_interval(Duration::from_secs(2));

        clock.advance(Duration::from_millis(500));
        job.run_with(&clock).await.expect_err("task fails");

        let expected = t0() + chrono::Duration::milliseconds(2500);
        assert_eq!(job.scheduled_at(), Some(expected));
        assert!(!job.is_time_to_run_at(clock.now()));
        assert_eq!(job.remaining_attempts(), Some(2));
    }

    #[tokio::test]
    async fn test_max_failures_reached_marks_failed() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(failing(), t0()).with_max_failures(3);

        for attempt in 1..=3 {
            assert!(!job.is_failed());
            job.run_with(&clock).await.expect_err("task fails");
            assert_eq!(job.failure_count(), attempt);
        }

        assert!(job.is_failed());
        assert!(!job.is_completed());
        assert_eq!(job.remaining_attempts(), Some(0));

        let err = job.run_with(&clock).await.expect_err("failed job is terminal");
        assert!(matches!(err, RunError::Guard(GuardError::AlreadyFailed)));
        assert_eq!(job.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_final_failure_does_not_reschedule() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(failing(), t0())
            .with_max_failures(1)
            .with_retry_interval(Duration::from_secs(60));

        job.run_with(&clock).await.expect_err("task fails");

        assert!(job.is_failed());
        assert_eq!(job.scheduled_at(), None);
    }

    #[tokio::test]
    async fn test_unlimited_failures_never_fail() {
        let clock = ManualClock::new(t0());
        let mut job = Job::new_at(failing(), t0());

        for _ in 0..10 {
            job.run_with(&clock).await.expect_err("task fails");
        }

        assert_eq!(job.failure_count(), 10);
        assert!(!job.is_failed());
    }

    #[tokio::test]
    async fn test_success_after_failures_completes() {
        let clock = ManualClock::new(t0());
        let task = TestTask::Flaky {
            fail_times: 1,
            calls: Arc::new(AtomicU32::new(0)),
        };
        let mut job = Job::new_at(task, t0()).with_max_failures(3);

        job.run_with(&clock).await.expect_err("first call fails");
        job.run_with(&clock).await.expect("second call succeeds");

        assert!(job.is_completed());
        assert!(!job.is_failed());
        assert_eq!(job.failure_count(), 1);
    }

    #[test]
    fn test_zero_max_failures_is_failed_immediately() {
        let job = Job::new_at(TestTask::Succeed, t0()).with_max_failures(0);
        assert!(job.is_failed());
    }
}
