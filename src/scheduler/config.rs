//! Worker configuration.
//!
//! Settings come from defaults, then environment variables, then explicit
//! builder calls (the CLI applies its flags through the builder).

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a single worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier attached to every log record of this worker.
    pub worker_id: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Name of the job queue (prefix of the Redis keys).
    pub queue_name: String,
    /// Fixed wait after an empty pop or a storage error.
    pub backoff: Duration,
    /// Consecutive storage failures tolerated before the worker gives up.
    /// `None` means retry forever.
    pub max_storage_failures: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "jobs".to_string(),
            backoff: Duration::from_secs(1),
            max_storage_failures: Some(10),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JOBQ_WORKER_ID`: Worker identifier (default: worker-<pid>)
    /// - `JOBQ_REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
    /// - `JOBQ_QUEUE`: Queue name (default: jobs)
    /// - `JOBQ_BACKOFF_MS`: Idle backoff in milliseconds (default: 1000)
    /// - `JOBQ_MAX_STORAGE_FAILURES`: Consecutive storage failures before
    ///   exiting, 0 for unlimited (default: 10)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("JOBQ_WORKER_ID") {
            config.worker_id = val;
        }

        if let Ok(val) = std::env::var("JOBQ_REDIS_URL") {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("JOBQ_QUEUE") {
            config.queue_name = val;
        }

        if let Ok(val) = std::env::var("JOBQ_BACKOFF_MS") {
            let millis: u64 = parse_env_value(&val, "JOBQ_BACKOFF_MS")?;
            config.backoff = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("JOBQ_MAX_STORAGE_FAILURES") {
            let limit: u32 = parse_env_value(&val, "JOBQ_MAX_STORAGE_FAILURES")?;
            config.max_storage_failures = (limit > 0).then_some(limit);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "worker_id cannot be empty".to_string(),
            ));
        }

        if self.redis_url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "queue_name cannot be empty".to_string(),
            ));
        }

        if self.backoff.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "backoff must be greater than 0".to_string(),
            ));
        }

        if self.max_storage_failures == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_storage_failures must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the worker identifier.
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Sets the idle backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the storage failure limit; `None` retries forever.
    pub fn with_max_storage_failures(mut self, limit: Option<u32>) -> Self {
        self.max_storage_failures = limit;
        self
    }
}

fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
