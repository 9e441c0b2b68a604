//! CLI command definitions for jobq.
//!
//! Every command talks to the Redis queue named by `--queue`; values not
//! given on the command line fall back to the `JOBQ_*` environment variables
//! read by [`WorkerConfig::from_env`].

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::scheduler::{Job, Task, Worker, WorkerConfig};
use crate::storage::{Queue, RedisQueue};
use crate::tasks::BuiltinTask;

/// Minimal Redis-backed job queue worker.
#[derive(Parser)]
#[command(name = "jobq")]
#[command(about = "Enqueue delayed, retryable jobs and run workers that execute them")]
#[command(version)]
#[command(
    long_about = "jobq keeps jobs in two Redis partitions: a ready list and a delayed sorted set.\n\nWorkers pop ready jobs, run them, and requeue failures according to each job's retry policy.\n\nExample usage:\n  jobq enqueue '{\"type\":\"log\",\"message\":\"hi\"}' --delay-secs 10 --max-failures 3\n  jobq work"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL (overrides JOBQ_REDIS_URL).
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// Queue name (overrides JOBQ_QUEUE).
    #[arg(short, long, global = true)]
    pub queue: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a worker until Ctrl-C.
    Work(WorkArgs),

    /// Push one built-in task onto the queue.
    #[command(alias = "push")]
    Enqueue(EnqueueArgs),

    /// Show how many jobs are ready and delayed.
    Stats(StatsArgs),

    /// Delete every job in both partitions.
    Clear(ClearArgs),
}

/// Arguments for `jobq work`.
#[derive(Parser, Debug)]
pub struct WorkArgs {
    /// Worker identifier used in log records (overrides JOBQ_WORKER_ID).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Wait after an empty poll, in milliseconds (overrides JOBQ_BACKOFF_MS).
    #[arg(long)]
    pub backoff_ms: Option<u64>,

    /// Consecutive storage failures before exiting; 0 retries forever
    /// (overrides JOBQ_MAX_STORAGE_FAILURES).
    #[arg(long)]
    pub max_storage_failures: Option<u32>,
}

/// Arguments for `jobq enqueue`.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Task as JSON, e.g. '{"type":"command","program":"make","args":["backup"]}'.
    pub task: String,

    /// Delay the first run by this many seconds.
    #[arg(long)]
    pub delay_secs: Option<u64>,

    /// Give up after this many failed attempts (default: retry forever).
    #[arg(long)]
    pub max_failures: Option<u32>,

    /// Wait this many seconds before each retry (default: retry immediately).
    #[arg(long)]
    pub retry_interval_secs: Option<u64>,

    /// Output the enqueued job as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `jobq stats`.
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `jobq clear`.
#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Confirm deletion.
    #[arg(long)]
    pub yes: bool,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses command-line arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = base_config(&cli)?;

    match cli.command {
        Commands::Work(args) => run_work(config, args).await,
        Commands::Enqueue(args) => run_enqueue(config, args).await,
        Commands::Stats(args) => run_stats(config, args).await,
        Commands::Clear(args) => run_clear(config, args).await,
    }
}

fn base_config(cli: &Cli) -> anyhow::Result<WorkerConfig> {
    let mut config = WorkerConfig::from_env().context("invalid JOBQ_* environment")?;
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url);
    }
    if let Some(queue) = &cli.queue {
        config = config.with_queue_name(queue);
    }
    Ok(config)
}

async fn connect(config: &WorkerConfig) -> anyhow::Result<RedisQueue<BuiltinTask>> {
    RedisQueue::connect(&config.redis_url, &config.queue_name)
        .await
        .with_context(|| format!("cannot reach Redis at {}", config.redis_url))
}

async fn run_work(mut config: WorkerConfig, args: WorkArgs) -> anyhow::Result<()> {
    if let Some(id) = args.worker_id {
        config = config.with_worker_id(id);
    }
    if let Some(ms) = args.backoff_ms {
        config = config.with_backoff(Duration::from_millis(ms));
    }
    if let Some(limit) = args.max_storage_failures {
        config = config.with_max_storage_failures((limit > 0).then_some(limit));
    }
    config.validate()?;

    let queue = connect(&config).await?;
    info!(
        worker_id = %config.worker_id,
        queue = %config.queue_name,
        backoff_ms = config.backoff.as_millis() as u64,
        "Connected to queue"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing current job");
                let _ = shutdown_tx.send(());
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let worker: Worker<BuiltinTask, _> = Worker::new(&config, queue);
    worker.run(shutdown_rx).await?;
    Ok(())
}

async fn run_enqueue(config: WorkerConfig, args: EnqueueArgs) -> anyhow::Result<()> {
    let job = build_job(&args)?;
    let queue = connect(&config).await?;
    queue.push(&job).await?;

    if args.json {
        let record = crate::scheduler::record::encode(&job)?;
        println!("{record}");
    } else {
        println!(
            "Enqueued {} job {} on '{}'{}",
            job.task().name(),
            job.id(),
            config.queue_name,
            job.scheduled_at()
                .map(|at| format!(", due at {}", at.to_rfc3339()))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn build_job(args: &EnqueueArgs) -> anyhow::Result<Job<BuiltinTask>> {
    let task: BuiltinTask = serde_json::from_str(&args.task).context("invalid task JSON")?;

    let mut job = Job::new(task);
    if let Some(secs) = args.delay_secs {
        job = job.delayed_by(Duration::from_secs(secs));
    }
    if let Some(max) = args.max_failures {
        job = job.with_max_failures(max);
    }
    if let Some(secs) = args.retry_interval_secs {
        job = job.with_retry_interval(Duration::from_secs(secs));
    }
    Ok(job)
}

async fn run_stats(config: WorkerConfig, args: StatsArgs) -> anyhow::Result<()> {
    let queue = connect(&config).await?;
    let stats = queue.stats().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Queue:   {}", config.queue_name);
        println!("Ready:   {}", stats.ready);
        println!("Delayed: {}", stats.delayed);
        println!("Total:   {}", stats.total());
    }
    Ok(())
}

async fn run_clear(config: WorkerConfig, args: ClearArgs) -> anyhow::Result<()> {
    if !args.yes {
        anyhow::bail!("refusing to delete queue '{}' without --yes", config.queue_name);
    }

    let queue = connect(&config).await?;
    queue.clear().await?;
    info!(queue = %config.queue_name, "Queue cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "jobq",
            "--queue",
            "emails",
            "enqueue",
            r#"{"type":"log","message":"hi"}"#,
            "--delay-secs",
            "10",
            "--max-failures",
            "3",
        ])
        .expect("valid arguments");

        assert_eq!(cli.queue.as_deref(), Some("emails"));
        match cli.command {
            Commands::Enqueue(args) => {
                assert_eq!(args.delay_secs, Some(10));
                assert_eq!(args.max_failures, Some(3));
                assert_eq!(args.retry_interval_secs, None);
            }
            _ => panic!("expected enqueue"),
        }
    }

    #[test]
    fn test_build_job_applies_policy() {
        let args = EnqueueArgs {
            task: r#"{"type":"sleep","millis":5}"#.to_string(),
            delay_secs: Some(30),
            max_failures: Some(4),
            retry_interval_secs: Some(60),
            json: false,
        };

        let job = build_job(&args).expect("valid job");

        assert_eq!(job.task(), &BuiltinTask::Sleep { millis: 5 });
        assert_eq!(job.task().name(), "sleep");
        assert_eq!(job.max_failures(), Some(4));
        assert_eq!(job.retry_interval(), Some(Duration::from_secs(60)));
        assert_eq!(
            job.scheduled_at(),
            Some(job.created_at() + chrono::Duration::seconds(30))
        );
    }

    #[test]
    fn test_build_job_rejects_bad_json() {
        let args = EnqueueArgs {
            task: "not json".to_string(),
            delay_secs: None,
            max_failures: None,
            retry_interval_secs: None,
            json: false,
        };

        let err = build_job(&args).expect_err("invalid JSON");
        assert!(err.to_string().contains("invalid task JSON"));
    }

    #[test]
    fn test_parse_work_overrides() {
        let cli = Cli::try_parse_from(["jobq", "work", "--backoff-ms", "250", "--worker-id", "w1"])
            .expect("valid arguments");

        match cli.command {
            Commands::Work(args) => {
                assert_eq!(args.backoff_ms, Some(250));
                assert_eq!(args.worker_id.as_deref(), Some("w1"));
                assert_eq!(args.max_storage_failures, None);
            }
            _ => panic!("expected work"),
        }
    }
}
