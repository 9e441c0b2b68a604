//! Command-line interface for jobq.
//!
//! Provides commands for running a worker, enqueuing built-in tasks, and
//! inspecting or clearing a queue.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
