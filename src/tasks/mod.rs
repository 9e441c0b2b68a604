//! Built-in task types understood by the `jobq` binary.
//!
//! Library users normally define their own [`Task`] enum; these variants
//! cover the operational basics so the CLI can enqueue and run jobs without
//! any custom code.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::scheduler::Task;

/// Tasks the stock worker binary can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuiltinTask {
    /// Emits the message as an info log record.
    Log { message: String },

    /// Waits for the given number of milliseconds.
    Sleep { millis: u64 },

    /// Runs an external program; a non-zero exit status is a failure.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[async_trait]
impl Task for BuiltinTask {
    fn name(&self) -> &str {
        match self {
            BuiltinTask::Log { .. } => "log",
            BuiltinTask::Sleep { .. } => "sleep",
            BuiltinTask::Command { .. } => "command",
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        match self {
            BuiltinTask::Log { message } => {
                info!(text = %message, "log task");
                Ok(())
            }
            BuiltinTask::Sleep { millis } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(())
            }
            BuiltinTask::Command { program, args } => {
                let status = tokio::process::Command::new(program)
                    .args(args)
                    .status()
                    .await
                    .with_context(|| format!("failed to spawn {program}"))?;

                if !status.success() {
                    bail!("{program} exited with {status}");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_task_serialization() {
        let task = BuiltinTask::Command {
            program: "echo".to_string(),
            args: vec!["hi".to_string()],
        };
        let json = serde_json::to_value(&task).expect("serialization should work");

        assert_eq!(json["type"], "command");
        assert_eq!(json["program"], "echo");

        let parsed: BuiltinTask = serde_json::from_value(json).expect("deserialization should work");
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_command_args_default_to_empty() {
        let parsed: BuiltinTask =
            serde_json::from_str(r#"{"type":"command","program":"true"}"#).expect("valid task");
        assert_eq!(
            parsed,
            BuiltinTask::Command {
                program: "true".to_string(),
                args: Vec::new(),
            }
        );
    }

    #[test]
    fn test_unknown_task_type_is_rejected() {
        let result = serde_json::from_str::<BuiltinTask>(r#"{"type":"reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_task_names() {
        assert_eq!(
            BuiltinTask::Log {
                message: String::new()
            }
            .name(),
            "log"
        );
        assert_eq!(BuiltinTask::Sleep { millis: 1 }.name(), "sleep");
    }

    #[tokio::test]
    async fn test_log_and_sleep_succeed() {
        BuiltinTask::Log {
            message: "hello".to_string(),
        }
        .handle()
        .await
        .expect("log task succeeds");

        BuiltinTask::Sleep { millis: 1 }
            .handle()
            .await
            .expect("sleep task succeeds");
    }

    #[tokio::test]
    async fn test_missing_program_fails() {
        let task = BuiltinTask::Command {
            program: "jobq-definitely-not-a-real-binary".to_string(),
            args: Vec::new(),
        };
        let err = task.handle().await.expect_err("program does not exist");
        assert!(err.to_string().contains("failed to spawn"));
    }
}
