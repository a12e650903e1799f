//! Runner executing commands on the current host.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunError;

use super::context::{Context, RunOptions};
use super::contract::Runner;
use super::process::run_process;

/// Default shell used to interpret commands.
const DEFAULT_SHELL: &str = "/bin/sh";

/// Runs commands through a local shell.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    /// Shell binary invoked with `-c`.
    shell: String,
}

impl LocalRunner {
    /// Creates a runner using `/bin/sh`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: String::from(DEFAULT_SHELL),
        }
    }

    /// Uses a different shell binary.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, RunError> {
        debug!(target_node = "localhost", command = %command, "running command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);

        run_process(cmd, command, ctx, options).await
    }

    fn target(&self) -> String {
        String::from("localhost")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = LocalRunner::new();
        let out = runner
            .run_command(&Context::new(), "echo hello", &RunOptions::NONE)
            .await
            .expect("echo should succeed");
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_code() {
        let runner = LocalRunner::new();
        let err = runner
            .run_command(&Context::new(), "echo partial; exit 3", &RunOptions::NONE)
            .await
            .expect_err("exit 3 should fail");
        assert_eq!(
            err,
            RunError::NonZeroExit {
                code: 3,
                output: String::from("partial\n"),
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_exit_code() {
        let runner = LocalRunner::new();
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = runner
            .run_command(&ctx, "sleep 10", &RunOptions::NONE)
            .await
            .expect_err("cancelled command should fail");
        assert_eq!(err, RunError::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let runner = LocalRunner::new();
        let options = RunOptions {
            timeout: Some(Duration::from_millis(50)),
            quiet: true,
        };
        let err = runner
            .run_command(&Context::new(), "sleep 10", &options)
            .await
            .expect_err("command should time out");
        assert!(matches!(err, RunError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_already_cancelled_context_runs_nothing() {
        let runner = LocalRunner::new();
        let ctx = Context::new();
        ctx.cancel();
        let err = runner
            .run_command(&ctx, "echo never", &RunOptions::NONE)
            .await
            .expect_err("cancelled context");
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_shell_is_transport_error() {
        let runner = LocalRunner::new().with_shell("/nonexistent/shell");
        let err = runner
            .run_command(&Context::new(), "echo hi", &RunOptions::NONE)
            .await
            .expect_err("spawn should fail");
        assert!(matches!(err, RunError::Transport { .. }));
        assert_eq!(err.exit_code(), None);
    }
}
