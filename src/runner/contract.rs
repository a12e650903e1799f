//! The runner contract.

use async_trait::async_trait;

use crate::error::RunError;

use super::context::{Context, RunOptions};

/// Executes shell commands on one target node.
///
/// Implementations must report a command that ran and exited non-zero as
/// [`RunError::NonZeroExit`], and keep that apart from a command that could
/// not be run ([`RunError::Transport`]) or was cancelled
/// ([`RunError::Cancelled`]). No retry policy is imposed here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `command` and returns its stdout.
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, RunError>;

    /// Human-readable description of the target, used in logs.
    fn target(&self) -> String;
}

#[async_trait]
impl<R: Runner + ?Sized> Runner for &R {
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, RunError> {
        (**self).run_command(ctx, command, options).await
    }

    fn target(&self) -> String {
        (**self).target()
    }
}
