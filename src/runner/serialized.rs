//! One-command-at-a-time access to a node.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::RunError;

use super::context::{Context, RunOptions};
use super::contract::Runner;

/// Wraps a runner so that commands against its node never interleave.
///
/// A node has single-shell-session semantics: concurrent callers queue on
/// the wrapper and run one after another in arrival order.
#[derive(Debug)]
pub struct SerializedRunner<R> {
    /// Wrapped runner.
    inner: R,
    /// Held for the duration of each command.
    session: Mutex<()>,
}

impl<R: Runner> SerializedRunner<R> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            session: Mutex::new(()),
        }
    }

    /// Returns the wrapped runner.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: Runner> Runner for SerializedRunner<R> {
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, RunError> {
        let _session = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(RunError::Cancelled),
            guard = self.session.lock() => guard,
        };
        self.inner.run_command(ctx, command, options).await
    }

    fn target(&self) -> String {
        self.inner.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::ScriptedRunner;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_commands_do_not_overlap() {
        let fake = ScriptedRunner::new().with_delay(Duration::from_millis(20));
        let runner = Arc::new(SerializedRunner::new(fake));

        let mut handles = Vec::new();
        for i in 0..4 {
            let runner = Arc::clone(&runner);
            handles.push(tokio::spawn(async move {
                runner
                    .run_command(&Context::new(), &format!("step {i}"), &RunOptions::NONE)
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked").expect("command failed");
        }

        assert_eq!(runner.inner().calls().len(), 4);
        assert_eq!(runner.inner().max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_while_queued() {
        let runner = SerializedRunner::new(ScriptedRunner::new());
        let ctx = Context::new();
        ctx.cancel();

        let err = runner
            .run_command(&ctx, "true", &RunOptions::NONE)
            .await
            .expect_err("should be cancelled");
        assert!(err.is_cancelled());
        assert!(runner.inner().calls().is_empty());
    }
}
