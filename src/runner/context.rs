//! Cancellation and per-command options.

use std::time::Duration;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Caller-scoped execution context.
///
/// Carries the cancellation token, the default command timeout and the
/// caller's rollback preference down to every resource and runner call
/// made on the caller's behalf.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cancellation signal shared with the caller.
    cancel: CancellationToken,
    /// Default timeout applied to each command.
    timeout: Option<Duration>,
    /// Whether a failed run should undo what it applied.
    rollback: bool,
}

impl Context {
    /// Creates a context that is never cancelled and has no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given token as the cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets the default per-command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the rollback preference seen by nested plans.
    #[must_use]
    pub const fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Returns a context cancelled together with this one, but which can
    /// also be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            timeout: self.timeout,
            rollback: self.rollback,
        }
    }

    /// Cancels this context and every child.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the context has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Default per-command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether a failed run should undo what it applied.
    #[must_use]
    pub const fn rollback(&self) -> bool {
        self.rollback
    }
}

/// Options for a single command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides the context timeout for this command.
    pub timeout: Option<Duration>,
    /// Keeps command output out of debug logs.
    pub quiet: bool,
}

impl RunOptions {
    /// No options; the equivalent of passing nothing.
    pub const NONE: Self = Self {
        timeout: None,
        quiet: false,
    };

    /// Options that keep the command's output out of the logs.
    pub const QUIET: Self = Self {
        timeout: None,
        quiet: true,
    };

    /// Returns the timeout that applies under `ctx`.
    #[must_use]
    pub fn effective_timeout(&self, ctx: &Context) -> Option<Duration> {
        self.timeout.or_else(|| ctx.timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = Context::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_keeps_rollback_preference() {
        let parent = Context::new().with_rollback(true);
        assert!(parent.child().rollback());
        assert!(!Context::new().child().rollback());
    }

    #[test]
    fn test_child_cancel_leaves_parent_running() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_command_timeout_overrides_context() {
        let ctx = Context::new().with_timeout(Duration::from_secs(30));
        assert_eq!(RunOptions::NONE.effective_timeout(&ctx), Some(Duration::from_secs(30)));

        let opts = RunOptions {
            timeout: Some(Duration::from_secs(5)),
            quiet: false,
        };
        assert_eq!(opts.effective_timeout(&ctx), Some(Duration::from_secs(5)));
    }
}
