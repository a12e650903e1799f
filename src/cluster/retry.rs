//! Bounded retry of read-modify-write cycles that lose a write race.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ReconcileError;

/// How often and how fast to retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts.
    pub steps: u32,
    /// Sleep before the second attempt.
    pub initial: Duration,
    /// Multiplier applied to the sleep after each attempt.
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 1.0,
        }
    }
}

impl Backoff {
    /// Sets the number of attempts (minimum 1).
    #[must_use]
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Sets the initial sleep.
    #[must_use]
    pub const fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }
}

/// Runs `op` until it succeeds, fails with something other than
/// [`ReconcileError::Conflict`], or `backoff.steps` attempts are used up.
///
/// Each attempt must redo the whole read-modify-write cycle.
///
/// # Errors
///
/// Returns the first non-conflict error, or the last conflict once the
/// attempts are exhausted.
pub async fn retry_on_conflict<T, F, Fut>(backoff: &Backoff, mut op: F) -> Result<T, ReconcileError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReconcileError>>,
{
    let steps = backoff.steps.max(1);
    let mut delay = backoff.initial;
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err @ ReconcileError::Conflict { .. }) if attempt < steps => {
                debug!(attempt, steps, error = %err, "write conflict, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(backoff.factor);
                attempt += 1;
            }
            Err(err @ ReconcileError::Conflict { .. }) => {
                warn!(attempts = attempt, "write conflict retries exhausted");
                return Err(err);
            }
            other => return other,
        }
    }
}
