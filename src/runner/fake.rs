//! Scripted runner for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RunError;

use super::context::{Context, RunOptions};
use super::contract::Runner;

/// How the fake picks a response.
#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Contains(String),
}

impl Matcher {
    fn matches(&self, command: &str) -> bool {
        match self {
            Self::Exact(s) => command == s,
            Self::Contains(s) => command.contains(s.as_str()),
        }
    }
}

/// Answers commands from a list of rules and records every call.
///
/// Rules are checked in insertion order; unmatched commands succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Vec<(Matcher, Result<String, RunError>)>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responds to exactly `command`.
    pub fn on(mut self, command: &str, response: Result<String, RunError>) -> Self {
        self.rules.push((Matcher::Exact(command.to_string()), response));
        self
    }

    /// Responds to any command containing `fragment`.
    pub fn on_containing(mut self, fragment: &str, response: Result<String, RunError>) -> Self {
        self.rules
            .push((Matcher::Contains(fragment.to_string()), response));
        self
    }

    /// Exits with `code` for any command containing `fragment`.
    pub fn fail_containing(self, fragment: &str, code: i32) -> Self {
        self.on_containing(
            fragment,
            Err(RunError::NonZeroExit {
                code,
                output: String::new(),
            }),
        )
    }

    /// Sleeps this long inside every command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Commands received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of received commands containing `fragment`.
    pub fn count_containing(&self, fragment: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(fragment)).count()
    }

    /// Highest number of commands observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        _options: &RunOptions,
    ) -> Result<String, RunError> {
        if ctx.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.rules
            .iter()
            .find(|(matcher, _)| matcher.matches(command))
            .map_or_else(|| Ok(String::new()), |(_, response)| response.clone())
    }

    fn target(&self) -> String {
        String::from("fake")
    }
}
