//! Script execution resource.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ApplyError, Result, RunError};
use crate::plan::{Diff, Resource, State};
use crate::runner::{Context, RunOptions, Runner};

use super::OutputSlot;

/// Runs a script, which can be a single command.
///
/// `Run` does not realise any state: `apply` executes the script every
/// time and reports a change whenever it succeeds.
#[derive(Debug, Clone)]
pub struct Run {
    script: String,
    undo_script: Option<String>,
    undo_resource: Option<Arc<dyn Resource>>,
    output: Option<OutputSlot>,
}

impl Run {
    /// Creates a resource running `script`.
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            undo_script: None,
            undo_resource: None,
            output: None,
        }
    }

    /// Script run by `undo`.
    #[must_use]
    pub fn with_undo_script(mut self, script: impl Into<String>) -> Self {
        self.undo_script = Some(script.into());
        self
    }

    /// Resource whose `undo` is delegated to when no undo script is set.
    #[must_use]
    pub fn with_undo_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.undo_resource = Some(resource);
        self
    }

    /// Slot that receives the script's stdout.
    #[must_use]
    pub fn with_output(mut self, slot: OutputSlot) -> Self {
        self.output = Some(slot);
        self
    }

    /// The script text.
    #[must_use]
    pub fn script(&self) -> &str {
        &self.script
    }

    fn failed(&self, source: RunError) -> ApplyError {
        ApplyError::Failed {
            resource: format!("run '{}'", self.script),
            source,
        }
    }
}

#[async_trait]
impl Resource for Run {
    fn kind(&self) -> &'static str {
        "run"
    }

    fn state(&self) -> State {
        State::new()
            .with("script", self.script.as_str())
            .with_optional("undoScript", self.undo_script.as_deref())
            .with_optional(
                "undoResource",
                self.undo_resource.as_ref().map(|r| {
                    serde_json::json!({ "kind": r.kind(), "state": r.state() })
                }),
            )
    }

    async fn apply(&self, ctx: &Context, runner: &dyn Runner, _diff: &Diff) -> Result<bool> {
        debug!(script = %self.script, "running script");
        let result = runner.run_command(ctx, &self.script, &RunOptions::NONE).await;

        if let Some(slot) = &self.output {
            match &result {
                Ok(stdout) | Err(RunError::NonZeroExit { output: stdout, .. }) => {
                    slot.set(stdout.as_str());
                }
                Err(_) => {}
            }
        }

        result.map(|_| true).map_err(|e| self.failed(e).into())
    }

    async fn undo(&self, ctx: &Context, runner: &dyn Runner, _current: &State) -> Result<()> {
        if let Some(script) = &self.undo_script {
            debug!(script = %script, "running undo script");
            runner
                .run_command(ctx, script, &RunOptions::NONE)
                .await
                .map_err(|e| self.failed(e))?;
            return Ok(());
        }
        match &self.undo_resource {
            Some(resource) => resource.undo(ctx, runner, &State::EMPTY).await,
            None => Ok(()),
        }
    }
}
