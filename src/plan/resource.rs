//! The capability set every plan step implements.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::{Context, Runner};

use super::state::{Diff, State};

/// A named unit of desired configuration.
///
/// `state` must be a pure function of the resource's declared payload.
/// `query_state` probes the node without changing it; stateless resources
/// keep the default, which returns the declared state. `apply` reports
/// `true` only when it actually mutated the node, which is what makes the
/// resource eligible for `undo` during a rollback. The default `undo` does
/// nothing: having no undo is not an error.
#[async_trait]
pub trait Resource: Send + Sync + fmt::Debug {
    /// Short name of the resource variant, used in logs and output.
    fn kind(&self) -> &'static str;

    /// Declared state, derived only from the payload.
    fn state(&self) -> State;

    /// Observed state of the node.
    async fn query_state(&self, _ctx: &Context, _runner: &dyn Runner) -> Result<State> {
        Ok(self.state())
    }

    /// Performs the side effect. Returns whether anything changed.
    async fn apply(&self, ctx: &Context, runner: &dyn Runner, diff: &Diff) -> Result<bool>;

    /// Best-effort reversal of a previous `apply`.
    async fn undo(&self, _ctx: &Context, _runner: &dyn Runner, _current: &State) -> Result<()> {
        Ok(())
    }
}
