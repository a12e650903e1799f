//! The finalized, immutable plan.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ApplyError, NodePlanError, Result, RunError};
use crate::runner::{Context, Runner};

use super::executor::PlanExecutor;
use super::resource::Resource;
use super::state::{Diff, State};

/// One resource of a plan together with its resolved dependencies.
#[derive(Debug, Clone)]
pub struct PlanNode {
    name: String,
    resource: Arc<dyn Resource>,
    depends_on: Vec<String>,
    positions: Vec<usize>,
}

impl PlanNode {
    pub(super) fn new(
        name: String,
        resource: Arc<dyn Resource>,
        depends_on: Vec<String>,
        positions: Vec<usize>,
    ) -> Self {
        Self {
            name,
            resource,
            depends_on,
            positions,
        }
    }

    /// Name the resource was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resource itself.
    #[must_use]
    pub fn resource(&self) -> &dyn Resource {
        self.resource.as_ref()
    }

    /// Names of the direct dependencies, in declaration order.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// Plan positions of the direct dependencies, ascending.
    #[must_use]
    pub fn dependency_positions(&self) -> &[usize] {
        &self.positions
    }
}

/// A validated dependency graph of named resources in topological order.
///
/// A plan is itself a [`Resource`]: its state nests the states of its
/// children by name, and applying it runs the children one at a time so a
/// whole plan can be a step of a larger one. When a child fails, the
/// children applied before it are undone if the context asks for rollback.
#[derive(Debug)]
pub struct Plan {
    nodes: Vec<PlanNode>,
    /// Children changed by the last `apply`, in application order.
    applied: Mutex<Vec<String>>,
}

impl Plan {
    pub(super) fn from_nodes(nodes: Vec<PlanNode>) -> Self {
        Self {
            nodes,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the plan has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resource names in topological order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(PlanNode::name).collect()
    }

    /// All nodes in topological order.
    #[must_use]
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Direct dependencies of `name`.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.node(name).map(PlanNode::depends_on)
    }

    /// Resources that directly depend on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.depends_on.iter().any(|d| d == name))
            .map(PlanNode::name)
            .collect()
    }

    /// Every `(dependency, dependent)` edge, ordered by dependent.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.nodes
            .iter()
            .flat_map(|n| n.depends_on.iter().map(move |d| (d.as_str(), n.name())))
            .collect()
    }

    /// SHA-256 over names, kinds, edges and declared states.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for node in &self.nodes {
            hasher.update(node.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(node.resource.kind().as_bytes());
            hasher.update([0u8]);
            for dep in &node.depends_on {
                hasher.update(dep.as_bytes());
                hasher.update([1u8]);
            }
            hasher.update(node.resource.state().fingerprint().as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    fn take_applied(&self) -> Vec<String> {
        std::mem::take(&mut *self.applied.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_applied(&self, names: Vec<String>) {
        *self.applied.lock().unwrap_or_else(PoisonError::into_inner) = names;
    }
}

#[async_trait]
impl Resource for Plan {
    fn kind(&self) -> &'static str {
        "plan"
    }

    fn state(&self) -> State {
        self.nodes.iter().fold(State::new(), |state, node| {
            state.with_state(node.name.clone(), node.resource.state())
        })
    }

    async fn query_state(&self, ctx: &Context, runner: &dyn Runner) -> Result<State> {
        let mut state = State::new();
        for node in &self.nodes {
            let observed = node.resource.query_state(ctx, runner).await?;
            state = state.with_state(node.name.clone(), observed);
        }
        Ok(state)
    }

    async fn apply(&self, ctx: &Context, runner: &dyn Runner, diff: &Diff) -> Result<bool> {
        let recorded: BTreeMap<String, State> = self
            .nodes
            .iter()
            .filter_map(|n| diff.previous().nested(&n.name).map(|s| (n.name.clone(), s)))
            .collect();

        let report = PlanExecutor::new()
            .with_rollback(ctx.rollback())
            .with_max_concurrency(1)
            .with_recorded_states(recorded)
            .execute(self, ctx, runner)
            .await?;

        if !report.success() {
            // A failed sub-plan is never undone by its parent.
            self.set_applied(Vec::new());
            for failure in &report.undo_failures {
                warn!(resource = %failure.name, error = %failure.error, "sub-plan undo failed");
            }
        }

        let changed: Vec<String> = report.changed().into_iter().map(String::from).collect();
        let any_changed = !changed.is_empty();

        if let Some(failed) = report.failed_record() {
            return Err(ApplyError::SubPlan {
                step: failed.name.clone(),
                message: failed.error.clone().unwrap_or_default(),
            }
            .into());
        }
        if report.cancelled {
            return Err(RunError::Cancelled.into());
        }
        self.set_applied(changed);
        Ok(any_changed)
    }

    async fn undo(&self, ctx: &Context, runner: &dyn Runner, current: &State) -> Result<()> {
        let mut first_error: Option<NodePlanError> = None;

        for name in self.take_applied().iter().rev() {
            let Some(node) = self.node(name) else { continue };
            let child_state = current.nested(name).unwrap_or_else(|| node.resource.state());
            debug!(resource = %name, "undoing sub-plan step");
            if let Err(e) = node.resource.undo(ctx, runner, &child_state).await {
                warn!(resource = %name, error = %e, "sub-plan undo failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
