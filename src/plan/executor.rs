//! Plan executor.
//!
//! Walks a [`Plan`] in dependency order, fanning out across independent
//! branches, and keeps the undo log for one run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{NodePlanError, Result, RunError};
use crate::runner::{Context, Runner, SerializedRunner};

use super::graph::{Plan, PlanNode};
use super::state::{Diff, State};

/// Default number of resources applied at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Executor for plans.
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    /// Whether to undo applied resources after a failure.
    rollback: bool,
    /// Upper bound on resources in flight.
    max_concurrency: usize,
    /// Last recorded state per resource name.
    recorded: BTreeMap<String, State>,
}

/// Outcome of one resource in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionRecord {
    /// Resource name.
    pub name: String,
    /// Resource variant.
    pub kind: String,
    /// Whether `apply` reported a change.
    pub changed: bool,
    /// Rendered error, if the step failed.
    pub error: Option<String>,
}

/// An `undo` that failed during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoFailure {
    /// Resource name.
    pub name: String,
    /// Rendered error.
    pub error: String,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// Identifier of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, rollback included.
    pub finished_at: DateTime<Utc>,
    /// Completed steps in completion order.
    pub records: Vec<ExecutionRecord>,
    /// Resources never started, in plan order.
    pub not_started: Vec<String>,
    /// Resources undone during rollback, in undo order.
    pub rolled_back: Vec<String>,
    /// Undo failures collected during rollback.
    pub undo_failures: Vec<UndoFailure>,
    /// State to record per completed resource for the next run.
    pub observed: BTreeMap<String, State>,
    /// Whether the caller's context was cancelled during the run.
    pub cancelled: bool,
}

/// What a single step produced.
struct StepOutcome {
    observed: Option<State>,
    result: Result<bool>,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanExecutor {
    /// Creates an executor without rollback.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rollback: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            recorded: BTreeMap::new(),
        }
    }

    /// Sets whether applied resources are undone after a failure.
    #[must_use]
    pub const fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback = rollback;
        self
    }

    /// Sets how many independent resources may run at once (minimum 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Supplies the states recorded by a previous run.
    #[must_use]
    pub fn with_recorded_states(mut self, recorded: BTreeMap<String, State>) -> Self {
        self.recorded = recorded;
        self
    }

    /// Executes `plan` against the node behind `runner`.
    ///
    /// A resource starts only after all of its dependencies completed. On
    /// the first failure nothing new is scheduled; steps already in flight
    /// are allowed to finish, then applied resources are undone if rollback
    /// was requested. The failure is carried in the report.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Cancelled`] if `ctx` is cancelled before the run starts.
    pub async fn execute(
        &self,
        plan: &Plan,
        ctx: &Context,
        runner: &dyn Runner,
    ) -> Result<ExecutionReport> {
        if ctx.is_cancelled() {
            return Err(RunError::Cancelled.into());
        }
        let scoped = ctx.clone().with_rollback(self.rollback);
        let ctx = &scoped;

        let runner = SerializedRunner::new(runner);
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let nodes = plan.nodes();

        info!(
            %run_id,
            resources = nodes.len(),
            target = %runner.target(),
            rollback = self.rollback,
            "Executing plan"
        );

        let mut waiting: Vec<usize> = nodes
            .iter()
            .map(|n| n.dependency_positions().len())
            .collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            for &dep in node.dependency_positions() {
                dependents[dep].push(idx);
            }
        }

        let mut ready: BTreeSet<usize> = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == 0)
            .map(|(idx, _)| idx)
            .collect();
        let mut started = vec![false; nodes.len()];
        let mut in_flight = FuturesUnordered::new();
        let mut records = Vec::new();
        let mut observed = BTreeMap::new();
        let mut failed = false;

        loop {
            while !failed && !ctx.is_cancelled() && in_flight.len() < self.max_concurrency {
                let Some(idx) = ready.pop_first() else { break };
                started[idx] = true;
                in_flight.push(self.run_step(idx, &nodes[idx], ctx, &runner));
            }

            let Some((idx, outcome)) = in_flight.next().await else {
                break;
            };
            let node = &nodes[idx];

            match outcome.result {
                Ok(changed) => {
                    info!(resource = %node.name(), changed, "Resource applied");
                    let state = if changed {
                        node.resource().state()
                    } else {
                        outcome.observed.unwrap_or_default()
                    };
                    observed.insert(node.name().to_string(), state);
                    records.push(record(node, changed, None));

                    for &dependent in &dependents[idx] {
                        waiting[dependent] -= 1;
                        if waiting[dependent] == 0 {
                            ready.insert(dependent);
                        }
                    }
                }
                Err(e) => {
                    if e.is_cancelled() {
                        warn!(resource = %node.name(), "Resource cancelled");
                    } else {
                        error!(
                            resource = %node.name(),
                            error = %e,
                            "Resource failed, aborting plan"
                        );
                    }
                    if let Some(state) = outcome.observed {
                        observed.insert(node.name().to_string(), state);
                    }
                    records.push(record(node, false, Some(&e)));
                    failed = true;
                }
            }
        }

        let cancelled = ctx.is_cancelled();
        let not_started: Vec<String> = nodes
            .iter()
            .zip(&started)
            .filter(|(_, s)| !**s)
            .map(|(n, _)| n.name().to_string())
            .collect();

        let mut report = ExecutionReport {
            run_id,
            started_at,
            finished_at: started_at,
            records,
            not_started,
            rolled_back: Vec::new(),
            undo_failures: Vec::new(),
            observed,
            cancelled,
        };

        if failed && self.rollback {
            if cancelled {
                warn!(%run_id, "Context cancelled, skipping rollback");
            } else {
                self.roll_back(plan, ctx, &runner, &mut report).await;
            }
        }

        report.finished_at = Utc::now();
        info!(%run_id, "{report}");
        Ok(report)
    }

    async fn run_step(
        &self,
        idx: usize,
        node: &PlanNode,
        ctx: &Context,
        runner: &dyn Runner,
    ) -> (usize, StepOutcome) {
        let resource = node.resource();

        let observed = match resource.query_state(ctx, runner).await {
            Ok(state) => state,
            Err(e) => {
                return (
                    idx,
                    StepOutcome {
                        observed: None,
                        result: Err(e),
                    },
                );
            }
        };

        let previous = self.recorded.get(node.name()).cloned().unwrap_or_default();
        let diff = Diff::between(previous, observed.clone());
        debug!(resource = %node.name(), kind = resource.kind(), diff = %diff, "Applying resource");

        let result = resource.apply(ctx, runner, &diff).await;
        (
            idx,
            StepOutcome {
                observed: Some(observed),
                result,
            },
        )
    }

    /// Undoes changed resources in reverse completion order.
    async fn roll_back(
        &self,
        plan: &Plan,
        ctx: &Context,
        runner: &dyn Runner,
        report: &mut ExecutionReport,
    ) {
        let applied: Vec<String> = report.changed().into_iter().map(String::from).collect();
        info!(resources = applied.len(), "Rolling back applied resources");

        for name in applied.iter().rev() {
            let Some(node) = plan.node(name) else { continue };
            let current = report
                .observed
                .get(name)
                .cloned()
                .unwrap_or_else(|| node.resource().state());

            match node.resource().undo(ctx, runner, &current).await {
                Ok(()) => {
                    debug!(resource = %name, "Resource undone");
                    report.rolled_back.push(name.clone());
                }
                Err(e) => {
                    warn!(resource = %name, error = %e, "Undo failed, continuing rollback");
                    report.undo_failures.push(UndoFailure {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

fn record(node: &PlanNode, changed: bool, error: Option<&NodePlanError>) -> ExecutionRecord {
    ExecutionRecord {
        name: node.name().to_string(),
        kind: node.resource().kind().to_string(),
        changed,
        error: error.map(ToString::to_string),
    }
}

impl ExecutionReport {
    /// Returns true if every resource completed without error.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.cancelled
            && self.not_started.is_empty()
            && self.records.iter().all(|r| r.error.is_none())
    }

    /// The first failed step, if any.
    #[must_use]
    pub fn failed_record(&self) -> Option<&ExecutionRecord> {
        self.records.iter().find(|r| r.error.is_some())
    }

    /// Names of resources that reported a change, in completion order.
    #[must_use]
    pub fn changed(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.changed)
            .map(|r| r.name.as_str())
            .collect()
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.records.iter().filter(|r| r.error.is_some()).count();
        write!(
            f,
            "Executed {} resources: {} changed, {} failed, {} not started",
            self.records.len(),
            self.changed().len(),
            failed,
            self.not_started.len()
        )?;
        if !self.rolled_back.is_empty() || !self.undo_failures.is_empty() {
            write!(
                f,
                ", {} rolled back, {} undo failures",
                self.rolled_back.len(),
                self.undo_failures.len()
            )?;
        }
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
