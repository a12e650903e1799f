//! Per-node record of the last observed resource states.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::{ExecutionReport, State};

/// Current record format version.
pub const RECORD_VERSION: &str = "1";

/// Number of history entries kept per node.
const MAX_HISTORY: usize = 50;

/// Everything the caller remembers about a node between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Record format version.
    pub version: String,
    /// Node the record belongs to.
    pub node: String,
    /// Identifier of the last run that touched the record.
    pub run_id: Uuid,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Fingerprint of the last executed plan.
    #[serde(default)]
    pub plan_fingerprint: String,
    /// Last observed state per resource name.
    #[serde(default)]
    pub states: BTreeMap<String, State>,
    /// Past runs, oldest first.
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// A single executed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// Run identifier from the execution report.
    pub run_id: Uuid,
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// What was executed.
    pub operation: RunOperation,
    /// Fingerprint of the executed plan.
    pub plan_fingerprint: String,
    /// Resources that reported a change.
    pub changed: Vec<String>,
    /// Whether every step succeeded.
    pub success: bool,
    /// The failing resource and its error, if any.
    #[serde(default)]
    pub failed: Option<String>,
    /// Whether the run was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

/// Kinds of executed runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// A node upgrade plan.
    Upgrade,
    /// A single ad-hoc script.
    Run,
}

impl NodeRecord {
    /// Creates an empty record for a node.
    #[must_use]
    pub fn new(node: &str) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            node: node.to_string(),
            run_id: Uuid::nil(),
            updated_at: Utc::now(),
            plan_fingerprint: String::new(),
            states: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Folds an execution report into the record.
    ///
    /// Observed states replace the stored ones; steps that were never
    /// reached keep whatever was recorded before. Rolled-back steps are
    /// forgotten so the next run diffs them against nothing.
    pub fn record_run(
        &mut self,
        operation: RunOperation,
        plan_fingerprint: &str,
        report: &ExecutionReport,
    ) {
        self.states
            .extend(report.observed.iter().map(|(name, state)| (name.clone(), state.clone())));
        for name in &report.rolled_back {
            self.states.remove(name);
        }
        self.run_id = report.run_id;
        self.updated_at = report.finished_at;
        self.plan_fingerprint = plan_fingerprint.to_string();

        let failed = report
            .failed_record()
            .map(|r| format!("{}: {}", r.name, r.error.as_deref().unwrap_or_default()));

        self.add_history(RunHistoryEntry {
            run_id: report.run_id,
            timestamp: report.finished_at,
            operation,
            plan_fingerprint: plan_fingerprint.to_string(),
            changed: report.changed().into_iter().map(str::to_string).collect(),
            success: report.success(),
            failed,
            cancelled: report.cancelled,
        });
    }

    /// Appends a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns the most recent run, if any.
    #[must_use]
    pub fn last_run(&self) -> Option<&RunHistoryEntry> {
        self.history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExecutionRecord;

    fn report(observed: &[(&str, &str)], failed: Option<&str>) -> ExecutionReport {
        let now = Utc::now();
        let mut records: Vec<ExecutionRecord> = observed
            .iter()
            .map(|(name, _)| ExecutionRecord {
                name: (*name).to_string(),
                kind: String::from("run"),
                changed: true,
                error: None,
            })
            .collect();
        if let Some(name) = failed {
            records.push(ExecutionRecord {
                name: name.to_string(),
                kind: String::from("run"),
                changed: false,
                error: Some(String::from("command exited with status 1")),
            });
        }
        ExecutionReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            records,
            not_started: Vec::new(),
            rolled_back: Vec::new(),
            undo_failures: Vec::new(),
            observed: observed
                .iter()
                .map(|(name, script)| {
                    ((*name).to_string(), State::default().with("script", *script))
                })
                .collect(),
            cancelled: false,
        }
    }

    #[test]
    fn test_record_run_merges_observed_states() {
        let mut record = NodeRecord::new("node-1");
        record.record_run(RunOperation::Run, "abc", &report(&[("a", "one"), ("b", "two")], None));
        record.record_run(RunOperation::Run, "def", &report(&[("b", "three")], Some("c")));

        assert_eq!(record.states.len(), 2);
        assert_eq!(record.states["a"].get_str("script"), Some("one"));
        assert_eq!(record.states["b"].get_str("script"), Some("three"));
        assert_eq!(record.plan_fingerprint, "def");

        let last = record.last_run().expect("history entry");
        assert!(!last.success);
        assert_eq!(last.changed, vec![String::from("b")]);
        assert_eq!(
            last.failed.as_deref(),
            Some("c: command exited with status 1")
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let mut record = NodeRecord::new("node-1");
        for _ in 0..(MAX_HISTORY + 5) {
            record.record_run(RunOperation::Upgrade, "abc", &report(&[], None));
        }
        assert_eq!(record.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_operation_serialization() {
        let json = serde_json::to_string(&RunOperation::Upgrade).expect("serialize");
        assert_eq!(json, "\"upgrade\"");
    }
}
