//! Output formatting for CLI commands.
//!
//! Every formatter returns a string: a colored table for humans or pretty
//! JSON for scripts, depending on [`OutputFormat`].

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::plan::{ExecutionReport, Plan, State};
use crate::resource::{OsFacts, SeLinuxMode, SeLinuxStatus};
use crate::state::NodeRecord;

use super::commands::OutputFormat;

/// Facts printed by the `facts` command.
#[derive(Debug, Clone, Serialize)]
pub struct FactsSummary {
    /// Node the facts were gathered from.
    pub node: String,
    /// Machine identifier and system UUID.
    #[serde(flatten)]
    pub facts: OsFacts,
    /// SELinux installation status.
    pub selinux_status: SeLinuxStatus,
    /// SELinux enforcement mode.
    pub selinux_mode: SeLinuxMode,
    /// Whether the node is a container posing as a VM.
    pub container: Option<bool>,
}

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
    #[tabled(rename = "Desired")]
    desired: String,
}

/// Execution row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Step")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Recorded state row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Observed")]
    observed: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display, in execution order.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, fingerprint: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::new(plan, fingerprint)),
            OutputFormat::Text => Self::format_plan_text(plan, fingerprint),
        }
    }

    fn format_plan_text(plan: &Plan, fingerprint: &str) -> String {
        if plan.is_empty() {
            return format!("{} Plan is empty.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan ({} steps)", plan.len());
        let _ = writeln!(output, "   Fingerprint: {}\n", short(fingerprint));

        let rows: Vec<PlanStepRow> = plan
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| PlanStepRow {
                index: i + 1,
                name: node.name().to_string(),
                kind: node.resource().kind().to_string(),
                depends_on: node.depends_on().join(", "),
                desired: truncate(&summarize(&node.resource().state()), 60),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats an execution report.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    fn format_report_text(report: &ExecutionReport) -> String {
        let mut output = String::new();

        let headline = if report.success() {
            format!("{} Run succeeded", "✓".green())
        } else if report.cancelled {
            format!("{} Run cancelled", "⚠".yellow())
        } else {
            format!("{} Run failed", "✗".red())
        };
        let _ = writeln!(output, "\n{headline} (run {})\n", report.run_id);

        if !report.records.is_empty() {
            let rows: Vec<RecordRow> = report
                .records
                .iter()
                .map(|r| RecordRow {
                    name: r.name.clone(),
                    kind: r.kind.clone(),
                    result: if r.error.is_some() {
                        "failed".red().to_string()
                    } else if r.changed {
                        "changed".yellow().to_string()
                    } else {
                        "unchanged".green().to_string()
                    },
                    error: r.error.as_deref().map(|e| truncate(e, 60)).unwrap_or_default(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !report.not_started.is_empty() {
            let _ = writeln!(output, "\nNot started: {}", report.not_started.join(", "));
        }
        if !report.rolled_back.is_empty() {
            let _ = writeln!(output, "Rolled back: {}", report.rolled_back.join(", "));
        }
        if !report.undo_failures.is_empty() {
            let _ = writeln!(output, "\n{} Undo failures:", "⚠".yellow());
            for failure in &report.undo_failures {
                let _ = writeln!(output, "   - {}: {}", failure.name, failure.error);
            }
        }

        let elapsed = report.finished_at - report.started_at;
        let _ = writeln!(output, "\n{report} in {}ms", elapsed.num_milliseconds());
        output
    }

    /// Formats gathered OS facts.
    #[must_use]
    pub fn format_facts(&self, summary: &FactsSummary) -> String {
        match self.format {
            OutputFormat::Json => to_json(summary),
            OutputFormat::Text => {
                let unknown = || "unknown".dimmed().to_string();
                let mut output = String::new();
                let _ = writeln!(output, "\nNode: {}\n", summary.node);
                let _ = writeln!(
                    output,
                    "   Machine ID:     {}",
                    summary.facts.machine_id.clone().unwrap_or_else(unknown)
                );
                let _ = writeln!(
                    output,
                    "   System UUID:    {}",
                    summary.facts.system_uuid.clone().unwrap_or_else(unknown)
                );
                let _ = writeln!(output, "   SELinux:        {}", summary.selinux_status);
                let _ = writeln!(output, "   SELinux mode:   {}", summary.selinux_mode);
                let _ = writeln!(
                    output,
                    "   Container VM:   {}",
                    summary
                        .container
                        .map_or_else(unknown, |c| if c { "yes" } else { "no" }.to_string())
                );
                output
            }
        }
    }

    /// Formats a stored node record.
    #[must_use]
    pub fn format_record(&self, record: &NodeRecord) -> String {
        match self.format {
            OutputFormat::Json => to_json(record),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = writeln!(output, "\nNode record: {}\n", record.node);
                let _ = writeln!(output, "   Version: {}", record.version);
                let _ = writeln!(output, "   Last run: {}", record.run_id);
                let _ = writeln!(
                    output,
                    "   Plan fingerprint: {}",
                    short(&record.plan_fingerprint)
                );
                let _ = writeln!(output, "   Last updated: {}", record.updated_at);

                if !record.states.is_empty() {
                    let rows: Vec<StateRow> = record
                        .states
                        .iter()
                        .map(|(name, state)| StateRow {
                            name: name.clone(),
                            observed: truncate(&summarize(state), 60),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !record.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", record.history.len());
                    for entry in record.history.iter().rev().take(5) {
                        let status = if entry.success {
                            "✓".green()
                        } else {
                            "✗".red()
                        };
                        let _ = write!(
                            output,
                            "     {status} {} - {:?}",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation
                        );
                        if let Some(failed) = &entry.failed {
                            let _ = write!(output, " ({failed})");
                        }
                        output.push('\n');
                    }
                }

                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, marker: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                to_json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// One-line rendering of a state: the script of a run step, else `key=value` pairs.
fn summarize(state: &State) -> String {
    if let Some(script) = state.get_str("script") {
        return script.to_string();
    }
    state
        .fields()
        .map(|(field, value)| match value {
            Value::String(s) => format!("{field}={s}"),
            other => format!("{field}={other}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[derive(Serialize)]
struct PlanJson {
    fingerprint: String,
    steps: Vec<StepJson>,
}

#[derive(Serialize)]
struct StepJson {
    name: String,
    kind: String,
    depends_on: Vec<String>,
    state: State,
}

impl PlanJson {
    fn new(plan: &Plan, fingerprint: &str) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            steps: plan
                .nodes()
                .iter()
                .map(|node| StepJson {
                    name: node.name().to_string(),
                    kind: node.resource().kind().to_string(),
                    depends_on: node.depends_on().to_vec(),
                    state: node.resource().state(),
                })
                .collect(),
        }
    }
}
