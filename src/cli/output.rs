//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans,
//! apply reports, and state to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::model::AttrHasher;
use crate::plan::{ApplyReport, OpAction, OperationOutcome, Plan};
use crate::state::StateSnapshot;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanOpRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// State record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an execution plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_changeless() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nExecution Plan\n\n");

        let rows: Vec<PlanOpRow> = plan
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.action != OpAction::Noop)
            .map(|(i, op)| PlanOpRow {
                index: i + 1,
                action: Self::format_action(op.action, op.part_of_replace),
                resource: op.resource.clone(),
                kind: op.kind.clone(),
                reason: Self::truncate(&op.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete\n",
            plan.count(OpAction::Create).to_string().green(),
            plan.count(OpAction::Update).to_string().yellow(),
            plan.count(OpAction::Delete).to_string().red()
        );

        output
    }

    /// Formats an apply report for display.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats an apply report as text.
    fn format_report_text(report: &ApplyReport) -> String {
        let mut output = String::new();

        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .filter(|r| r.action != OpAction::Noop)
            .map(|r| ResultRow {
                resource: r.resource.clone(),
                action: Self::format_action(r.action, false),
                outcome: Self::format_outcome(&r.outcome),
            })
            .collect();

        if !rows.is_empty() {
            output.push('\n');
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let status = if report.is_clean() {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        let _ = write!(
            output,
            "\n{status} Apply finished: {} succeeded, {} failed, {} blocked, {} skipped, {} cancelled\n",
            report.succeeded(),
            report.failed(),
            report.blocked(),
            report.skipped(),
            report.cancelled()
        );

        for result in &report.results {
            if let OperationOutcome::Failed { error } = &result.outcome {
                let _ = writeln!(output, "   {} {}: {error}", "✗".red(), result.resource);
            }
        }

        output
    }

    /// Formats a state snapshot for display.
    #[must_use]
    pub fn format_state(&self, state: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&StateJson::from(state)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_state_text(state),
        }
    }

    /// Formats a state snapshot as text.
    fn format_state_text(state: &StateSnapshot) -> String {
        if state.is_empty() {
            return String::from("No resources in state.\n");
        }

        let mut output = format!("\nState: {} resource(s)\n\n", state.len());

        let rows: Vec<RecordRow> = state
            .records()
            .map(|r| RecordRow {
                resource: r.id.clone(),
                kind: r.kind.clone(),
                remote_id: Self::truncate(&r.remote_id, 20),
                hash: AttrHasher::short_hash(&r.attr_hash),
                updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');

        let has_outputs = state.records().any(|r| !r.outputs.is_empty());
        if has_outputs {
            output.push_str("\nOutputs:\n");
            for record in state.records() {
                for (name, value) in &record.outputs {
                    let _ = writeln!(output, "   {}.{name} = {value}", record.id);
                }
            }
        }

        output
    }

    /// Formats an action with color.
    fn format_action(action: OpAction, part_of_replace: bool) -> String {
        let rendered = match action {
            OpAction::Create => "+create".green().to_string(),
            OpAction::Update => "~update".yellow().to_string(),
            OpAction::Delete => "-delete".red().to_string(),
            OpAction::Noop => "noop".dimmed().to_string(),
        };
        if part_of_replace {
            format!("{rendered} (replace)")
        } else {
            rendered
        }
    }

    /// Formats an outcome with color.
    fn format_outcome(outcome: &OperationOutcome) -> String {
        match outcome {
            OperationOutcome::Succeeded => "succeeded".green().to_string(),
            OperationOutcome::Failed { .. } => "failed".red().to_string(),
            OperationOutcome::Blocked { on } => format!("{} (on {on})", "blocked".red()),
            OperationOutcome::Skipped => "skipped".dimmed().to_string(),
            OperationOutcome::Cancelled => "cancelled".yellow().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters. Counts
    /// characters rather than bytes so multi-byte input (attribute names
    /// and remote identifiers are not ours to choose) never splits.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    created_at: String,
    operation_count: usize,
    creates: usize,
    updates: usize,
    deletes: usize,
    operations: Vec<OperationJson>,
}

#[derive(serde::Serialize)]
struct OperationJson {
    action: String,
    resource: String,
    kind: String,
    reason: String,
    part_of_replace: bool,
    depends_on: Vec<usize>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            created_at: plan.created_at.to_rfc3339(),
            operation_count: plan.len(),
            creates: plan.count(OpAction::Create),
            updates: plan.count(OpAction::Update),
            deletes: plan.count(OpAction::Delete),
            operations: plan
                .operations
                .iter()
                .map(|op| OperationJson {
                    action: op.action.to_string(),
                    resource: op.resource.clone(),
                    kind: op.kind.clone(),
                    reason: op.reason.clone(),
                    part_of_replace: op.part_of_replace,
                    depends_on: op.depends_on.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson {
    started_at: String,
    finished_at: String,
    succeeded: usize,
    failed: usize,
    blocked: usize,
    skipped: usize,
    cancelled: usize,
    clean: bool,
    results: Vec<ResultJson>,
}

#[derive(serde::Serialize)]
struct ResultJson {
    resource: String,
    kind: String,
    action: String,
    outcome: String,
    detail: Option<String>,
}

impl From<&ApplyReport> for ReportJson {
    fn from(report: &ApplyReport) -> Self {
        Self {
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.to_rfc3339(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            blocked: report.blocked(),
            skipped: report.skipped(),
            cancelled: report.cancelled(),
            clean: report.is_clean(),
            results: report
                .results
                .iter()
                .map(|r| {
                    let (outcome, detail) = match &r.outcome {
                        OperationOutcome::Succeeded => (String::from("succeeded"), None),
                        OperationOutcome::Failed { error } => {
                            (String::from("failed"), Some(error.clone()))
                        }
                        OperationOutcome::Blocked { on } => {
                            (String::from("blocked"), Some(on.clone()))
                        }
                        OperationOutcome::Skipped => (String::from("skipped"), None),
                        OperationOutcome::Cancelled => (String::from("cancelled"), None),
                    };
                    ResultJson {
                        resource: r.resource.clone(),
                        kind: r.kind.clone(),
                        action: r.action.to_string(),
                        outcome,
                        detail,
                    }
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct StateJson {
    resource_count: usize,
    records: Vec<RecordJson>,
}

#[derive(serde::Serialize)]
struct RecordJson {
    id: String,
    kind: String,
    remote_id: String,
    attr_hash: String,
    outputs: std::collections::BTreeMap<String, String>,
    created_at: String,
    updated_at: String,
}

impl From<&StateSnapshot> for StateJson {
    fn from(state: &StateSnapshot) -> Self {
        Self {
            resource_count: state.len(),
            records: state
                .records()
                .map(|r| RecordJson {
                    id: r.id.clone(),
                    kind: r.kind.clone(),
                    remote_id: r.remote_id.clone(),
                    attr_hash: r.attr_hash.clone(),
                    outputs: r.outputs.clone(),
                    created_at: r.created_at.to_rfc3339(),
                    updated_at: r.updated_at.to_rfc3339(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_unchanged() {
        assert_eq!(OutputFormatter::truncate("web-sg", 40), "web-sg");
    }

    #[test]
    fn test_truncate_long_string_is_capped() {
        let out = OutputFormatter::truncate(&"a".repeat(100), 40);
        assert_eq!(out.len(), 40);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_truncate_multibyte_keeps_char_boundaries() {
        // Attribute names feed operation reasons verbatim, so the input
        // is not guaranteed to be ASCII.
        let reason = "Changed: r\u{e9}seau_priv\u{e9}_".repeat(10);
        let out = OutputFormatter::truncate(&reason, 40);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 40);
    }
}
