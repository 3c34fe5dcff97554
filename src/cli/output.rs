//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::hosting::{Image, Region};
use crate::planner::{ActionType, ExecutionPlan};
use crate::reconciler::{DriftReport, PlanPreview, ReconciliationResult, RefreshReport};
use crate::state::ManagedState;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Managed resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a computed plan for display.
    #[must_use]
    pub fn format_plan(&self, preview: &PlanPreview) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(preview)),
            OutputFormat::Text => Self::format_plan_text(preview),
        }
    }

    fn format_plan_text(preview: &PlanPreview) -> String {
        let mut output = String::new();
        if let Some(refresh) = &preview.refresh {
            for address in &refresh.drifted {
                let _ = writeln!(output, "{} {address} changed outside of hostwright", "~".yellow());
            }
            for address in &refresh.vanished {
                let _ = writeln!(output, "{} {address} no longer exists", "-".red());
            }
        }

        let plan = &preview.plan;
        if plan.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes required - resources are up to date.",
                "✓".green()
            );
            return output;
        }

        let _ = writeln!(output, "\nExecution Plan");
        let _ = write!(output, "   Config hash: {}\n\n", short(&plan.config_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address.to_string(),
                id: a.id.clone().unwrap_or_else(|| String::from("-")),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Replace).to_string().magenta(),
            plan.count(ActionType::Delete).to_string().red()
        );
        output
    }

    /// Formats the managed resources for display.
    #[must_use]
    pub fn format_status(&self, state: &ManagedState) -> String {
        match self.format {
            OutputFormat::Json => to_json(&state.resources),
            OutputFormat::Text => {
                if state.is_empty() {
                    return String::from("   No resources managed.\n");
                }

                let rows: Vec<ResourceRow> = state
                    .resources
                    .values()
                    .map(|r| ResourceRow {
                        address: r.address.to_string(),
                        id: r.id.clone(),
                        status: if r.drifted {
                            "drifted".yellow().to_string()
                        } else {
                            "in sync".green().to_string()
                        },
                        hash: short(&r.config_hash).to_string(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let drifted = state.drifted().len();
                let _ = write!(
                    output,
                    "\n\n{} resources managed, {} drifted\n",
                    state.len(),
                    drifted
                );
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }
                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for resource in &report.drifted_resources {
                    let _ = writeln!(output, "   {} {resource} changed remotely", "~".yellow());
                }
                for resource in &report.vanished_resources {
                    let _ = writeln!(output, "   {} {resource} no longer exists", "-".red());
                }
                if !report.pending_changes.is_empty() {
                    output.push_str("\n   Pending changes:\n");
                    for change in &report.pending_changes {
                        let _ = writeln!(output, "     {change}");
                    }
                }
                let _ = write!(
                    output,
                    "\n{} declared, {} managed.\n",
                    report.total_resources, report.managed_count
                );
                output
            }
        }
    }

    /// Formats a refresh report.
    #[must_use]
    pub fn format_refresh(&self, report: &RefreshReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let mut output = format!("{} {report}\n", "✓".green());
                for address in &report.drifted {
                    let _ = writeln!(output, "   {} {address}", "~".yellow());
                }
                for address in &report.vanished {
                    let _ = writeln!(output, "   {} {address}", "-".red());
                }
                output
            }
        }
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let status = if result.success {
                    format!("{} Reconciliation successful", "✓".green())
                } else {
                    format!("{} Reconciliation failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Replaced: {}", result.replaced);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);
                if result.skipped > 0 {
                    let _ = writeln!(output, "   Skipped: {}", result.skipped);
                }

                if !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, state: &ManagedState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::from("\nState\n\n");

                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Config hash: {}", short(&state.config_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.len());

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid!\n", "✓".green())
                } else {
                    let mut text = format!("{} Configuration is invalid:\n", "✗".red());
                    for error in &result.errors {
                        let _ = writeln!(text, "   - {error}");
                    }
                    text
                };
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a region lookup.
    #[must_use]
    pub fn format_region(&self, region: &Region) -> String {
        match self.format {
            OutputFormat::Json => to_json(region),
            OutputFormat::Text => format!(
                "Region {} (id {}, {})\n",
                region.code.bold(),
                region.id,
                region.country
            ),
        }
    }

    /// Formats an image lookup.
    #[must_use]
    pub fn format_image(&self, image: &Image) -> String {
        match self.format {
            OutputFormat::Json => to_json(image),
            OutputFormat::Text => format!(
                "Image {} (id {}, disk {}, {} GB, region {})\n",
                image.name.bold(),
                image.id,
                image.disk_id,
                image.size_gb,
                image.region_id
            ),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Replace => "±replace".magenta().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => text.to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    drifted: Vec<String>,
    vanished: Vec<String>,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    id: Option<String>,
    reason: String,
    depends_on: Vec<usize>,
}

impl From<&PlanPreview> for PlanJson {
    fn from(preview: &PlanPreview) -> Self {
        let plan: &ExecutionPlan = &preview.plan;
        let (drifted, vanished) = preview
            .refresh
            .as_ref()
            .map(|r| (r.drifted.clone(), r.vanished.clone()))
            .unwrap_or_default();
        Self {
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            replaces: plan.count(ActionType::Replace),
            deletes: plan.count(ActionType::Delete),
            drifted,
            vanished,
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.address.to_string(),
                    id: a.id.clone(),
                    reason: a.reason.clone(),
                    depends_on: a.dependencies.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ChangeSet;

    #[test]
    fn test_empty_plan_json() {
        let preview = PlanPreview {
            changes: ChangeSet::default(),
            plan: ExecutionPlan::empty("0123456789abcdef"),
            refresh: None,
        };
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&preview);
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

        assert_eq!(value["action_count"], 0);
        assert_eq!(value["config_hash"], "0123456789abcdef");
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("é".repeat(12).as_str(), 8), "ééééé...");
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short("0123456789"), "01234567");
        assert_eq!(short("abc"), "abc");
    }
}
