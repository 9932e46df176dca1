//! Output formatting for CLI commands.
//!
//! Every `format_*` method renders either a human-readable report with
//! colors and tables, or pretty JSON for scripting.

use colored::Colorize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::io::Write as _;
use tabled::{Table, Tabled};

use crate::apply::ActionKind;
use crate::planner::ApplyPlan;
use crate::plugin::{CollectedResources, InstanceEndpoints};
use crate::policy::ValidationResult;
use crate::reconciler::{DriftReport, ReconciliationResult};
use crate::resolve::{DependencyOutcome, PolicyResolution};
use crate::state::{RevisionStatus, StoredState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Dependency outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Component instance row for table display.
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Dependencies")]
    dependencies: usize,
    #[tabled(rename = "Edges")]
    edges: usize,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Endpoint row for table display.
#[derive(Tabled)]
struct EndpointRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "Deploy name")]
    deploy_name: String,
    #[tabled(rename = "Endpoint")]
    name: String,
    #[tabled(rename = "URL")]
    url: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a policy validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                to_json(&json)
            }
            OutputFormat::Text => {
                let mut output = String::new();
                if result.is_valid() {
                    let _ = writeln!(output, "{} Policy is valid", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Policy has {} problem(s):",
                        "✗".red(),
                        result.errors.len()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {}: {}", error.field.bold(), error.message);
                    }
                }
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

    /// Formats a resolution, optionally restricted to one dependency.
    #[must_use]
    pub fn format_resolution(
        &self,
        resolution: &PolicyResolution,
        dependency: Option<&str>,
        show_instances: bool,
    ) -> String {
        let outcomes: BTreeMap<&String, &DependencyOutcome> = resolution
            .dependency_outcomes
            .iter()
            .filter(|(key, _)| dependency.is_none_or(|d| d == key.as_str()))
            .collect();
        let instances: Vec<_> = resolution
            .component_instances
            .values()
            .filter(|i| dependency.is_none_or(|d| i.dependency_keys.contains_key(d)))
            .collect();

        match self.format {
            OutputFormat::Json => {
                let listed = if show_instances {
                    serde_json::to_value(&instances).unwrap_or_default()
                } else {
                    serde_json::Value::Null
                };
                let json = serde_json::json!({ "outcomes": outcomes, "instances": listed });
                to_json(&json)
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let rows: Vec<OutcomeRow> = outcomes
                    .iter()
                    .map(|(key, outcome)| OutcomeRow {
                        dependency: (*key).clone(),
                        status: Self::format_outcome_status(outcome),
                        detail: Self::truncate(&Self::outcome_detail(outcome), 60),
                    })
                    .collect();

                if rows.is_empty() {
                    let _ = writeln!(output, "No dependencies.");
                } else {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if show_instances && !instances.is_empty() {
                    let rows: Vec<InstanceRow> = instances
                        .iter()
                        .map(|i| InstanceRow {
                            key: i.key.key(),
                            code: i.code_type.clone().unwrap_or_else(|| String::from("-")),
                            dependencies: i.dependency_keys.len(),
                            edges: i.edges_out.len(),
                        })
                        .collect();
                    let _ = write!(output, "\nComponent instances ({}):\n", rows.len());
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats an apply plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ApplyPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ApplyPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!("{} No changes required - actual state is up to date.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = write!(output, "\nApply Plan\n");
        let _ = write!(output, "   Policy hash: {}\n\n", short(&plan.policy_hash));

        let mut index = 0;
        let mut rows = Vec::with_capacity(plan.action_count());
        for (wave_index, wave) in plan.waves.iter().enumerate() {
            for planned in &wave.actions {
                index += 1;
                let detail = if detailed && !planned.changed_fields.is_empty() {
                    planned.changed_fields.join(", ")
                } else {
                    planned.action.dependency().unwrap_or_default().to_string()
                };
                rows.push(PlanActionRow {
                    index,
                    wave: wave_index,
                    action: Self::format_action_kind(planned.action.kind()),
                    instance: Self::truncate(planned.action.key(), 70),
                    detail,
                });
            }
        }
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let counts = plan.counts;
        let _ = write!(
            output,
            "\nPlan: {} to instantiate, {} to update, {} to destroy, {} to attach, {} to detach\n",
            counts.instantiate.to_string().green(),
            counts.update.to_string().yellow(),
            counts.destroy.to_string().red(),
            counts.attach.to_string().green(),
            counts.detach.to_string().red()
        );
        output
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    format!("{} No drift detected - state is converged.\n", "✓".green())
                } else {
                    let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                    for action in &report.pending_actions {
                        let _ = writeln!(output, "   - {action}");
                    }
                    let _ = write!(
                        output,
                        "\n{} pending actions ({} actual, {} desired instances).\n",
                        report.pending_actions.len(),
                        report.actual_count,
                        report.desired_count
                    );
                    output
                }
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
                    format!("{} Apply successful", "✓".green())
                } else {
                    format!("{} Apply finished with failures", "✗".red())
                };

                let mut output = format!("{status} (generation {})\n\n", result.generation);
                let _ = writeln!(output, "   Succeeded: {}", result.succeeded);
                let _ = writeln!(output, "   Failed: {}", result.failed);
                let _ = writeln!(output, "   Skipped: {}", result.skipped);

                let unresolved: Vec<_> = result
                    .outcomes
                    .iter()
                    .filter(|(_, o)| !matches!(o, DependencyOutcome::Resolved { .. }))
                    .collect();
                if !unresolved.is_empty() {
                    let _ = write!(output, "\n{} Unresolved dependencies:\n", "⚠".yellow());
                    for (key, outcome) in unresolved {
                        let _ = writeln!(output, "   - {key}: {outcome}");
                    }
                }

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                output
            }
        }
    }

    /// Formats endpoints per dependency.
    #[must_use]
    pub fn format_endpoints(&self, endpoints: &BTreeMap<String, Vec<InstanceEndpoints>>) -> String {
        match self.format {
            OutputFormat::Json => to_json(endpoints),
            OutputFormat::Text => {
                let rows: Vec<EndpointRow> = endpoints
                    .iter()
                    .flat_map(|(dependency, instances)| {
                        instances.iter().flat_map(move |instance| {
                            instance.endpoints.iter().map(move |(name, url)| EndpointRow {
                                dependency: dependency.clone(),
                                deploy_name: instance.deploy_name.clone(),
                                name: name.clone(),
                                url: url.clone(),
                            })
                        })
                    })
                    .collect();
                if rows.is_empty() {
                    return String::from("No endpoints.\n");
                }
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats collected plugin resources.
    #[must_use]
    pub fn format_resources(&self, collected: &CollectedResources) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "resources": collected.resources,
                    "error": collected.error.as_ref().map(ToString::to_string),
                });
                to_json(&json)
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (resource_type, table) in &collected.resources {
                    let _ = writeln!(output, "{}", resource_type.bold());
                    let mut builder = tabled::builder::Builder::default();
                    builder.push_record(table.headers.iter().cloned());
                    for item in &table.items {
                        builder.push_record(item.iter().cloned());
                    }
                    let _ = writeln!(output, "{}\n", builder.build());
                }
                if collected.resources.is_empty() {
                    output.push_str("No resources.\n");
                }
                if let Some(error) = &collected.error {
                    let _ = writeln!(output, "{} {error}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats the stored state.
    #[must_use]
    pub fn format_state(&self, state: &StoredState, revisions: usize) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState (generation {})\n\n", state.generation());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Instances: {}", state.actual.component_instances.len());
                let _ = writeln!(output, "   Dependencies: {}", state.actual.dependency_outcomes.len());

                if !state.revisions.is_empty() && revisions > 0 {
                    let _ = writeln!(output, "\n   Recent revisions ({}):", state.revisions.len());
                    for revision in state.revisions.iter().rev().take(revisions) {
                        let status = match revision.status {
                            RevisionStatus::Applied => "✓".green(),
                            RevisionStatus::PartiallyApplied => "~".yellow(),
                            RevisionStatus::Failed => "✗".red(),
                        };
                        let _ = writeln!(
                            output,
                            "     {status} #{} {} - {} (policy {})",
                            revision.generation,
                            revision.created_at.format("%Y-%m-%d %H:%M"),
                            revision.counts,
                            short(&revision.policy_hash)
                        );
                    }
                }

                output
            }
        }
    }

    /// Writes a rendered report to stdout.
    pub fn emit(&self, rendered: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(rendered.as_bytes());
        if !rendered.ends_with('\n') {
            let _ = stdout.write_all(b"\n");
        }
    }

    /// Prints a success message.
    pub fn success(&self, message: &str) {
        self.status_line("success", &"✓".green().to_string(), message);
    }

    /// Prints an error message.
    pub fn error(&self, message: &str) {
        self.status_line("error", &"✗".red().to_string(), message);
    }

    /// Prints a warning message.
    pub fn warning(&self, message: &str) {
        self.status_line("warning", &"⚠".yellow().to_string(), message);
    }

    fn status_line(&self, status: &str, marker: &str, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                eprintln!("{json}");
            }
            OutputFormat::Text => eprintln!("{marker} {message}"),
        }
    }

    /// Formats an action kind with color.
    fn format_action_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Instantiate => "+instantiate".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::AttachDependency => "+attach".cyan().to_string(),
            ActionKind::DetachDependency => "-detach".magenta().to_string(),
            ActionKind::Destroy => "-destroy".red().to_string(),
        }
    }

    /// Formats a dependency outcome status with color.
    fn format_outcome_status(outcome: &DependencyOutcome) -> String {
        match outcome {
            DependencyOutcome::Resolved { .. } => "resolved".green().to_string(),
            DependencyOutcome::Rejected { .. } => "rejected".yellow().to_string(),
            DependencyOutcome::Failed { .. } => "failed".red().to_string(),
        }
    }

    fn outcome_detail(outcome: &DependencyOutcome) -> String {
        match outcome {
            DependencyOutcome::Resolved { root } => root.clone(),
            DependencyOutcome::Rejected { reason, rule } => format!("{reason:?} rejected by {rule}"),
            DependencyOutcome::Failed { kind, message } => format!("{kind}: {message}"),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    policy_hash: String,
    action_count: usize,
    counts: crate::state::ActionCounts,
    waves: Vec<WaveJson>,
}

#[derive(serde::Serialize)]
struct WaveJson {
    phase: crate::apply::Phase,
    height: usize,
    actions: Vec<serde_json::Value>,
}

impl From<&ApplyPlan> for PlanJson {
    fn from(plan: &ApplyPlan) -> Self {
        Self {
            policy_hash: plan.policy_hash.clone(),
            action_count: plan.action_count(),
            counts: plan.counts,
            waves: plan
                .waves
                .iter()
                .map(|wave| WaveJson {
                    phase: wave.phase,
                    height: wave.height,
                    actions: wave
                        .actions
                        .iter()
                        .map(|planned| {
                            let mut changes = planned.action.describe_changes();
                            if let Some(fields) = changes.as_object_mut() {
                                fields.insert(
                                    String::from("prerequisites"),
                                    serde_json::json!(planned.prerequisites),
                                );
                            }
                            changes
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DiffEngine;
    use crate::test_support::{instance, resolution};

    fn plan() -> ApplyPlan {
        let leaf = instance("db", "data", &[]);
        let root = instance("db", "api", &[&leaf]);
        let desired = resolution(&[&leaf, &root]);
        let actual = PolicyResolution::new();
        let diff = DiffEngine::new().compute_diff(&actual, &desired);
        ApplyPlan::from_diff(diff, &actual, &desired, "0123456789abcdef")
    }

    #[test]
    fn test_plan_text_lists_every_action() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), false);
        assert!(text.contains("Policy hash: 01234567"));
        assert!(text.contains("+instantiate"));
        assert!(text.contains("2 to instantiate"));
    }

    #[test]
    fn test_plan_json_is_structured() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["action_count"], 2);
        assert_eq!(value["waves"].as_array().unwrap().len(), 2);
        assert_eq!(value["waves"][1]["actions"][0]["prerequisites"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_plan_text() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&ApplyPlan::empty("h"), true);
        assert!(text.contains("No changes required"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(OutputFormatter::truncate("ééééé", 4), "é...");
        assert_eq!(OutputFormatter::truncate("abc", 4), "abc");
    }
}
