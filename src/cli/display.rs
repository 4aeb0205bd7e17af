//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use std::collections::BTreeMap;
use std::fmt::Display;

use crate::config::{ValidationResult, ValidationSeverity};
use crate::controller::StatsSnapshot;
use crate::simulation::{PassRecord, Plan};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    let upper: Vec<String> = headers.iter().map(|h| h.to_uppercase()).collect();
    push_row(&mut output, &upper, &widths);
    for row in &rows {
        push_row(&mut output, row, &widths);
    }
    output
}

fn push_row(output: &mut String, cells: &[String], widths: &[usize]) {
    let last = cells.len().saturating_sub(1);
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        // no trailing padding on the last column
        match widths.get(i) {
            Some(width) if i < last => output.push_str(&format!("{:width$}", cell, width = width)),
            _ => output.push_str(cell),
        }
    }
    output.push('\n');
}

/// `key=value` pairs joined by commas, or `-` when empty
fn join_counts<K: Display, V: Display>(map: &BTreeMap<K, V>) -> String {
    if map.is_empty() {
        return "-".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Simulation display
// ============================================================================

/// One row per pass: outcome, replicas per machine set, machines per state
pub fn format_pass_table(records: &[PassRecord]) -> String {
    let headers = &["PASS", "OUTCOME", "REPLICAS", "STATES", "AGENT", "ERROR"];
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            let outcome = r
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "failed".to_string());
            let agent = if r.agent.is_empty() && r.marked.is_empty() {
                "-".to_string()
            } else {
                let mut parts = vec![
                    format!("drained={}", r.agent.drained.len()),
                    format!("updated={}", r.agent.updated.len()),
                ];
                if !r.marked.is_empty() {
                    parts.push(format!("marked={}", r.marked.len()));
                }
                parts.join(",")
            };
            vec![
                r.pass.to_string(),
                outcome,
                join_counts(&r.replicas),
                join_counts(&r.states),
                agent,
                r.error.clone().unwrap_or_default(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Plan display
// ============================================================================

/// Budget breakdown and the machines the next pass would select
pub fn format_plan(plan: &Plan) -> String {
    let budget = &plan.budget;
    let mut output = String::new();

    output.push_str(&format!("Deployment:      {}\n", plan.deployment));
    output.push_str(&format!("New machine set: {}\n", plan.new_machine_set));

    output.push_str("\nBudget:\n");
    output.push_str(&format!("  Replicas:            {}\n", budget.all_replicas));
    output.push_str(&format!("  Min Available:       {}\n", budget.min_available));
    output.push_str(&format!("  New Unavailable:     {}\n", budget.new_unavailable));
    output.push_str(&format!("  In Flight:           {}\n", budget.old_in_flight));
    output.push_str(&format!(
        "  Max Update Possible: {}\n",
        budget.max_update_possible()
    ));
    output.push_str(&format!("  Selection Cap:       {}\n", budget.selection_cap()));

    output.push_str("\nOld machine sets (oldest first):\n");
    let rows: Vec<Vec<String>> = plan
        .old_machine_sets
        .iter()
        .map(|(name, desired, available)| {
            vec![name.clone(), desired.to_string(), available.to_string()]
        })
        .collect();
    output.push_str(&format_table(&["NAME", "DESIRED", "AVAILABLE"], rows));

    if plan.would_select.is_empty() {
        output.push_str("\nNothing would be selected this pass.\n");
    } else {
        output.push_str("\nWould select:\n");
        for name in &plan.would_select {
            output.push_str(&format!("  - {}\n", name));
        }
    }

    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.passed {
        output.push_str(&format!("✓ {} is valid\n", path));
    } else {
        output.push_str(&format!("✗ {} is invalid\n", path));
    }

    if !result.messages.is_empty() {
        output.push('\n');
    }
    for msg in &result.messages {
        let level = match msg.severity {
            ValidationSeverity::Info => "info",
            ValidationSeverity::Warning => "warning",
            ValidationSeverity::Error => "error",
        };
        output.push_str(&format!("  {} [{}] {}\n", level, msg.code, msg.message));
        if let Some(ref suggestion) = msg.suggestion {
            output.push_str(&format!("      hint: {}\n", suggestion));
        }
    }

    output
}

// ============================================================================
// Controller display
// ============================================================================

/// Format controller counters after `run` stops
pub fn format_stats(stats: &StatsSnapshot) -> String {
    let mut output = String::new();

    output.push_str("Controller Stats\n");
    output.push_str("================\n\n");
    output.push_str(&format!("Passes:      {}\n", stats.passes));
    output.push_str(&format!("Transferred: {}\n", stats.transferred));
    output.push_str(&format!("Selected:    {}\n", stats.selected));
    output.push_str(&format!("Completed:   {}\n", stats.completed));
    output.push_str(&format!("Idle:        {}\n", stats.idle));
    output.push_str(&format!("Skipped:     {}\n", stats.skipped));
    output.push_str(&format!("Failures:    {}\n", stats.failures));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::UpdateState;
    use crate::rollout::{PassOutcome, UpdateBudget};
    use crate::simulation::AgentStep;

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&["name"], vec![]), "No resources found.\n");
    }

    #[test]
    fn test_format_table_aligns_columns() {
        let out = format_table(
            &["name", "replicas"],
            vec![
                vec!["workers-v1".to_string(), "3".to_string()],
                vec!["v2".to_string(), "12".to_string()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME         REPLICAS");
        assert_eq!(lines[1], "workers-v1   3");
        assert_eq!(lines[2], "v2           12");
    }

    fn record(pass: usize, outcome: Option<PassOutcome>) -> PassRecord {
        let mut replicas = BTreeMap::new();
        replicas.insert("workers-v1".to_string(), 2);
        replicas.insert("workers-v2".to_string(), 1);
        let mut states = BTreeMap::new();
        states.insert(UpdateState::Candidate, 2);
        states.insert(UpdateState::Successful, 1);
        PassRecord {
            pass,
            outcome,
            error: None,
            replicas,
            states,
            agent: AgentStep::default(),
            marked: vec![],
        }
    }

    #[test]
    fn test_format_pass_table() {
        let mut failed = record(2, None);
        failed.error = Some("injected failure".to_string());
        failed.agent.updated.push("node-a".to_string());

        let out = format_pass_table(&[record(1, Some(PassOutcome::Transferred)), failed]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PASS"));
        assert!(lines[1].contains("transferred"));
        assert!(lines[1].contains("workers-v1=2,workers-v2=1"));
        assert!(lines[1].contains("candidate=2,successful=1"));
        assert!(lines[2].contains("failed"));
        assert!(lines[2].contains("drained=0,updated=1"));
        assert!(lines[2].ends_with("injected failure"));
    }

    #[test]
    fn test_format_plan() {
        let plan = Plan {
            deployment: "default/workers".to_string(),
            new_machine_set: "workers-v2".to_string(),
            budget: UpdateBudget {
                desired_replicas: 4,
                max_unavailable: 1,
                min_available: 3,
                all_replicas: 4,
                available_replicas: 4,
                new_unavailable: 0,
                old_in_flight: 0,
            },
            old_machine_sets: vec![("workers-v1".to_string(), 4, 4)],
            would_select: vec!["m0".to_string()],
        };
        let out = format_plan(&plan);
        assert!(out.contains("Deployment:      default/workers"));
        assert!(out.contains("Max Update Possible: 1"));
        assert!(out.contains("Selection Cap:       1"));
        assert!(out.contains("workers-v1"));
        assert!(out.contains("  - m0"));
    }

    #[test]
    fn test_format_plan_nothing_selected() {
        let plan = Plan {
            deployment: "default/workers".to_string(),
            new_machine_set: "workers-v2".to_string(),
            budget: UpdateBudget {
                desired_replicas: 2,
                max_unavailable: 1,
                min_available: 1,
                all_replicas: 2,
                available_replicas: 1,
                new_unavailable: 0,
                old_in_flight: 1,
            },
            old_machine_sets: vec![],
            would_select: vec![],
        };
        let out = format_plan(&plan);
        assert!(out.contains("No resources found."));
        assert!(out.contains("Nothing would be selected this pass."));
    }

    #[test]
    fn test_format_validation() {
        let mut result = ValidationResult::new();
        assert!(format_validation(&result, "fleet.yaml").starts_with("✓ fleet.yaml is valid"));

        result.error(
            "SHARED_NODE",
            "node-0 backs m0 and m1".to_string(),
            Some("give every machine its own node"),
        );
        let out = format_validation(&result, "fleet.yaml");
        assert!(out.starts_with("✗ fleet.yaml is invalid"));
        assert!(out.contains("error [SHARED_NODE] node-0 backs m0 and m1"));
        assert!(out.contains("hint: give every machine its own node"));
    }

    #[test]
    fn test_format_stats() {
        let stats = StatsSnapshot {
            passes: 7,
            failures: 1,
            ..Default::default()
        };
        let out = format_stats(&stats);
        assert!(out.contains("Passes:      7"));
        assert!(out.contains("Failures:    1"));
    }
}
