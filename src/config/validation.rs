//! Snapshot validation
//!
//! Static checks run by `inplace-rollout validate` before a snapshot is
//! simulated. Nothing here talks to a cluster; every check looks only at
//! the objects in the snapshot.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::ClusterSnapshot;
use crate::cluster::get_replica_count_for_machine_sets;
use crate::labels::{validate_label_key, validate_label_value, Labels};

/// Validation result with severity levels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ValidationSeverity {
    /// Informational hint
    Info,
    /// Warning - a rollout may stall or behave unexpectedly
    Warning,
    /// Error - the orchestrator will refuse or corrupt state
    Error,
}

/// A single validation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    pub code: String,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Validation result containing all messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub messages: Vec<ValidationMessage>,
    pub passed: bool,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            passed: true,
        }
    }

    pub fn add(&mut self, msg: ValidationMessage) {
        if msg.severity == ValidationSeverity::Error {
            self.passed = false;
        }
        self.messages.push(msg);
    }

    pub fn info(&mut self, code: &str, message: String) {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Info,
            code: code.to_string(),
            message,
            suggestion: None,
        });
    }

    pub fn warning(&mut self, code: &str, message: String, suggestion: Option<&str>) {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Warning,
            code: code.to_string(),
            message,
            suggestion: suggestion.map(String::from),
        });
    }

    pub fn error(&mut self, code: &str, message: String, suggestion: Option<&str>) {
        self.add(ValidationMessage {
            severity: ValidationSeverity::Error,
            code: code.to_string(),
            message,
            suggestion: suggestion.map(String::from),
        });
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == ValidationSeverity::Warning)
    }

    /// Messages carrying `code`
    pub fn with_code(&self, code: &str) -> Vec<&ValidationMessage> {
        self.messages.iter().filter(|m| m.code == code).collect()
    }
}

// ============================================================================
// SBIO: Pure validation logic (no I/O)
// ============================================================================

/// Run every check against `snapshot`
pub fn validate_snapshot(snapshot: &ClusterSnapshot) -> ValidationResult {
    let mut result = ValidationResult::new();

    check_labels(snapshot, &mut result);
    check_strategy(snapshot, &mut result);
    check_names(snapshot, &mut result);
    check_replicas(snapshot, &mut result);
    check_machines(snapshot, &mut result);

    result
}

fn check_label_map(owner: &str, labels: &Labels, result: &mut ValidationResult) {
    for (key, value) in labels {
        if let Err(e) = validate_label_key(key) {
            result.error("INVALID_LABEL", format!("{}: {}", owner, e), None);
        }
        if let Err(e) = validate_label_value(key, value) {
            result.error("INVALID_LABEL", format!("{}: {}", owner, e), None);
        }
    }
}

fn check_labels(snapshot: &ClusterSnapshot, result: &mut ValidationResult) {
    let d = &snapshot.deployment;
    let owner = format!("deployment {}", d.name());
    check_label_map(&owner, &d.metadata.labels, result);
    check_label_map(&owner, &d.spec.selector.match_labels, result);
    check_label_map(&owner, &d.spec.template.labels, result);

    for set in &snapshot.machine_sets {
        let owner = format!("machine set {}", set.name());
        check_label_map(&owner, &set.metadata.labels, result);
        check_label_map(&owner, &set.spec.selector.match_labels, result);
    }
    for machine in &snapshot.machines {
        check_label_map(&format!("machine {}", machine.name()), machine.labels(), result);
    }
    for node in &snapshot.nodes {
        check_label_map(&format!("node {}", node.name()), node.labels(), result);
    }
}

fn check_strategy(snapshot: &ClusterSnapshot, result: &mut ValidationResult) {
    let d = &snapshot.deployment;

    if d.orchestration_type().is_none() {
        result.error(
            "UNSUPPORTED_STRATEGY",
            format!(
                "Deployment {} uses strategy {}, not an in-place update",
                d.name(),
                d.spec.strategy.strategy_type
            ),
            Some("Set spec.strategy.type to InPlaceUpdate"),
        );
    }

    if let Err(e) = d.validate_strategy() {
        result.error(
            "INVALID_BUDGET",
            format!("Deployment {}: {}", d.name(), e),
            Some("Use a non-negative integer or a percentage like \"25%\""),
        );
    }

    if d.spec.replicas < 0 {
        result.error(
            "NEGATIVE_REPLICAS",
            format!("Deployment {} wants {} replicas", d.name(), d.spec.replicas),
            None,
        );
    }

    if d.spec.selector.match_labels.is_empty() {
        result.warning(
            "EMPTY_SELECTOR",
            format!("Deployment {} has an empty selector", d.name()),
            Some("An empty selector claims every machine set in the namespace"),
        );
    } else if !d.spec.selector.matches(&d.spec.template.labels) {
        result.error(
            "SELECTOR_MISMATCH",
            format!(
                "Deployment {} selector does not match its own template labels",
                d.name()
            ),
            Some("Add the selector labels to spec.template.labels"),
        );
    }

    if d.spec.paused {
        result.info(
            "PAUSED",
            format!("Deployment {} is paused; passes only sync status", d.name()),
        );
    }
}

fn check_names(snapshot: &ClusterSnapshot, result: &mut ValidationResult) {
    let mut seen = BTreeSet::new();
    for set in &snapshot.machine_sets {
        if !seen.insert(set.metadata.qualified_name()) {
            result.error(
                "DUPLICATE_NAME",
                format!("Machine set {} appears twice", set.metadata.qualified_name()),
                None,
            );
        }
    }
    let mut seen = BTreeSet::new();
    for machine in &snapshot.machines {
        if !seen.insert(machine.metadata.qualified_name()) {
            result.error(
                "DUPLICATE_NAME",
                format!("Machine {} appears twice", machine.metadata.qualified_name()),
                None,
            );
        }
    }
    let mut seen = BTreeSet::new();
    for node in &snapshot.nodes {
        if !seen.insert(node.name()) {
            result.error(
                "DUPLICATE_NAME",
                format!("Node {} appears twice", node.name()),
                None,
            );
        }
    }
}

fn check_replicas(snapshot: &ClusterSnapshot, result: &mut ValidationResult) {
    let d = &snapshot.deployment;
    let owned: Vec<_> = snapshot
        .machine_sets
        .iter()
        .filter(|s| d.spec.selector.matches(&s.spec.template.labels))
        .cloned()
        .collect();

    for set in &snapshot.machine_sets {
        if set.replicas() < 0 {
            result.error(
                "NEGATIVE_REPLICAS",
                format!("Machine set {} wants {} replicas", set.name(), set.replicas()),
                None,
            );
        }
        if !d.spec.selector.matches(&set.spec.template.labels) {
            result.warning(
                "FOREIGN_MACHINE_SET",
                format!(
                    "Machine set {} is not selected by deployment {}",
                    set.name(),
                    d.name()
                ),
                None,
            );
        }
    }

    let total = get_replica_count_for_machine_sets(&owned);
    if !owned.is_empty() && total != d.spec.replicas {
        result.warning(
            "REPLICA_MISMATCH",
            format!(
                "Machine sets of {} want {} replicas in total, deployment wants {}",
                d.name(),
                total,
                d.spec.replicas
            ),
            Some("In-place rollouts move machines, they never create them"),
        );
    }
}

fn check_machines(snapshot: &ClusterSnapshot, result: &mut ValidationResult) {
    let nodes: BTreeSet<&str> = snapshot.nodes.iter().map(|n| n.name()).collect();
    let mut node_users: HashMap<&str, Vec<&str>> = HashMap::new();

    for machine in &snapshot.machines {
        match machine.node_name() {
            Some(node) => {
                if !nodes.contains(node) {
                    result.warning(
                        "MISSING_NODE",
                        format!("Machine {} points at unknown node {}", machine.name(), node),
                        Some("The machine counts as unavailable until its node exists"),
                    );
                }
                node_users.entry(node).or_default().push(machine.name());
            }
            None => result.info(
                "UNJOINED_MACHINE",
                format!("Machine {} has no node yet", machine.name()),
            ),
        }

        let owners: Vec<_> = snapshot
            .machine_sets
            .iter()
            .filter(|s| s.spec.selector.matches(machine.labels()))
            .collect();
        match owners.as_slice() {
            [] => result.warning(
                "ORPHAN_MACHINE",
                format!("Machine {} is not selected by any machine set", machine.name()),
                None,
            ),
            [owner] => {
                if !machine.is_controlled_by(owner.metadata.uid) {
                    result.warning(
                        "OWNER_MISMATCH",
                        format!(
                            "Machine {} matches {} but its controller reference points elsewhere",
                            machine.name(),
                            owner.name()
                        ),
                        Some("Set ownerReferences to the machine set's uid"),
                    );
                }
            }
            many => result.error(
                "AMBIGUOUS_OWNER",
                format!(
                    "Machine {} is selected by {} machine sets",
                    machine.name(),
                    many.len()
                ),
                Some("Machine set selectors must not overlap"),
            ),
        }
    }

    for (node, machines) in node_users {
        if machines.len() > 1 {
            result.error(
                "SHARED_NODE",
                format!("Node {} backs machines {}", node, machines.join(", ")),
                None,
            );
        }
    }
}
