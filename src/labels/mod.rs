//! Label protocol shared with the update agent and the cluster autoscaler
//!
//! Everything the orchestrator tells the outside world, and everything it
//! learns back, travels through labels and annotations on machines, machine
//! sets and nodes. This module owns:
//! - The well-known keys of that protocol
//! - The per-machine update state machine built on top of them
//! - Pure helpers that merge and filter label maps

pub mod maps;
pub mod state;

use std::collections::BTreeMap;

pub use maps::{
    format_labels, merge_string_maps, merge_with_overwrite_and_filter, validate_label_key,
    validate_label_value, LabelError,
};
pub use state::{next, UpdateSignal, UpdateState};

/// Label and annotation maps. Ordered so patches and logs are deterministic.
pub type Labels = BTreeMap<String, String>;

/// Value written for every boolean protocol label
pub const LABEL_TRUE: &str = "true";

/// Machine/node is eligible for an in-place update in this rollout
pub const CANDIDATE_FOR_UPDATE: &str = "node.machine.io/candidate-for-update";

/// Machine/node was chosen for update; the agent should drain and update it
pub const SELECTED_FOR_UPDATE: &str = "node.machine.io/selected-for-update";

/// Node finished its update; the machine may change owner
pub const UPDATE_SUCCESSFUL: &str = "node.machine.io/update-successful";

/// Every key that records update state, lowest state first
pub const UPDATE_STATE_LABELS: [&str; 3] =
    [CANDIDATE_FOR_UPDATE, SELECTED_FOR_UPDATE, UPDATE_SUCCESSFUL];

/// Machine set must not be scaled up while a manual rollout is running
pub const MACHINE_SET_SKIP_UPDATE: &str = "node.machine.io/machine-set-skip-update";

/// Machine label naming the node that backs the machine
pub const NODE_LABEL: &str = "node";

/// Annotation telling the cluster autoscaler to leave a node alone
pub const AUTOSCALER_SCALE_DOWN_DISABLED: &str =
    "cluster-autoscaler.kubernetes.io/scale-down-disabled";

/// Marker recording that the scale-down annotation was written by us and not by a user
pub const AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM: &str =
    "cluster-autoscaler.kubernetes.io/scale-down-disabled-by-mcm";

/// Taint placed on nodes of old machine sets so new work prefers updated nodes
pub const PREFER_NO_SCHEDULE_KEY: &str = "deployment.machine.io/prefer-no-schedule";

/// Value of the prefer-no-schedule taint
pub const PREFER_NO_SCHEDULE_VALUE: &str = "True";

/// Build a single-entry label map with value `"true"`
pub fn flag(key: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(key.to_string(), LABEL_TRUE.to_string());
    labels
}

/// Check whether a boolean protocol label is set to `"true"`
pub fn has_flag(labels: &Labels, key: &str) -> bool {
    labels.get(key).map(|v| v == LABEL_TRUE).unwrap_or(false)
}

/// Whether any update-state key is present, whatever its value
pub fn has_update_state(labels: &Labels) -> bool {
    UPDATE_STATE_LABELS.iter().any(|k| labels.contains_key(*k))
}

/// Copy of `labels` without the update-state keys
pub fn without_update_state(labels: &Labels) -> Labels {
    labels
        .iter()
        .filter(|(k, _)| !UPDATE_STATE_LABELS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Annotations written on every node while a rollout is in progress
pub fn autoscaler_scale_down_annotations() -> Labels {
    let mut annotations = flag(AUTOSCALER_SCALE_DOWN_DISABLED);
    annotations.insert(
        AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM.to_string(),
        LABEL_TRUE.to_string(),
    );
    annotations
}
