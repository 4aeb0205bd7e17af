//! Node resource - the compute resource backing a machine
//!
//! Nodes carry mirrored update-state labels written by the update agent,
//! the cordon flag, taints, and autoscaler annotations. They are never
//! created or deleted by the orchestrator.

use serde::{Deserialize, Serialize};

use super::resources::ObjectMeta;
use crate::labels::{has_flag, Labels, UpdateState, SELECTED_FOR_UPDATE, UPDATE_SUCCESSFUL};

/// A Node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Metadata about the node
    pub metadata: ObjectMeta,

    /// Node specification
    #[serde(default)]
    pub spec: NodeSpec,
}

/// Node specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Cordoned nodes accept no new workloads
    #[serde(default)]
    pub unschedulable: bool,

    /// Scheduling taints
    #[serde(default)]
    pub taints: Vec<Taint>,

    #[serde(rename = "providerID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// A scheduling taint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Taint {
    pub key: String,

    #[serde(default)]
    pub value: String,

    pub effect: TaintEffect,
}

/// Effect of a taint on scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            effect,
        }
    }
}

impl Node {
    /// Create a schedulable node
    pub fn new(name: impl Into<String>) -> Self {
        let mut metadata = ObjectMeta::new(name);
        metadata.namespace = String::new();
        Self {
            metadata,
            spec: NodeSpec::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    /// Whether the agent reported the update as finished
    pub fn update_successful(&self) -> bool {
        has_flag(&self.metadata.labels, UPDATE_SUCCESSFUL)
    }

    /// Whether the node was marked for update (by us or by an operator)
    pub fn selected_for_update(&self) -> bool {
        has_flag(&self.metadata.labels, SELECTED_FOR_UPDATE)
    }

    /// Update state mirrored on the node
    pub fn update_state(&self) -> UpdateState {
        UpdateState::from_labels(&self.metadata.labels)
    }

    /// Whether a taint with the same key and effect is present
    pub fn has_taint(&self, taint: &Taint) -> bool {
        self.spec
            .taints
            .iter()
            .any(|t| t.key == taint.key && t.effect == taint.effect)
    }

    /// Cordon the node
    pub fn cordon(&mut self) {
        self.spec.unschedulable = true;
    }

    /// Uncordon the node
    pub fn uncordon(&mut self) {
        self.spec.unschedulable = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::flag;

    #[test]
    fn test_new_node_is_schedulable() {
        let node = Node::new("node-1");
        assert!(!node.spec.unschedulable);
        assert!(!node.update_successful());
        assert_eq!(node.update_state(), UpdateState::NotStarted);
    }

    #[test]
    fn test_cordon_uncordon() {
        let mut node = Node::new("node-1");
        node.cordon();
        assert!(node.spec.unschedulable);
        node.uncordon();
        assert!(!node.spec.unschedulable);
    }

    #[test]
    fn test_update_flags() {
        let mut node = Node::new("node-1");
        node.metadata.labels = flag(SELECTED_FOR_UPDATE);
        assert!(node.selected_for_update());
        assert!(!node.update_successful());

        node.metadata.labels.extend(flag(UPDATE_SUCCESSFUL));
        assert!(node.update_successful());
        assert_eq!(node.update_state(), UpdateState::Successful);
    }

    #[test]
    fn test_has_taint_ignores_value() {
        let mut node = Node::new("node-1");
        node.spec
            .taints
            .push(Taint::new("k", "True", TaintEffect::PreferNoSchedule));
        assert!(node.has_taint(&Taint::new("k", "other", TaintEffect::PreferNoSchedule)));
        assert!(!node.has_taint(&Taint::new("k", "True", TaintEffect::NoSchedule)));
    }

    #[test]
    fn test_node_deserialize_defaults() {
        let yaml = r#"
metadata:
  name: node-7
  labels:
    node.machine.io/update-successful: "true"
"#;
        let node: Node = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.name(), "node-7");
        assert!(node.update_successful());
        assert!(!node.spec.unschedulable);
    }
}
