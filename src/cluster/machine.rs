//! Machine resource - a single worker owned by exactly one machine set
//!
//! A machine is claimed by the generation whose selector matches its labels
//! and whose uid appears in its controller owner reference. An in-place
//! update moves a machine between generations by rewriting both, never by
//! recreating it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resources::{ObjectMeta, OwnerReference};
use crate::labels::{Labels, UpdateState, NODE_LABEL};

/// A Machine in the fleet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    /// Metadata about the machine
    pub metadata: ObjectMeta,

    /// Machine specification
    #[serde(default)]
    pub spec: MachineSpec,

    /// Current machine status
    #[serde(default)]
    pub status: MachineStatus,
}

/// Machine specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSpec {
    /// Machine class the machine was created from
    #[serde(rename = "className")]
    #[serde(default)]
    pub class_name: String,

    /// Provider-specific machine id
    #[serde(rename = "providerID")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Current status of a Machine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub phase: MachinePhase,
}

/// Lifecycle phase of a machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MachinePhase {
    /// Machine is being created
    #[default]
    Pending,
    /// Machine joined the cluster and is serving
    Running,
    /// Machine is unhealthy
    Unknown,
    /// Machine failed
    Failed,
    /// Machine is being deleted
    Terminating,
}

impl Machine {
    /// Create a running machine with the given labels
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        let mut metadata = ObjectMeta::new(name);
        metadata.labels = labels;
        Self {
            metadata,
            spec: MachineSpec::default(),
            status: MachineStatus {
                phase: MachinePhase::Running,
            },
        }
    }

    /// Link this machine to a node through the node label
    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.metadata
            .labels
            .insert(NODE_LABEL.to_string(), node_name.into());
        self
    }

    /// Set the controller owner reference
    pub fn with_owner(mut self, owner: OwnerReference) -> Self {
        self.metadata.owner_references = vec![owner];
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    /// Name of the backing node, if the machine has joined
    pub fn node_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .get(NODE_LABEL)
            .map(String::as_str)
            .filter(|n| !n.is_empty())
    }

    /// Update state as recorded in the machine's labels
    pub fn update_state(&self) -> UpdateState {
        UpdateState::from_labels(&self.metadata.labels)
    }

    /// Whether the controller owner reference points at `uid`
    pub fn is_controlled_by(&self, uid: Uuid) -> bool {
        self.metadata
            .controller_ref()
            .map(|r| r.uid == uid)
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.status.phase == MachinePhase::Running
    }
}

/// Find the machine backed by `node_name` within a machine list
pub fn machine_for_node<'a>(machines: &'a [Machine], node_name: &str) -> Option<&'a Machine> {
    machines.iter().find(|m| m.node_name() == Some(node_name))
}
