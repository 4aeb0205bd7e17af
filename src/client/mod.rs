//! Collaborator interfaces consumed by the rollout core
//!
//! Every call here is remote, fallible and non-atomic with respect to the
//! others. The core only talks to the cluster through these traits so each
//! component can be exercised against [`memory::InMemoryCluster`].

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::cluster::{LabelSelector, Machine, MachineDeployment, MachineSet, Node, OwnerReference};
use crate::labels::Labels;

pub use memory::{Event, FaultMode, InMemoryCluster, Mutation, Operation};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API error: {0}")]
    Api(String),
}

impl ClientError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        ClientError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// Metadata patch for a machine.
///
/// `labels` is the complete desired label set; keys present on the machine
/// but absent here are listed in `removed_labels` so the merge patch deletes
/// them. Owner references, when set, replace the existing list. `uid` is a
/// precondition: the patch is rejected if the machine was recreated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachinePatch {
    pub labels: Option<Labels>,
    pub removed_labels: Vec<String>,
    pub owner_references: Option<Vec<OwnerReference>>,
    pub uid: Option<Uuid>,
}

#[derive(Serialize)]
struct PatchMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(rename = "ownerReferences")]
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_references: Option<&'a Vec<OwnerReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uid: Option<Uuid>,
}

impl MachinePatch {
    /// Patch replacing the labels of `machine` with `desired`
    pub fn labels(machine: &Machine, desired: Labels) -> Self {
        let removed_labels = machine
            .labels()
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned()
            .collect();
        Self {
            labels: Some(desired),
            removed_labels,
            owner_references: None,
            uid: None,
        }
    }

    /// Single patch moving `machine` to a new controller with new labels
    pub fn transfer(machine: &Machine, owner: OwnerReference, desired: Labels) -> Self {
        Self {
            owner_references: Some(vec![owner]),
            uid: Some(machine.metadata.uid),
            ..Self::labels(machine, desired)
        }
    }

    /// Render as a JSON merge patch body
    pub fn to_merge_patch(&self) -> serde_json::Value {
        let labels = self.labels.as_ref().map(|labels| {
            let mut map: serde_json::Map<String, serde_json::Value> = labels
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            for k in &self.removed_labels {
                map.insert(k.clone(), serde_json::Value::Null);
            }
            map
        });
        let metadata = PatchMetadata {
            labels,
            owner_references: self.owner_references.as_ref(),
            uid: self.uid,
        };
        serde_json::json!({ "metadata": metadata })
    }
}

/// Result of asking the scale executor for a replica count
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleOutcome {
    /// Whether the replica count actually changed
    pub scaled: bool,
    /// The machine set after the call
    pub machine_set: MachineSet,
}

// ============================================================================
// SBIO: Traits for abstraction (allows fakes in tests)
// ============================================================================

/// Object access: listers, single gets and metadata writes
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Machines whose labels match `selector`, sorted by name
    async fn list_machines(&self, selector: &LabelSelector) -> Result<Vec<Machine>, ClientError>;

    /// Nodes whose labels match `selector`, sorted by name
    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, ClientError>;

    /// Get a node by name; `ClientError::NotFound` when absent
    async fn get_node(&self, name: &str) -> Result<Node, ClientError>;

    /// Apply a metadata patch to a machine
    async fn patch_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &MachinePatch,
    ) -> Result<Machine, ClientError>;

    /// Replace a node's labels, annotations and spec
    async fn update_node(&self, node: &Node) -> Result<Node, ClientError>;

    /// Merge labels into a machine set
    async fn patch_machine_set_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &Labels,
    ) -> Result<MachineSet, ClientError>;
}

/// Deployment-level operations owned by the surrounding controller
#[async_trait]
pub trait DeploymentControl: Send + Sync {
    /// Deployments to reconcile
    async fn list_deployments(&self) -> Result<Vec<MachineDeployment>, ClientError>;

    /// Resolve the new machine set (creating it if needed) and the old ones
    async fn machine_sets_and_sync_revision(
        &self,
        deployment: &MachineDeployment,
    ) -> Result<(MachineSet, Vec<MachineSet>), ClientError>;

    /// Set a machine set's desired replicas and record an event
    async fn scale_machine_set(
        &self,
        machine_set: &MachineSet,
        replicas: i32,
        deployment: &MachineDeployment,
    ) -> Result<ScaleOutcome, ClientError>;

    /// Recompute and persist the deployment status
    async fn sync_rollout_status(
        &self,
        all: &[MachineSet],
        new: &MachineSet,
        deployment: &MachineDeployment,
    ) -> Result<(), ClientError>;

    /// Delete old machine sets that no longer own machines
    async fn cleanup_machine_deployment(
        &self,
        old: &[MachineSet],
        deployment: &MachineDeployment,
    ) -> Result<(), ClientError>;
}
