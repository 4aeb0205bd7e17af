//! MachineSet resource - one generation of machines
//!
//! A deployment owns one new machine set and any number of old ones. The
//! selector is immutable; only the desired replica count changes during an
//! in-place rollout.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::resources::{LabelSelector, ObjectMeta};
use crate::labels::{has_flag, Labels, MACHINE_SET_SKIP_UPDATE};

/// Label distinguishing generations built from different templates
pub const TEMPLATE_HASH_LABEL: &str = "machine-template-hash";

/// A MachineSet (generation)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSet {
    /// Metadata about the machine set
    pub metadata: ObjectMeta,

    /// Desired state
    pub spec: MachineSetSpec,

    /// Observed state
    #[serde(default)]
    pub status: MachineSetStatus,
}

/// Specification of a machine set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSetSpec {
    /// Desired number of machines
    #[serde(default)]
    pub replicas: i32,

    /// Selects the machines of this generation
    pub selector: LabelSelector,

    /// Template machines of this generation are built from
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

/// Template of the machines in a generation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MachineTemplateSpec {
    /// Labels stamped on new machines
    #[serde(default)]
    pub labels: Labels,

    /// Machine class (image, size, ...) machines run
    #[serde(rename = "className")]
    #[serde(default)]
    pub class_name: String,
}

impl MachineTemplateSpec {
    /// Short deterministic hash of the template, ignoring the hash label itself
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (k, v) in self.labels.iter().filter(|(k, _)| *k != TEMPLATE_HASH_LABEL) {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(self.class_name.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..10].to_string()
    }

    /// Whether two templates describe the same generation
    pub fn same_generation(&self, other: &MachineTemplateSpec) -> bool {
        self.hash() == other.hash()
    }
}

/// Observed status of a machine set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineSetStatus {
    /// Machines currently owned
    #[serde(default)]
    pub replicas: i32,

    /// Machines that are running
    #[serde(rename = "readyReplicas")]
    #[serde(default)]
    pub ready_replicas: i32,

    /// Machines that are running and schedulable
    #[serde(rename = "availableReplicas")]
    #[serde(default)]
    pub available_replicas: i32,
}

impl MachineSet {
    /// Create a machine set whose selector and template labels are `selector`
    pub fn new(name: impl Into<String>, replicas: i32, selector: Labels) -> Self {
        let mut metadata = ObjectMeta::new(name);
        metadata.labels = selector.clone();
        Self {
            metadata,
            spec: MachineSetSpec {
                replicas,
                selector: LabelSelector::from_labels(selector.clone()),
                template: MachineTemplateSpec {
                    labels: selector,
                    class_name: String::new(),
                },
            },
            status: MachineSetStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Desired replicas
    pub fn replicas(&self) -> i32 {
        self.spec.replicas
    }

    /// Desired replicas that are not available
    pub fn unavailable_replicas(&self) -> i32 {
        self.spec.replicas - self.status.available_replicas
    }

    /// Whether a manual rollout suppressed scale-up of this set
    pub fn skips_scale_up(&self) -> bool {
        has_flag(&self.metadata.labels, MACHINE_SET_SKIP_UPDATE)
    }
}

/// Total desired replicas across machine sets
pub fn get_replica_count_for_machine_sets(sets: &[MachineSet]) -> i32 {
    sets.iter().map(|s| s.spec.replicas).sum()
}

/// Total available replicas across machine sets
pub fn get_available_replica_count_for_machine_sets(sets: &[MachineSet]) -> i32 {
    sets.iter().map(|s| s.status.available_replicas).sum()
}

/// Machine sets that still want machines
pub fn filter_active_machine_sets(sets: &[MachineSet]) -> Vec<MachineSet> {
    sets.iter()
        .filter(|s| s.spec.replicas > 0)
        .cloned()
        .collect()
}

/// Whether every machine set is scaled to zero, both desired and observed
pub fn machine_sets_scaled_to_zero(sets: &[MachineSet]) -> bool {
    sets.iter()
        .all(|s| s.spec.replicas == 0 && s.status.replicas == 0)
}

/// Sort oldest first; ties broken by name so the order is stable across passes
pub fn sort_by_creation_timestamp(sets: &mut [MachineSet]) {
    sets.sort_by(|a, b| {
        a.metadata
            .creation_timestamp
            .cmp(&b.metadata.creation_timestamp)
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
}
