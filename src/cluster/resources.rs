//! Shared resource types for machine deployments, machine sets, machines and nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::labels::Labels;

/// API version stamped on owner references written by the orchestrator
pub const API_VERSION: &str = "machine.io/v1alpha1";

/// Kind of the generation objects that own machines
pub const MACHINE_SET_KIND: &str = "MachineSet";

/// Errors in resource definitions
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Invalid int-or-percent value '{0}'")]
    InvalidIntOrPercent(String),

    #[error("Percent value '{0}' must not be negative")]
    NegativePercent(String),

    #[error("Value {0} must not be negative")]
    NegativeInt(i32),
}

/// Metadata common to every object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMeta {
    /// Unique name within a namespace (or the cluster, for nodes)
    pub name: String,

    /// Namespace (defaults to "default"; ignored for nodes)
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,

    /// Labels for organization and selection
    #[serde(default)]
    pub labels: Labels,

    /// Annotations for metadata storage
    #[serde(default)]
    pub annotations: Labels,

    /// Owners of this object; at most one is the controller
    #[serde(rename = "ownerReferences")]
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,

    /// Creation timestamp
    #[serde(rename = "creationTimestamp")]
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,

    /// Spec generation, bumped on every spec change
    #[serde(default)]
    pub generation: i64,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ObjectMeta {
    /// Create metadata with a fresh uid in the default namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_namespace(),
            uid: Uuid::new_v4(),
            labels: Labels::new(),
            annotations: Labels::new(),
            owner_references: Vec::new(),
            creation_timestamp: Utc::now(),
            generation: 1,
        }
    }

    /// `namespace/name`, used as a store key and in logs
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// The owner reference marked as controller, if any
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references
            .iter()
            .find(|r| r.controller.unwrap_or(false))
    }
}

/// Reference from an owned object to its owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub name: String,

    pub uid: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,

    #[serde(rename = "blockOwnerDeletion")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

impl OwnerReference {
    /// Controller reference pointing at a machine set
    pub fn controller(name: impl Into<String>, uid: Uuid) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: MACHINE_SET_KIND.to_string(),
            name: name.into(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Label selector for filtering resources
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSelector {
    /// Match exact labels
    #[serde(rename = "matchLabels")]
    #[serde(default)]
    pub match_labels: Labels,
}

impl LabelSelector {
    /// Selector built from a full label set
    pub fn from_labels(labels: Labels) -> Self {
        Self {
            match_labels: labels,
        }
    }

    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = Labels::new();
        labels.insert(key.into(), value.into());
        Self {
            match_labels: labels,
        }
    }

    /// Narrow the selector with one more required label
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Check if labels match this selector. An empty selector matches everything.
    pub fn matches(&self, labels: &Labels) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", crate::labels::format_labels(&self.match_labels))
    }
}

/// An absolute count or a percentage of a total ("25%")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum IntOrPercent {
    Int(i32),
    Percent(String),
}

impl IntOrPercent {
    /// Resolve against `total`. Percentages round up or down as requested.
    pub fn scaled_value(&self, total: i32, round_up: bool) -> Result<i32, ResourceError> {
        match self {
            IntOrPercent::Int(v) if *v < 0 => Err(ResourceError::NegativeInt(*v)),
            IntOrPercent::Int(v) => Ok(*v),
            IntOrPercent::Percent(s) => {
                let trimmed = s.trim();
                let digits = trimmed
                    .strip_suffix('%')
                    .ok_or_else(|| ResourceError::InvalidIntOrPercent(s.clone()))?;
                let percent: i64 = digits
                    .parse()
                    .map_err(|_| ResourceError::InvalidIntOrPercent(s.clone()))?;
                if percent < 0 {
                    return Err(ResourceError::NegativePercent(s.clone()));
                }
                let product = percent * i64::from(total);
                let value = if round_up {
                    (product + 99) / 100
                } else {
                    product / 100
                };
                Ok(value as i32)
            }
        }
    }
}

impl Default for IntOrPercent {
    fn default() -> Self {
        IntOrPercent::Int(0)
    }
}

impl std::fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrPercent::Int(v) => write!(f, "{}", v),
            IntOrPercent::Percent(s) => write!(f, "{}", s),
        }
    }
}
