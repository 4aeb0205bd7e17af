//! Cluster snapshots
//!
//! A snapshot is one deployment with its machine sets, machines and nodes,
//! written as YAML or JSON in the same shape the objects serialize to.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::client::InMemoryCluster;
use crate::cluster::{Machine, MachineDeployment, MachineSet, Node};

/// Serialized state of one deployment and everything it touches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSnapshot {
    pub deployment: MachineDeployment,

    #[serde(rename = "machineSets")]
    #[serde(default)]
    pub machine_sets: Vec<MachineSet>,

    #[serde(default)]
    pub machines: Vec<Machine>,

    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// On-disk encoding of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Yaml,
    Json,
}

impl SnapshotFormat {
    /// `.json` files are JSON, everything else is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Yaml,
        }
    }
}

impl ClusterSnapshot {
    /// Parse a snapshot in the given format
    pub fn parse(content: &str, format: SnapshotFormat) -> Result<Self, ConfigError> {
        match format {
            SnapshotFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| ConfigError::ParseError("snapshot".to_string(), e.to_string())),
            SnapshotFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError("snapshot".to_string(), e.to_string())),
        }
    }

    /// Render in the given format
    pub fn render(&self, format: SnapshotFormat) -> Result<String, ConfigError> {
        match format {
            SnapshotFormat::Yaml => serde_yaml::to_string(self)
                .map_err(|e| ConfigError::ParseError("snapshot".to_string(), e.to_string())),
            SnapshotFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::ParseError("snapshot".to_string(), e.to_string())),
        }
    }

    /// Seed a fresh in-memory cluster with this snapshot
    pub fn into_cluster(self) -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        self.load_into(&cluster);
        cluster
    }

    /// Insert every object into `cluster`, replacing objects with the same key
    pub fn load_into(self, cluster: &InMemoryCluster) {
        for node in self.nodes {
            cluster.insert_node(node);
        }
        for machine in self.machines {
            cluster.insert_machine(machine);
        }
        for machine_set in self.machine_sets {
            cluster.insert_machine_set(machine_set);
        }
        cluster.insert_deployment(self.deployment);
        cluster.refresh_machine_set_statuses();
    }

    /// Read the current state of `deployment` back out of `cluster`.
    ///
    /// Machine sets are those whose template the deployment selector
    /// matches; machines and nodes are everything in the cluster.
    pub fn capture(cluster: &InMemoryCluster, namespace: &str, name: &str) -> Option<Self> {
        let deployment = cluster.deployment(namespace, name)?;
        let machine_sets = cluster
            .machine_sets()
            .into_iter()
            .filter(|s| s.metadata.namespace == deployment.metadata.namespace)
            .filter(|s| deployment.spec.selector.matches(&s.spec.template.labels))
            .collect();
        Some(Self {
            deployment,
            machine_sets,
            machines: cluster.machines(),
            nodes: cluster.nodes(),
        })
    }
}

/// Load a snapshot from disk, choosing the format by extension
pub fn load_snapshot_file(path: &Path) -> Result<ClusterSnapshot, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    ClusterSnapshot::parse(&content, SnapshotFormat::from_path(path))
}
