//! In-memory cluster
//!
//! Implements both collaborator traits over DashMap-backed object stores.
//! It plays every out-of-scope controller at once: the revision syncer, the
//! scale executor, the status aggregator, the cleanup step and the event
//! recorder. Tests drive it with injected faults and read back the mutation
//! log; the `simulate` command drives it from a YAML snapshot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use super::{ClientError, ClusterClient, DeploymentControl, MachinePatch, ScaleOutcome};
use crate::cluster::{
    LabelSelector, Machine, MachineDeployment, MachineDeploymentStatus, MachineSet,
    MachineSetStatus, Node, OwnerReference, API_VERSION, TEMPLATE_HASH_LABEL,
};
use crate::labels::{merge_string_maps, Labels};

// ============================================================================
// Fault injection and observation
// ============================================================================

/// Calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListMachines,
    ListNodes,
    GetNode,
    PatchMachine,
    UpdateNode,
    PatchMachineSetLabels,
    ListDeployments,
    SyncRevision,
    Scale,
    SyncStatus,
    Cleanup,
}

/// How an injected fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Let this many calls succeed, fail the next one, then disarm
    After(usize),
    /// Fail every call until cleared
    Always,
}

/// A write accepted by the in-memory cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PatchMachine { machine: String, patch: MachinePatch },
    UpdateNode { node: String },
    PatchMachineSetLabels { machine_set: String, labels: Labels },
    CreateMachineSet { machine_set: String },
    Scale { machine_set: String, from: i32, to: i32 },
    DeleteMachineSet { machine_set: String },
    SyncStatus { deployment: String },
}

/// Recorded event, as an event recorder would emit it
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub object: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sorted_by_name<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

// ============================================================================
// Store
// ============================================================================

/// Fake cluster holding deployments, machine sets, machines and nodes
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    /// Machines indexed by qualified name (namespace/name)
    machines: Arc<DashMap<String, Machine>>,

    /// Nodes indexed by name
    nodes: Arc<DashMap<String, Node>>,

    /// Machine sets indexed by qualified name
    machine_sets: Arc<DashMap<String, MachineSet>>,

    /// Deployments indexed by qualified name
    deployments: Arc<DashMap<String, MachineDeployment>>,

    faults: Arc<DashMap<Operation, FaultMode>>,
    calls: Arc<DashMap<Operation, usize>>,
    mutations: Arc<Mutex<Vec<Mutation>>>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Seeding and inspection
    // =========================================================================

    pub fn insert_deployment(&self, deployment: MachineDeployment) {
        self.deployments
            .insert(deployment.metadata.qualified_name(), deployment);
    }

    pub fn insert_machine_set(&self, machine_set: MachineSet) {
        self.machine_sets
            .insert(machine_set.metadata.qualified_name(), machine_set);
    }

    pub fn insert_machine(&self, machine: Machine) {
        self.machines
            .insert(machine.metadata.qualified_name(), machine);
    }

    pub fn insert_node(&self, node: Node) {
        self.nodes.insert(node.metadata.name.clone(), node);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<MachineDeployment> {
        self.deployments
            .get(&format!("{}/{}", namespace, name))
            .map(|d| d.clone())
    }

    pub fn machine_set(&self, namespace: &str, name: &str) -> Option<MachineSet> {
        self.machine_sets
            .get(&format!("{}/{}", namespace, name))
            .map(|s| s.clone())
    }

    pub fn machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        self.machines
            .get(&format!("{}/{}", namespace, name))
            .map(|m| m.clone())
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.get(name).map(|n| n.clone())
    }

    /// All machine sets, sorted by name
    pub fn machine_sets(&self) -> Vec<MachineSet> {
        let sets = self.machine_sets.iter().map(|s| s.clone()).collect();
        sorted_by_name(sets, |s: &MachineSet| s.name())
    }

    /// All machines, sorted by name
    pub fn machines(&self) -> Vec<Machine> {
        let machines = self.machines.iter().map(|m| m.clone()).collect();
        sorted_by_name(machines, |m: &Machine| m.name())
    }

    /// All nodes, sorted by name
    pub fn nodes(&self) -> Vec<Node> {
        let nodes = self.nodes.iter().map(|n| n.clone()).collect();
        sorted_by_name(nodes, |n: &Node| n.name())
    }

    /// Arm a fault that fires after `successes` more calls of `op`
    pub fn fail_next(&self, op: Operation, successes: usize) {
        self.faults.insert(op, FaultMode::After(successes));
    }

    /// Make every call of `op` fail until cleared
    pub fn fail_always(&self, op: Operation) {
        self.faults.insert(op, FaultMode::Always);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Number of calls made to `op`, including failed ones
    pub fn call_count(&self, op: Operation) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Writes accepted so far, in order
    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.mutations).clone()
    }

    pub fn clear_mutations(&self) {
        lock(&self.mutations).clear();
    }

    /// Events recorded so far, in order
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn enter(&self, op: Operation) -> Result<(), ClientError> {
        *self.calls.entry(op).or_insert(0) += 1;

        let fire = match self.faults.get_mut(&op) {
            Some(mut mode) => match *mode {
                FaultMode::Always => true,
                FaultMode::After(0) => true,
                FaultMode::After(n) => {
                    *mode = FaultMode::After(n - 1);
                    false
                }
            },
            None => false,
        };
        if !fire {
            return Ok(());
        }

        if let Some(FaultMode::After(_)) = self.faults.get(&op).map(|m| *m) {
            self.faults.remove(&op);
        }
        debug!("Injected failure for {:?}", op);
        Err(ClientError::Api(format!("injected failure on {:?}", op)))
    }

    fn record(&self, mutation: Mutation) {
        lock(&self.mutations).push(mutation);
    }

    fn record_event(&self, object: &str, reason: &str, message: String) {
        lock(&self.events).push(Event {
            object: object.to_string(),
            reason: reason.to_string(),
            message,
            timestamp: Utc::now(),
        });
    }

    /// Machine sets of a deployment: same namespace, template selected by
    /// the deployment selector
    fn sets_of(&self, deployment: &MachineDeployment) -> Vec<MachineSet> {
        let sets = self
            .machine_sets
            .iter()
            .filter(|s| s.metadata.namespace == deployment.metadata.namespace)
            .filter(|s| deployment.spec.selector.matches(&s.spec.template.labels))
            .map(|s| s.clone())
            .collect();
        sorted_by_name(sets, |s: &MachineSet| s.name())
    }

    fn machines_of(&self, set: &MachineSet) -> Vec<Machine> {
        self.machines
            .iter()
            .filter(|m| m.metadata.namespace == set.metadata.namespace)
            .filter(|m| set.spec.selector.matches(&m.metadata.labels))
            .map(|m| m.clone())
            .collect()
    }

    /// Running, joined, and schedulable
    fn is_available(&self, machine: &Machine) -> bool {
        if !machine.is_running() {
            return false;
        }
        machine
            .node_name()
            .and_then(|n| self.nodes.get(n).map(|node| !node.spec.unschedulable))
            .unwrap_or(false)
    }

    fn observed_status(&self, set: &MachineSet) -> MachineSetStatus {
        let machines = self.machines_of(set);
        MachineSetStatus {
            replicas: machines.len() as i32,
            ready_replicas: machines.iter().filter(|m| m.is_running()).count() as i32,
            available_replicas: machines.iter().filter(|m| self.is_available(m)).count() as i32,
        }
    }

    /// Play the machine-set controller: observe machines into set status
    pub fn refresh_machine_set_statuses(&self) {
        let sets = self.machine_sets();
        for set in sets {
            let status = self.observed_status(&set);
            if let Some(mut stored) = self.machine_sets.get_mut(&set.metadata.qualified_name()) {
                stored.status = status;
            }
        }
    }

    fn create_new_machine_set(&self, deployment: &MachineDeployment) -> MachineSet {
        let hash = deployment.spec.template.hash();
        let mut template = deployment.spec.template.clone();
        template
            .labels
            .insert(TEMPLATE_HASH_LABEL.to_string(), hash.clone());

        let mut set = MachineSet::new(
            format!("{}-{}", deployment.name(), hash),
            0,
            template.labels.clone(),
        );
        set.metadata.namespace = deployment.metadata.namespace.clone();
        set.spec.template = template;
        set.metadata.owner_references = vec![OwnerReference {
            api_version: API_VERSION.to_string(),
            kind: "MachineDeployment".to_string(),
            name: deployment.name().to_string(),
            uid: deployment.metadata.uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        }];
        set.status = self.observed_status(&set);

        info!(
            "Created new machine set {} for deployment {}",
            set.name(),
            deployment.name()
        );
        self.insert_machine_set(set.clone());
        self.record(Mutation::CreateMachineSet {
            machine_set: set.name().to_string(),
        });
        self.record_event(
            &deployment.metadata.qualified_name(),
            "ScalingMachineSet",
            format!("Created new machine set {}", set.name()),
        );
        set
    }
}

// ============================================================================
// ClusterClient
// ============================================================================

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_machines(&self, selector: &LabelSelector) -> Result<Vec<Machine>, ClientError> {
        self.enter(Operation::ListMachines)?;
        let machines = self
            .machines
            .iter()
            .filter(|m| selector.matches(&m.metadata.labels))
            .map(|m| m.clone())
            .collect();
        Ok(sorted_by_name(machines, |m: &Machine| m.name()))
    }

    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>, ClientError> {
        self.enter(Operation::ListNodes)?;
        let nodes = self
            .nodes
            .iter()
            .filter(|n| selector.matches(&n.metadata.labels))
            .map(|n| n.clone())
            .collect();
        Ok(sorted_by_name(nodes, |n: &Node| n.name()))
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClientError> {
        self.enter(Operation::GetNode)?;
        self.node(name)
            .ok_or_else(|| ClientError::not_found("Node", name))
    }

    async fn patch_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &MachinePatch,
    ) -> Result<Machine, ClientError> {
        self.enter(Operation::PatchMachine)?;
        let key = format!("{}/{}", namespace, name);
        let mut machine = self
            .machines
            .get_mut(&key)
            .ok_or_else(|| ClientError::not_found("Machine", &key))?;

        if let Some(uid) = patch.uid {
            if machine.metadata.uid != uid {
                return Err(ClientError::Conflict(format!(
                    "machine {} uid {} does not match precondition {}",
                    key, machine.metadata.uid, uid
                )));
            }
        }
        if let Some(labels) = &patch.labels {
            let mut merged = merge_string_maps(&machine.metadata.labels, labels);
            for k in &patch.removed_labels {
                merged.remove(k);
            }
            machine.metadata.labels = merged;
        }
        if let Some(owners) = &patch.owner_references {
            machine.metadata.owner_references = owners.clone();
        }
        let updated = machine.clone();
        drop(machine);

        self.record(Mutation::PatchMachine {
            machine: name.to_string(),
            patch: patch.clone(),
        });
        Ok(updated)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClientError> {
        self.enter(Operation::UpdateNode)?;
        let mut stored = self
            .nodes
            .get_mut(node.name())
            .ok_or_else(|| ClientError::not_found("Node", node.name()))?;
        if stored.metadata.uid != node.metadata.uid {
            return Err(ClientError::Conflict(format!(
                "node {} was recreated",
                node.name()
            )));
        }
        *stored = node.clone();
        drop(stored);

        self.record(Mutation::UpdateNode {
            node: node.name().to_string(),
        });
        Ok(node.clone())
    }

    async fn patch_machine_set_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: &Labels,
    ) -> Result<MachineSet, ClientError> {
        self.enter(Operation::PatchMachineSetLabels)?;
        let key = format!("{}/{}", namespace, name);
        let mut set = self
            .machine_sets
            .get_mut(&key)
            .ok_or_else(|| ClientError::not_found("MachineSet", &key))?;
        set.metadata.labels = merge_string_maps(&set.metadata.labels, labels);
        let updated = set.clone();
        drop(set);

        self.record(Mutation::PatchMachineSetLabels {
            machine_set: name.to_string(),
            labels: labels.clone(),
        });
        Ok(updated)
    }
}

// ============================================================================
// DeploymentControl
// ============================================================================

#[async_trait]
impl DeploymentControl for InMemoryCluster {
    async fn list_deployments(&self) -> Result<Vec<MachineDeployment>, ClientError> {
        self.enter(Operation::ListDeployments)?;
        let mut deployments: Vec<_> = self.deployments.iter().map(|d| d.clone()).collect();
        deployments.sort_by_key(|d| d.metadata.qualified_name());
        Ok(deployments)
    }

    async fn machine_sets_and_sync_revision(
        &self,
        deployment: &MachineDeployment,
    ) -> Result<(MachineSet, Vec<MachineSet>), ClientError> {
        self.enter(Operation::SyncRevision)?;
        self.refresh_machine_set_statuses();

        let (mut current, old): (Vec<MachineSet>, Vec<MachineSet>) = self
            .sets_of(deployment)
            .into_iter()
            .partition(|s| s.spec.template.same_generation(&deployment.spec.template));

        // several sets with the current template: the newest one is new
        current.sort_by_key(|s| s.metadata.creation_timestamp);
        let new = current.pop();
        let mut old = old;
        old.extend(current);

        let new = match new {
            Some(set) => set,
            None => self.create_new_machine_set(deployment),
        };
        Ok((new, sorted_by_name(old, |s: &MachineSet| s.name())))
    }

    async fn scale_machine_set(
        &self,
        machine_set: &MachineSet,
        replicas: i32,
        deployment: &MachineDeployment,
    ) -> Result<ScaleOutcome, ClientError> {
        self.enter(Operation::Scale)?;
        if replicas < 0 {
            return Err(ClientError::Api(format!(
                "invalid replica count {} for machine set {}",
                replicas,
                machine_set.name()
            )));
        }

        let key = machine_set.metadata.qualified_name();
        let mut stored = self
            .machine_sets
            .get_mut(&key)
            .ok_or_else(|| ClientError::not_found("MachineSet", &key))?;

        let from = stored.spec.replicas;
        if from == replicas {
            return Ok(ScaleOutcome {
                scaled: false,
                machine_set: stored.clone(),
            });
        }
        if replicas > from && stored.skips_scale_up() {
            debug!(
                "Machine set {} carries skip-update, not scaling up {} -> {}",
                key, from, replicas
            );
            return Ok(ScaleOutcome {
                scaled: false,
                machine_set: stored.clone(),
            });
        }

        stored.spec.replicas = replicas;
        let updated = stored.clone();
        drop(stored);

        let direction = if replicas > from { "up" } else { "down" };
        info!("Scaled {} machine set {} from {} to {}", direction, key, from, replicas);
        self.record(Mutation::Scale {
            machine_set: machine_set.name().to_string(),
            from,
            to: replicas,
        });
        self.record_event(
            &deployment.metadata.qualified_name(),
            "ScalingMachineSet",
            format!(
                "Scaled {} machine set {} from {} to {}",
                direction,
                machine_set.name(),
                from,
                replicas
            ),
        );
        Ok(ScaleOutcome {
            scaled: true,
            machine_set: updated,
        })
    }

    async fn sync_rollout_status(
        &self,
        _all: &[MachineSet],
        new: &MachineSet,
        deployment: &MachineDeployment,
    ) -> Result<(), ClientError> {
        self.enter(Operation::SyncStatus)?;
        self.refresh_machine_set_statuses();

        let sets = self.sets_of(deployment);
        let replicas: i32 = sets.iter().map(|s| s.status.replicas).sum();
        let ready: i32 = sets.iter().map(|s| s.status.ready_replicas).sum();
        let available: i32 = sets.iter().map(|s| s.status.available_replicas).sum();
        let updated = sets
            .iter()
            .find(|s| s.metadata.uid == new.metadata.uid)
            .map(|s| s.status.replicas)
            .unwrap_or(0);

        let key = deployment.metadata.qualified_name();
        let mut stored = self
            .deployments
            .get_mut(&key)
            .ok_or_else(|| ClientError::not_found("MachineDeployment", &key))?;

        let status = MachineDeploymentStatus {
            observed_generation: stored.metadata.generation,
            replicas,
            updated_replicas: updated,
            ready_replicas: ready,
            available_replicas: available,
            unavailable_replicas: (stored.spec.replicas - available).max(0),
        };
        if stored.status == status {
            return Ok(());
        }
        stored.status = status;
        drop(stored);

        self.record(Mutation::SyncStatus {
            deployment: deployment.name().to_string(),
        });
        Ok(())
    }

    async fn cleanup_machine_deployment(
        &self,
        old: &[MachineSet],
        deployment: &MachineDeployment,
    ) -> Result<(), ClientError> {
        self.enter(Operation::Cleanup)?;
        for set in old {
            let key = set.metadata.qualified_name();
            let Some(stored) = self.machine_set(&set.metadata.namespace, set.name()) else {
                continue;
            };
            if stored.spec.replicas != 0 || !self.machines_of(&stored).is_empty() {
                continue;
            }
            self.machine_sets.remove(&key);
            info!("Deleted old machine set {}", key);
            self.record(Mutation::DeleteMachineSet {
                machine_set: set.name().to_string(),
            });
            self.record_event(
                &deployment.metadata.qualified_name(),
                "DeletedMachineSet",
                format!("Deleted old machine set {}", set.name()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MachineTemplateSpec;
    use crate::labels::{flag, SELECTED_FOR_UPDATE};

    fn template(class: &str) -> MachineTemplateSpec {
        let mut labels = Labels::new();
        labels.insert("pool".to_string(), "workers".to_string());
        MachineTemplateSpec {
            labels,
            class_name: class.to_string(),
        }
    }

    fn seeded() -> (InMemoryCluster, MachineDeployment, MachineSet) {
        let cluster = InMemoryCluster::new();
        let deployment = MachineDeployment::new("workers", 2, template("v2"));

        let mut old = MachineSet::new("workers-old", 2, template("v1").labels);
        old.spec.template = template("v1");
        old.spec
            .selector
            .match_labels
            .insert("generation".to_string(), "old".to_string());

        for i in 0..2 {
            let mut labels = template("v1").labels;
            labels.insert("generation".to_string(), "old".to_string());
            let machine = Machine::new(format!("m-{}", i), labels).with_node(format!("node-{}", i));
            cluster.insert_machine(machine);
            cluster.insert_node(Node::new(format!("node-{}", i)));
        }
        cluster.insert_machine_set(old.clone());
        cluster.insert_deployment(deployment.clone());
        (cluster, deployment, old)
    }

    #[tokio::test]
    async fn test_sync_revision_creates_new_set_once() {
        let (cluster, deployment, _) = seeded();

        let (new, old) = cluster
            .machine_sets_and_sync_revision(&deployment)
            .await
            .unwrap();
        assert_eq!(new.replicas(), 0);
        assert_eq!(new.name(), format!("workers-{}", deployment.spec.template.hash()));
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].status.available_replicas, 2);

        let (again, _) = cluster
            .machine_sets_and_sync_revision(&deployment)
            .await
            .unwrap();
        assert_eq!(again.metadata.uid, new.metadata.uid);
        let creates = cluster
            .mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::CreateMachineSet { .. }))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_scale_equal_is_noop() {
        let (cluster, deployment, old) = seeded();
        let outcome = cluster.scale_machine_set(&old, 2, &deployment).await.unwrap();
        assert!(!outcome.scaled);
        assert!(cluster.mutations().is_empty());

        let outcome = cluster.scale_machine_set(&old, 1, &deployment).await.unwrap();
        assert!(outcome.scaled);
        assert_eq!(outcome.machine_set.replicas(), 1);
        assert_eq!(cluster.events().len(), 1);
    }

    #[tokio::test]
    async fn test_scale_honours_skip_update() {
        let (cluster, deployment, old) = seeded();
        cluster
            .patch_machine_set_labels(
                "default",
                old.name(),
                &flag(crate::labels::MACHINE_SET_SKIP_UPDATE),
            )
            .await
            .unwrap();

        let up = cluster.scale_machine_set(&old, 3, &deployment).await.unwrap();
        assert!(!up.scaled);
        let down = cluster.scale_machine_set(&old, 1, &deployment).await.unwrap();
        assert!(down.scaled);
    }

    #[tokio::test]
    async fn test_scale_rejects_negative() {
        let (cluster, deployment, old) = seeded();
        let err = cluster.scale_machine_set(&old, -1, &deployment).await;
        assert!(matches!(err, Err(ClientError::Api(_))));
    }

    #[tokio::test]
    async fn test_fail_next_fires_once() {
        let (cluster, _, _) = seeded();
        cluster.fail_next(Operation::GetNode, 1);

        assert!(cluster.get_node("node-0").await.is_ok());
        assert!(matches!(
            cluster.get_node("node-0").await,
            Err(ClientError::Api(_))
        ));
        assert!(cluster.get_node("node-0").await.is_ok());
        assert_eq!(cluster.call_count(Operation::GetNode), 3);
    }

    #[tokio::test]
    async fn test_fail_always() {
        let (cluster, _, _) = seeded();
        cluster.fail_always(Operation::ListNodes);
        for _ in 0..3 {
            assert!(cluster.list_nodes(&LabelSelector::default()).await.is_err());
        }
        cluster.clear_faults();
        assert_eq!(
            cluster.list_nodes(&LabelSelector::default()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_get_node_not_found() {
        let cluster = InMemoryCluster::new();
        let err = cluster.get_node("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_patch_machine_uid_precondition() {
        let (cluster, _, _) = seeded();
        let machine = cluster.machine("default", "m-0").unwrap();

        let mut patch = MachinePatch::labels(&machine, flag(SELECTED_FOR_UPDATE));
        patch.uid = Some(uuid::Uuid::new_v4());
        let err = cluster.patch_machine("default", "m-0", &patch).await;
        assert!(matches!(err, Err(ClientError::Conflict(_))));

        let mut desired = machine.labels().clone();
        desired.extend(flag(SELECTED_FOR_UPDATE));
        let patch = MachinePatch::labels(&machine, desired);
        let patched = cluster.patch_machine("default", "m-0", &patch).await.unwrap();
        assert_eq!(patched.update_state(), crate::labels::UpdateState::Selected);
        assert_eq!(patched.node_name(), Some("node-0"));
    }

    #[tokio::test]
    async fn test_sync_status_and_cleanup() {
        let (cluster, deployment, old) = seeded();
        let (new, _) = cluster
            .machine_sets_and_sync_revision(&deployment)
            .await
            .unwrap();

        cluster
            .sync_rollout_status(&[old.clone(), new.clone()], &new, &deployment)
            .await
            .unwrap();
        let stored = cluster.deployment("default", "workers").unwrap();
        assert_eq!(stored.status.replicas, 2);
        assert_eq!(stored.status.available_replicas, 2);
        assert_eq!(stored.status.updated_replicas, 0);

        // unchanged status is not rewritten
        cluster.clear_mutations();
        cluster
            .sync_rollout_status(&[old.clone(), new.clone()], &new, &deployment)
            .await
            .unwrap();
        assert!(cluster.mutations().is_empty());

        // set still owns machines
        cluster.scale_machine_set(&old, 0, &deployment).await.unwrap();
        cluster
            .cleanup_machine_deployment(&[old.clone()], &deployment)
            .await
            .unwrap();
        assert!(cluster.machine_set("default", old.name()).is_some());
    }
}
