//! Simulated update agent and rollout driver
//!
//! In a real fleet an agent on each node notices the selected-for-update
//! label, drains and cordons the node, updates it and labels it
//! update-successful. [`SimulatedAgent`] plays that part against any
//! [`ClusterClient`], one stage per step, and can also play the operator of
//! a manual rollout by marking nodes.
//!
//! [`Simulation`] alternates orchestrator passes and agent steps over an
//! [`InMemoryCluster`] and records what every pass did.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::{ClientError, ClusterClient, DeploymentControl, InMemoryCluster};
use crate::cluster::{sort_by_creation_timestamp, LabelSelector, MachineSet, Node};
use crate::error::RolloutError;
use crate::labels::{
    UpdateState, CANDIDATE_FOR_UPDATE, LABEL_TRUE, SELECTED_FOR_UPDATE, UPDATE_SUCCESSFUL,
};
use crate::rollout::{
    machines_undergoing_update, PassContext, PassOutcome, RolloutOrchestrator, UpdateBudget,
};

// ============================================================================
// Agent
// ============================================================================

/// What one agent step changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStep {
    /// Nodes cordoned and marked as selected this step
    pub drained: Vec<String>,
    /// Nodes labeled update-successful this step
    pub updated: Vec<String>,
}

impl AgentStep {
    pub fn is_empty(&self) -> bool {
        self.drained.is_empty() && self.updated.is_empty()
    }
}

/// Stand-in for the per-node update agent
#[derive(Clone)]
pub struct SimulatedAgent {
    client: Arc<dyn ClusterClient>,
    /// Drain and update in the same step
    instant: bool,
}

impl SimulatedAgent {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            instant: false,
        }
    }

    /// Finish each node's update in the step that drains it
    pub fn instant(mut self) -> Self {
        self.instant = true;
        self
    }

    /// Advance every selected machine's node by one stage.
    ///
    /// Stage one cordons the node and mirrors the selected label onto it;
    /// stage two labels it update-successful. Nodes already updated are
    /// left alone, as are machines that are gone or have no node.
    pub async fn step(&self) -> Result<AgentStep, ClientError> {
        let selector = LabelSelector::matching(SELECTED_FOR_UPDATE, LABEL_TRUE);
        let machines = self.client.list_machines(&selector).await?;
        let mut step = AgentStep::default();

        for machine in machines {
            if machine.update_state() != UpdateState::Selected {
                continue;
            }
            let Some(node_name) = machine.node_name() else {
                continue;
            };
            let mut node = match self.client.get_node(node_name).await {
                Ok(node) => node,
                Err(e) if e.is_not_found() => {
                    debug!("Agent: node {} of {} is gone", node_name, machine.name());
                    continue;
                }
                Err(e) => return Err(e),
            };
            if node.update_successful() {
                continue;
            }

            let drained = node.spec.unschedulable && node.selected_for_update();
            if !drained {
                node.cordon();
                node.metadata
                    .labels
                    .insert(SELECTED_FOR_UPDATE.to_string(), LABEL_TRUE.to_string());
                debug!("Agent: drained node {}", node.name());
                step.drained.push(node.name().to_string());
            }
            if drained || self.instant {
                node.metadata
                    .labels
                    .insert(UPDATE_SUCCESSFUL.to_string(), LABEL_TRUE.to_string());
                debug!("Agent: updated node {}", node.name());
                step.updated.push(node.name().to_string());
            }
            self.client.update_node(&node).await?;
        }

        Ok(step)
    }

    /// Operator of a manual rollout: mark up to `count` candidate nodes.
    ///
    /// Candidates are taken in name order; nodes already marked or updated
    /// are skipped. Returns the names of the nodes marked.
    pub async fn mark_nodes(&self, count: usize) -> Result<Vec<String>, ClientError> {
        let selector = LabelSelector::matching(CANDIDATE_FOR_UPDATE, LABEL_TRUE);
        let mut candidates: Vec<Node> = self
            .client
            .list_nodes(&selector)
            .await?
            .into_iter()
            .filter(|n| !n.selected_for_update() && !n.update_successful())
            .collect();
        candidates.sort_by(|a, b| a.name().cmp(b.name()));

        let mut marked = Vec::new();
        for mut node in candidates.into_iter().take(count) {
            node.metadata
                .labels
                .insert(SELECTED_FOR_UPDATE.to_string(), LABEL_TRUE.to_string());
            self.client.update_node(&node).await?;
            info!("Operator marked node {} for update", node.name());
            marked.push(node.name().to_string());
        }
        Ok(marked)
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Read-only view of what the next selection would do
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub deployment: String,
    pub new_machine_set: String,
    pub budget: UpdateBudget,
    /// Old generations, oldest first: (name, desired, available)
    pub old_machine_sets: Vec<(String, i32, i32)>,
    /// Machines that would be selected, in selection order
    pub would_select: Vec<String>,
}

/// Compute the budget and the machines the next selection would pick.
///
/// Resolving the generations may create the new machine set in `cluster`,
/// so callers pass a scratch copy.
pub async fn plan(
    cluster: &InMemoryCluster,
    namespace: &str,
    name: &str,
) -> Result<Plan, RolloutError> {
    let deployment = cluster.deployment(namespace, name).ok_or_else(|| {
        ClientError::not_found("MachineDeployment", &format!("{}/{}", namespace, name))
    })?;

    let (new, old) = cluster.machine_sets_and_sync_revision(&deployment).await?;
    let mut all = old.clone();
    all.push(new.clone());

    let in_flight = machines_undergoing_update(cluster, &old).await?;
    let budget = UpdateBudget::compute(&deployment, &all, &new, in_flight);

    let mut ordered: Vec<MachineSet> = old.iter().filter(|s| s.replicas() > 0).cloned().collect();
    sort_by_creation_timestamp(&mut ordered);

    let mut would_select = Vec::new();
    let cap = if budget.allows_update() {
        budget.selection_cap().max(0) as usize
    } else {
        0
    };
    for set in &ordered {
        if would_select.len() >= cap {
            break;
        }
        let mut machines = cluster.list_machines(&set.spec.selector).await?;
        machines.retain(|m| m.node_name().is_some() && m.update_state() < UpdateState::Selected);
        machines.sort_by(|a, b| a.name().cmp(b.name()));
        let room = (cap - would_select.len()).min(set.replicas().max(0) as usize);
        would_select.extend(machines.into_iter().take(room).map(|m| m.name().to_string()));
    }

    Ok(Plan {
        deployment: deployment.metadata.qualified_name(),
        new_machine_set: new.name().to_string(),
        budget,
        old_machine_sets: ordered
            .iter()
            .map(|s| (s.name().to_string(), s.replicas(), s.status.available_replicas))
            .collect(),
        would_select,
    })
}

// ============================================================================
// Simulation driver
// ============================================================================

/// Observed fleet after one pass
#[derive(Debug, Clone, Serialize)]
pub struct PassRecord {
    /// 1-based pass number
    pub pass: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PassOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Desired replicas per machine set, by name
    pub replicas: BTreeMap<String, i32>,
    /// Machines per update state
    pub states: BTreeMap<UpdateState, usize>,
    pub agent: AgentStep,
    /// Nodes an operator marked before this pass (manual rollouts)
    pub marked: Vec<String>,
}

impl PassRecord {
    pub fn total_replicas(&self) -> i32 {
        self.replicas.values().sum()
    }
}

/// Alternates orchestrator passes with agent steps on an in-memory cluster
pub struct Simulation {
    cluster: InMemoryCluster,
    orchestrator: RolloutOrchestrator,
    agent: Option<SimulatedAgent>,
    /// Nodes an operator marks before each pass of a manual rollout
    marks_per_pass: usize,
    namespace: String,
    name: String,
}

impl Simulation {
    pub fn new(
        cluster: InMemoryCluster,
        orchestrator: RolloutOrchestrator,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            orchestrator,
            agent: None,
            marks_per_pass: 0,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Run `agent` after every pass
    pub fn with_agent(mut self, agent: SimulatedAgent) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Let the agent mark `count` nodes before each pass
    pub fn with_operator_marks(mut self, count: usize) -> Self {
        self.marks_per_pass = count;
        self
    }

    pub fn cluster(&self) -> &InMemoryCluster {
        &self.cluster
    }

    /// Run until the rollout completes or `max_passes` passes ran.
    ///
    /// Pass errors are recorded and the simulation continues, as a
    /// controller would retry on its next tick. Cancellation stops it.
    pub async fn run(
        &self,
        ctx: &PassContext,
        max_passes: usize,
    ) -> Result<Vec<PassRecord>, RolloutError> {
        let mut records = Vec::new();

        for pass in 1..=max_passes {
            ctx.check()?;
            let deployment = self
                .cluster
                .deployment(&self.namespace, &self.name)
                .ok_or_else(|| {
                    ClientError::not_found(
                        "MachineDeployment",
                        &format!("{}/{}", self.namespace, self.name),
                    )
                })?;

            let mut marked = Vec::new();
            if self.marks_per_pass > 0 {
                if let Some(agent) = &self.agent {
                    marked = agent.mark_nodes(self.marks_per_pass).await?;
                }
            }

            let result = self.orchestrator.reconcile(ctx, &deployment).await;
            let (outcome, error) = match result {
                Ok(outcome) => (Some(outcome), None),
                Err(RolloutError::Cancelled) => return Err(RolloutError::Cancelled),
                Err(e) => {
                    warn!("Pass {} failed: {}", pass, e);
                    (None, Some(e.to_string()))
                }
            };

            let agent = match &self.agent {
                Some(agent) if outcome != Some(PassOutcome::Completed) => agent.step().await?,
                _ => AgentStep::default(),
            };

            let record = self.observe(pass, outcome, error, agent, marked);
            info!(
                "Pass {}: {} (replicas {})",
                pass,
                record
                    .outcome
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "error".to_string()),
                record.total_replicas()
            );
            records.push(record);

            if outcome == Some(PassOutcome::Completed) {
                break;
            }
        }

        Ok(records)
    }

    fn observe(
        &self,
        pass: usize,
        outcome: Option<PassOutcome>,
        error: Option<String>,
        agent: AgentStep,
        marked: Vec<String>,
    ) -> PassRecord {
        let replicas = self
            .cluster
            .machine_sets()
            .into_iter()
            .filter(|s| s.metadata.namespace == self.namespace)
            .map(|s| (s.name().to_string(), s.replicas()))
            .collect();

        let mut states = BTreeMap::new();
        for machine in self.cluster.machines() {
            *states.entry(machine.update_state()).or_insert(0) += 1;
        }

        PassRecord {
            pass,
            outcome,
            error,
            replicas,
            states,
            agent,
            marked,
        }
    }
}
