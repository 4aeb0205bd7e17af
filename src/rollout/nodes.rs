//! Side channels on nodes and machine sets
//!
//! Taints, autoscaler annotations, candidate labels, the manual skip-update
//! label and propagation of operator marks. Each helper writes only when the
//! object is missing what it would add, so repeated passes are silent.

use tracing::{debug, info, warn};

use super::PassContext;
use crate::client::{ClientError, ClusterClient, MachinePatch};
use crate::cluster::{Machine, MachineSet, Node, Taint, TaintEffect};
use crate::error::RolloutError;
use crate::labels::{
    has_flag, has_update_state, merge_string_maps, next, without_update_state, Labels,
    UpdateSignal, AUTOSCALER_SCALE_DOWN_DISABLED, AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM,
    CANDIDATE_FOR_UPDATE, LABEL_TRUE, PREFER_NO_SCHEDULE_KEY, PREFER_NO_SCHEDULE_VALUE,
};

/// Taint steering new work away from old generations
pub fn prefer_no_schedule_taint() -> Taint {
    Taint::new(
        PREFER_NO_SCHEDULE_KEY,
        PREFER_NO_SCHEDULE_VALUE,
        TaintEffect::PreferNoSchedule,
    )
}

/// Machines of `machine_set` that have joined a node
async fn joined_machines(
    client: &dyn ClusterClient,
    machine_set: &MachineSet,
) -> Result<Vec<Machine>, ClientError> {
    Ok(client
        .list_machines(&machine_set.spec.selector)
        .await?
        .into_iter()
        .filter(|m| m.node_name().is_some())
        .collect())
}

/// Get the node backing `machine`; `None` when it does not exist
async fn backing_node(
    client: &dyn ClusterClient,
    machine: &Machine,
) -> Result<Option<Node>, ClientError> {
    let Some(node_name) = machine.node_name() else {
        return Ok(None);
    };
    match client.get_node(node_name).await {
        Ok(node) => Ok(Some(node)),
        Err(e) if e.is_not_found() => {
            debug!("Node {} of machine {} not found", node_name, machine.name());
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Add `taint` to every node backing the given machine sets
pub async fn taint_nodes_backing_machine_sets(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
    taint: &Taint,
) -> Result<(), RolloutError> {
    for machine_set in machine_sets {
        for machine in joined_machines(client, machine_set).await? {
            let Some(mut node) = backing_node(client, &machine).await? else {
                continue;
            };
            if node.has_taint(taint) {
                continue;
            }
            ctx.check()?;
            node.spec.taints.push(taint.clone());
            client.update_node(&node).await?;
            debug!("Tainted node {} with {}", node.name(), taint.key);
        }
    }
    Ok(())
}

/// Annotate every node backing the given machine sets.
///
/// Nodes that already carry the scale-down annotation without our marker
/// were annotated by someone else and are left alone.
pub async fn annotate_nodes_backing_machine_sets(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
    annotations: &Labels,
) -> Result<(), RolloutError> {
    for machine_set in machine_sets {
        for machine in joined_machines(client, machine_set).await? {
            let Some(mut node) = backing_node(client, &machine).await? else {
                continue;
            };
            let current = &node.metadata.annotations;
            let ours = has_flag(current, AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM);
            if current.contains_key(AUTOSCALER_SCALE_DOWN_DISABLED) && !ours {
                continue;
            }
            if annotations.iter().all(|(k, v)| current.get(k) == Some(v)) {
                continue;
            }
            ctx.check()?;
            node.metadata.annotations = merge_string_maps(current, annotations);
            client.update_node(&node).await?;
            debug!("Annotated node {} for autoscaler scale-down", node.name());
        }
    }
    Ok(())
}

/// Remove the autoscaler annotations from nodes that carry our marker
pub async fn remove_autoscaler_annotations(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
) -> Result<(), RolloutError> {
    for machine_set in machine_sets {
        for machine in joined_machines(client, machine_set).await? {
            let Some(mut node) = backing_node(client, &machine).await? else {
                continue;
            };
            if !has_flag(&node.metadata.annotations, AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM) {
                continue;
            }
            ctx.check()?;
            node.metadata.annotations.remove(AUTOSCALER_SCALE_DOWN_DISABLED);
            node.metadata
                .annotations
                .remove(AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM);
            client.update_node(&node).await?;
            debug!("Removed autoscaler annotations from node {}", node.name());
        }
    }
    Ok(())
}

/// Mark joined machines of the given sets, and their nodes, as candidates
pub async fn label_candidates(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
) -> Result<(), RolloutError> {
    for machine_set in machine_sets {
        let machines = joined_machines(client, machine_set)
            .await
            .map_err(RolloutError::CandidateLabeling)?;

        for machine in &machines {
            let current = machine.update_state();
            let state = next(current, UpdateSignal::MarkedCandidate);
            if state != current {
                ctx.check()?;
                let desired = merge_string_maps(machine.labels(), &state.labels());
                client
                    .patch_machine(
                        &machine.metadata.namespace,
                        machine.name(),
                        &MachinePatch::labels(machine, desired),
                    )
                    .await
                    .map_err(RolloutError::CandidateLabeling)?;
                debug!("Machine {} is a candidate for update", machine.name());
            }

            let Some(mut node) = backing_node(client, machine)
                .await
                .map_err(RolloutError::CandidateLabeling)?
            else {
                continue;
            };
            if has_flag(node.labels(), CANDIDATE_FOR_UPDATE) {
                continue;
            }
            ctx.check()?;
            node.metadata
                .labels
                .insert(CANDIDATE_FOR_UPDATE.to_string(), LABEL_TRUE.to_string());
            client
                .update_node(&node)
                .await
                .map_err(RolloutError::CandidateLabeling)?;
        }
    }
    Ok(())
}

/// Merge `labels` into every machine set that does not carry them yet
pub async fn label_machine_sets(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
    labels: &Labels,
) -> Result<(), RolloutError> {
    for machine_set in machine_sets {
        let current = &machine_set.metadata.labels;
        if labels.iter().all(|(k, v)| current.get(k) == Some(v)) {
            continue;
        }
        ctx.check()?;
        client
            .patch_machine_set_labels(&machine_set.metadata.namespace, machine_set.name(), labels)
            .await?;
        info!("Labeled machine set {} with {:?}", machine_set.name(), labels);
    }
    Ok(())
}

/// Drop the update-state labels from machines of the given sets and from
/// their nodes.
///
/// Marks are only meaningful for the rollout that set them; a finished
/// rollout clears them so the next template change starts every machine
/// from `NotStarted`. Returns how many objects were relabeled.
pub async fn clear_update_state(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_sets: &[MachineSet],
) -> Result<usize, RolloutError> {
    let mut cleared = 0;
    for machine_set in machine_sets {
        for machine in client.list_machines(&machine_set.spec.selector).await? {
            if has_update_state(machine.labels()) {
                ctx.check()?;
                let desired = without_update_state(machine.labels());
                client
                    .patch_machine(
                        &machine.metadata.namespace,
                        machine.name(),
                        &MachinePatch::labels(&machine, desired),
                    )
                    .await?;
                cleared += 1;
            }

            let Some(mut node) = backing_node(client, &machine).await? else {
                continue;
            };
            if !has_update_state(node.labels()) {
                continue;
            }
            ctx.check()?;
            node.metadata.labels = without_update_state(node.labels());
            client.update_node(&node).await?;
            cleared += 1;
        }
        if cleared > 0 {
            debug!("Cleared update state under machine set {}", machine_set.name());
        }
    }
    Ok(cleared)
}

/// Copy operator marks from nodes to their machines (manual orchestration).
///
/// Returns how many machines were newly selected. Node lookups that fail
/// are logged and skipped.
pub async fn propagate_selected_nodes(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    old: &[MachineSet],
) -> Result<i32, RolloutError> {
    let mut selected = 0;
    for machine_set in old {
        if machine_set.replicas() == 0 {
            continue;
        }

        for machine in joined_machines(client, machine_set).await? {
            let node = match backing_node(client, &machine).await {
                Ok(Some(node)) => node,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Cannot get node of machine {}: {}", machine.name(), e);
                    continue;
                }
            };
            if !node.selected_for_update() {
                continue;
            }

            let current = machine.update_state();
            let state = next(current, UpdateSignal::SelectedForUpdate);
            if state == current {
                continue;
            }

            ctx.check()?;
            let desired = merge_string_maps(machine.labels(), &state.labels());
            client
                .patch_machine(
                    &machine.metadata.namespace,
                    machine.name(),
                    &MachinePatch::labels(&machine, desired),
                )
                .await?;
            info!(
                "Machine {} selected for update by its node {}",
                machine.name(),
                node.name()
            );
            selected += 1;
        }
    }
    Ok(selected)
}
