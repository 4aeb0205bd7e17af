//! Ownership transfer of updated machines to the new generation
//!
//! A machine whose node reports a successful update is relabeled and
//! re-owned in a single patch, then its node is uncordoned and freed of the
//! old-generation taint. Replica counts follow: the old generation shrinks
//! by what it lost and the new one grows by what it gained. When a step
//! fails half way, the counts for machines already moved are applied anyway
//! so the fleet size stays constant.

use tracing::{debug, info, warn};

use super::nodes::prefer_no_schedule_taint;
use super::PassContext;
use crate::client::{ClientError, ClusterClient, DeploymentControl, MachinePatch};
use crate::cluster::{
    get_replica_count_for_machine_sets, machine_for_node, sort_by_creation_timestamp,
    LabelSelector, MachineDeployment, MachineSet, Node, OwnerReference,
};
use crate::error::RolloutError;
use crate::labels::{
    merge_string_maps, merge_with_overwrite_and_filter, next, UpdateSignal, UpdateState,
    LABEL_TRUE, UPDATE_SUCCESSFUL,
};

fn updated_nodes_selector() -> LabelSelector {
    LabelSelector::matching(UPDATE_SUCCESSFUL, LABEL_TRUE)
}

/// Still cordoned or tainted as part of an old generation
fn needs_release(node: &Node) -> bool {
    node.spec.unschedulable || node.has_taint(&prefer_no_schedule_taint())
}

/// Reconcile the new generation against the deployment's desired replicas.
///
/// Returns whether any machine set was scaled or a held node was released.
pub async fn reconcile_new_machine_set_in_place(
    client: &dyn ClusterClient,
    control: &dyn DeploymentControl,
    ctx: &PassContext,
    old: &[MachineSet],
    new: &MachineSet,
    deployment: &MachineDeployment,
) -> Result<bool, RolloutError> {
    let desired = deployment.spec.replicas;

    if new.replicas() > desired {
        ctx.check()?;
        info!(
            "Scaling down new machine set {} from {} to {}",
            new.name(),
            new.replicas(),
            desired
        );
        let outcome = control.scale_machine_set(new, desired, deployment).await?;
        return Ok(outcome.scaled);
    }

    if release_transferred_nodes(client, ctx, new).await? {
        return Ok(true);
    }

    if new.replicas() == desired {
        return Ok(false);
    }

    if repair_replica_drift(control, ctx, old, new, deployment).await? {
        return Ok(true);
    }

    transfer_updated_machines(client, control, ctx, old, new, deployment).await
}

/// Finish transfers whose node release failed on an earlier pass
async fn release_transferred_nodes(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    new: &MachineSet,
) -> Result<bool, RolloutError> {
    let held: Vec<Node> = client
        .list_nodes(&updated_nodes_selector())
        .await?
        .into_iter()
        .filter(needs_release)
        .collect();
    if held.is_empty() {
        return Ok(false);
    }

    let machines = client.list_machines(&new.spec.selector).await?;
    let mut released = false;
    for node in held {
        let Some(machine) = machine_for_node(&machines, node.name()) else {
            continue;
        };
        if !machine.is_controlled_by(new.metadata.uid) {
            continue;
        }
        info!(
            "Releasing node {} of transferred machine {}",
            node.name(),
            machine.name()
        );
        release_node(client, ctx, &node).await?;
        released = true;
    }
    Ok(released)
}

/// Uncordon and drop the old-generation taint
async fn release_node(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    node: &Node,
) -> Result<(), RolloutError> {
    ctx.check()?;
    let taint = prefer_no_schedule_taint();
    let mut node = node.clone();
    node.uncordon();
    node.spec
        .taints
        .retain(|t| !(t.key == taint.key && t.effect == taint.effect));
    client
        .update_node(&node)
        .await
        .map_err(|source| RolloutError::Uncordon {
            node: node.name().to_string(),
            source,
        })?;
    Ok(())
}

/// Bring `sum(spec.replicas)` back to the desired count when an earlier
/// pass moved machines but could not finish the scaling.
///
/// Only grows the new set up to the machines it already owns and only
/// shrinks old sets down to the machines they still own.
async fn repair_replica_drift(
    control: &dyn DeploymentControl,
    ctx: &PassContext,
    old: &[MachineSet],
    new: &MachineSet,
    deployment: &MachineDeployment,
) -> Result<bool, RolloutError> {
    let total = get_replica_count_for_machine_sets(old) + new.replicas();
    let desired = deployment.spec.replicas;
    let mut scaled = false;

    if total < desired {
        let owned_extra = new.status.replicas - new.replicas();
        let grow = owned_extra.min(desired - total);
        if grow > 0 {
            ctx.check()?;
            warn!(
                "Replica drift on {}: growing new machine set {} by {} to cover machines it owns",
                deployment.name(),
                new.name(),
                grow
            );
            scaled |= control
                .scale_machine_set(new, new.replicas() + grow, deployment)
                .await?
                .scaled;
        }
    } else if total > desired {
        let mut surplus = total - desired;
        let mut ordered = old.to_vec();
        sort_by_creation_timestamp(&mut ordered);
        for machine_set in &ordered {
            if surplus == 0 {
                break;
            }
            let shrink = (machine_set.replicas() - machine_set.status.replicas)
                .min(surplus)
                .max(0);
            if shrink == 0 {
                continue;
            }
            ctx.check()?;
            warn!(
                "Replica drift on {}: shrinking old machine set {} by {} to the machines it owns",
                deployment.name(),
                machine_set.name(),
                shrink
            );
            scaled |= control
                .scale_machine_set(machine_set, machine_set.replicas() - shrink, deployment)
                .await?
                .scaled;
            surplus -= shrink;
        }
    }

    Ok(scaled)
}

/// Replica bookkeeping for an interrupted transfer.
///
/// Grows the new set by everything moved so far and shrinks the current old
/// set by what it lost. Returns whether compensation itself failed.
async fn compensate(
    control: &dyn DeploymentControl,
    new: &MachineSet,
    added_new_replicas: i32,
    old_set: &MachineSet,
    transferred_from_old: i32,
    deployment: &MachineDeployment,
) -> bool {
    let mut failed = false;
    if added_new_replicas > 0 {
        if let Err(e) = control
            .scale_machine_set(new, new.replicas() + added_new_replicas, deployment)
            .await
        {
            warn!(
                "Compensation failed to scale up {} by {}: {}",
                new.name(),
                added_new_replicas,
                e
            );
            failed = true;
        }
    }
    if transferred_from_old > 0 {
        if let Err(e) = control
            .scale_machine_set(old_set, old_set.replicas() - transferred_from_old, deployment)
            .await
        {
            warn!(
                "Compensation failed to scale down {} by {}: {}",
                old_set.name(),
                transferred_from_old,
                e
            );
            failed = true;
        }
    }
    failed
}

enum Interrupted {
    Patch(ClientError),
    Uncordon(RolloutError),
    Cancelled,
}

async fn transfer_updated_machines(
    client: &dyn ClusterClient,
    control: &dyn DeploymentControl,
    ctx: &PassContext,
    old: &[MachineSet],
    new: &MachineSet,
    deployment: &MachineDeployment,
) -> Result<bool, RolloutError> {
    let owner = OwnerReference::controller(new.name(), new.metadata.uid);
    let mut added_new_replicas = 0;

    for old_set in old {
        let machines = client.list_machines(&old_set.spec.selector).await?;
        let updated_nodes = client.list_nodes(&updated_nodes_selector()).await?;

        let mut transferred = 0;
        let mut interrupted = None;

        for node in &updated_nodes {
            let Some(machine) = machine_for_node(&machines, node.name()) else {
                continue;
            };

            let state = next(machine.update_state(), UpdateSignal::UpdateSucceeded);
            if state != UpdateState::Successful {
                debug!(
                    "Node {} is updated but machine {} is {}, not transferring",
                    node.name(),
                    machine.name(),
                    machine.update_state()
                );
                continue;
            }

            if ctx.is_cancelled() {
                interrupted = Some(Interrupted::Cancelled);
                break;
            }

            let labels = merge_string_maps(
                &merge_with_overwrite_and_filter(
                    machine.labels(),
                    &old_set.spec.selector.match_labels,
                    &new.spec.selector.match_labels,
                ),
                &state.labels(),
            );
            let patch = MachinePatch::transfer(machine, owner.clone(), labels);
            if let Err(e) = client
                .patch_machine(&machine.metadata.namespace, machine.name(), &patch)
                .await
            {
                warn!(
                    "Failed to transfer machine {} from {} to {}: {}",
                    machine.name(),
                    old_set.name(),
                    new.name(),
                    e
                );
                interrupted = Some(Interrupted::Patch(e));
                break;
            }

            transferred += 1;
            added_new_replicas += 1;
            info!(
                "Transferred machine {} from {} to {}",
                machine.name(),
                old_set.name(),
                new.name()
            );

            if needs_release(node) {
                if let Err(e) = release_node(client, ctx, node).await {
                    interrupted = Some(Interrupted::Uncordon(e));
                    break;
                }
            }
        }

        if let Some(interrupted) = interrupted {
            let compensation_failed = compensate(
                control,
                new,
                added_new_replicas,
                old_set,
                transferred,
                deployment,
            )
            .await;
            return Err(match interrupted {
                Interrupted::Patch(source) => RolloutError::Transfer {
                    source,
                    added_new_replicas,
                    compensation_failed,
                },
                Interrupted::Uncordon(e) => e,
                Interrupted::Cancelled => RolloutError::Cancelled,
            });
        }

        if transferred > 0 {
            info!(
                "Scaling down old machine set {} by {}",
                old_set.name(),
                transferred
            );
            if let Err(source) = control
                .scale_machine_set(old_set, old_set.replicas() - transferred, deployment)
                .await
            {
                let compensation_failed = compensate(
                    control,
                    new,
                    added_new_replicas,
                    old_set,
                    transferred,
                    deployment,
                )
                .await;
                return Err(RolloutError::Transfer {
                    source,
                    added_new_replicas,
                    compensation_failed,
                });
            }
        }
    }

    if added_new_replicas == 0 {
        return Ok(false);
    }

    info!(
        "Scaling up new machine set {} by {}",
        new.name(),
        added_new_replicas
    );
    match control
        .scale_machine_set(new, new.replicas() + added_new_replicas, deployment)
        .await
    {
        Ok(outcome) => Ok(outcome.scaled),
        Err(source) => Err(RolloutError::Transfer {
            source,
            added_new_replicas,
            compensation_failed: true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeploymentControl, InMemoryCluster, Mutation, Operation};
    use crate::labels::{flag, SELECTED_FOR_UPDATE};
    use crate::rollout::nodes::label_candidates;
    use crate::rollout::testing::seeded;

    /// Select and finish the update of the named machines, as the agent would
    async fn finish_update(cluster: &InMemoryCluster, names: &[&str]) {
        for name in names {
            let machine = cluster.machine("default", name).unwrap();
            let desired = merge_string_maps(machine.labels(), &flag(SELECTED_FOR_UPDATE));
            cluster
                .patch_machine("default", name, &MachinePatch::labels(&machine, desired))
                .await
                .unwrap();

            let mut node = cluster.node(&format!("node-{}", name)).unwrap();
            node.cordon();
            node.metadata.labels.extend(flag(SELECTED_FOR_UPDATE));
            node.metadata.labels.extend(flag(UPDATE_SUCCESSFUL));
            cluster.insert_node(node);
        }
    }

    async fn prepare(
        replicas: i32,
        updated: &[&str],
    ) -> (InMemoryCluster, MachineDeployment, MachineSet, Vec<MachineSet>) {
        let (cluster, d) = seeded(replicas, 1);
        let (new, old) = cluster.machine_sets_and_sync_revision(&d).await.unwrap();
        label_candidates(&cluster, &PassContext::new(), &old)
            .await
            .unwrap();
        finish_update(&cluster, updated).await;
        cluster.clear_mutations();
        (cluster, d, new, old)
    }

    fn replicas(cluster: &InMemoryCluster, name: &str) -> i32 {
        cluster.machine_set("default", name).unwrap().replicas()
    }

    #[tokio::test]
    async fn test_transfer_after_success() {
        let (cluster, d, new, old) = prepare(5, &["v1-m0"]).await;
        let ctx = PassContext::new();

        let scaled = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap();
        assert!(scaled);

        let machine = cluster.machine("default", "v1-m0").unwrap();
        assert!(machine.is_controlled_by(new.metadata.uid));
        assert!(new.spec.selector.matches(machine.labels()));
        assert!(!old[0].spec.selector.matches(machine.labels()));
        assert_eq!(machine.update_state(), UpdateState::Successful);
        assert!(!cluster.node("node-v1-m0").unwrap().spec.unschedulable);

        assert_eq!(replicas(&cluster, "workers-v1"), 4);
        assert_eq!(replicas(&cluster, new.name()), 1);
    }

    #[tokio::test]
    async fn test_updated_but_never_selected_is_not_transferred() {
        let (cluster, d, new, old) = prepare(3, &[]).await;
        let mut node = cluster.node("node-v1-m1").unwrap();
        node.metadata.labels.extend(flag(UPDATE_SUCCESSFUL));
        cluster.insert_node(node);

        let ctx = PassContext::new();
        let scaled = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap();
        assert!(!scaled);
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_failure_after_two_of_three_compensates() {
        let (cluster, d, new, old) = prepare(5, &["v1-m0", "v1-m1", "v1-m2"]).await;
        cluster.fail_next(Operation::PatchMachine, 2);

        let ctx = PassContext::new();
        let err = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap_err();

        match &err {
            RolloutError::Transfer {
                added_new_replicas,
                compensation_failed,
                source,
            } => {
                assert_eq!(*added_new_replicas, 2);
                assert!(!compensation_failed);
                assert!(matches!(source, ClientError::Api(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.made_progress());

        assert_eq!(replicas(&cluster, new.name()), 2);
        assert_eq!(replicas(&cluster, "workers-v1"), 3);
        assert!(!cluster
            .machine("default", "v1-m2")
            .unwrap()
            .is_controlled_by(new.metadata.uid));
    }

    #[tokio::test]
    async fn test_uncordon_failure_keeps_counts_and_is_repaired() {
        let (cluster, d, new, old) = prepare(3, &["v1-m0"]).await;
        cluster.fail_next(Operation::UpdateNode, 0);

        let ctx = PassContext::new();
        let err = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Uncordon { ref node, .. } if node == "node-v1-m0"));
        assert_eq!(replicas(&cluster, new.name()), 1);
        assert_eq!(replicas(&cluster, "workers-v1"), 2);
        assert!(cluster.node("node-v1-m0").unwrap().spec.unschedulable);

        // next pass finishes the uncordon without moving anything else
        let (new, old) = cluster.machine_sets_and_sync_revision(&d).await.unwrap();
        cluster.clear_mutations();
        let progress = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap();
        assert!(progress);
        assert!(!cluster.node("node-v1-m0").unwrap().spec.unschedulable);
        assert_eq!(
            cluster.mutations(),
            vec![Mutation::UpdateNode {
                node: "node-v1-m0".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_new_set_over_desired_scales_down() {
        let (cluster, d, new, old) = prepare(2, &[]).await;
        cluster.scale_machine_set(&new, 4, &d).await.unwrap();
        let new = cluster.machine_set("default", new.name()).unwrap();

        let ctx = PassContext::new();
        let scaled = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap();
        assert!(scaled);
        assert_eq!(replicas(&cluster, new.name()), 2);
    }

    #[tokio::test]
    async fn test_scale_up_failure_is_repaired_next_pass() {
        let (cluster, d, new, old) = prepare(3, &["v1-m0"]).await;
        // old scale-down succeeds, new scale-up fails
        cluster.fail_next(Operation::Scale, 1);

        let ctx = PassContext::new();
        let err = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap_err();
        assert!(err.made_progress());
        assert_eq!(replicas(&cluster, new.name()), 0);
        assert_eq!(replicas(&cluster, "workers-v1"), 2);

        let (new, old) = cluster.machine_sets_and_sync_revision(&d).await.unwrap();
        let scaled = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap();
        assert!(scaled);
        assert_eq!(replicas(&cluster, new.name()), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_transfer() {
        let (cluster, d, new, old) = prepare(3, &["v1-m0"]).await;
        let ctx = PassContext::new();
        ctx.cancel();

        let err = reconcile_new_machine_set_in_place(&cluster, &cluster, &ctx, &old, &new, &d)
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled));
        assert!(cluster.mutations().is_empty());
    }
}
