//! Budget-constrained selection across old generations

use tracing::{debug, info};

use super::budget::UpdateBudget;
use super::selector::label_machines_selected_for_update;
use super::PassContext;
use crate::client::{ClientError, ClusterClient};
use crate::cluster::{
    get_replica_count_for_machine_sets, sort_by_creation_timestamp, MachineDeployment, MachineSet,
};
use crate::error::RolloutError;
use crate::labels::{LABEL_TRUE, SELECTED_FOR_UPDATE};

/// Machines of old generations that are selected and not yet transferred
pub async fn machines_undergoing_update(
    client: &dyn ClusterClient,
    old: &[MachineSet],
) -> Result<i32, ClientError> {
    let mut in_flight = 0;
    for machine_set in old {
        let selector = machine_set
            .spec
            .selector
            .clone()
            .and(SELECTED_FOR_UPDATE, LABEL_TRUE);
        in_flight += client.list_machines(&selector).await?.len() as i32;
    }
    Ok(in_flight)
}

/// Read-only budget for the current state of a deployment
pub async fn compute_budget(
    client: &dyn ClusterClient,
    all: &[MachineSet],
    old: &[MachineSet],
    new: &MachineSet,
    deployment: &MachineDeployment,
) -> Result<UpdateBudget, ClientError> {
    let in_flight = machines_undergoing_update(client, old).await?;
    Ok(UpdateBudget::compute(deployment, all, new, in_flight))
}

/// Select machines of old generations for update within the budget.
///
/// Returns how many machines were newly selected; more than zero means the
/// pass made progress.
pub async fn reconcile_old_machine_sets_in_place(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    all: &[MachineSet],
    old: &[MachineSet],
    new: &MachineSet,
    deployment: &MachineDeployment,
) -> Result<i32, RolloutError> {
    if get_replica_count_for_machine_sets(old) == 0 {
        return Ok(0);
    }

    debug!(
        "New machine set {} has {} available machines",
        new.name(),
        new.status.available_replicas
    );

    let budget = compute_budget(client, all, old, new, deployment).await?;
    debug!("Budget for {}: {}", deployment.name(), budget);

    if !budget.allows_update() {
        return Ok(0);
    }

    select_machines_for_update(client, ctx, &budget, old).await
}

/// Walk old generations oldest first and select up to the budget's cap
pub async fn select_machines_for_update(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    budget: &UpdateBudget,
    old: &[MachineSet],
) -> Result<i32, RolloutError> {
    let cap = budget.selection_cap();
    if cap == 0 {
        return Ok(0);
    }

    let mut ordered = old.to_vec();
    sort_by_creation_timestamp(&mut ordered);

    let mut total_selected = 0;
    for machine_set in &ordered {
        if total_selected >= cap {
            break;
        }
        let replicas = machine_set.replicas();
        if replicas == 0 {
            continue;
        }

        let ready_for_update = replicas.min(cap - total_selected);
        let new_replicas = replicas - ready_for_update;
        if new_replicas > replicas {
            return Err(RolloutError::InvalidScale {
                machine_set: machine_set.name().to_string(),
                from: replicas,
                to: new_replicas,
            });
        }

        let selected =
            label_machines_selected_for_update(client, ctx, machine_set, new_replicas).await?;
        total_selected += selected;
    }

    if total_selected > 0 {
        info!(
            "Selected {} machine(s) for update (cap {})",
            total_selected, cap
        );
    }
    Ok(total_selected)
}
