//! Picking and marking machines of one old generation

use tracing::{debug, info};

use super::PassContext;
use crate::client::{ClientError, ClusterClient, MachinePatch};
use crate::cluster::{Machine, MachineSet};
use crate::error::RolloutError;
use crate::labels::{
    merge_string_maps, next, UpdateSignal, CANDIDATE_FOR_UPDATE, LABEL_TRUE,
    SELECTED_FOR_UPDATE,
};

/// Candidates of `machine_set` not yet selected, sorted by name, at most `target`
pub async fn machines_for_drain(
    client: &dyn ClusterClient,
    machine_set: &MachineSet,
    target: i32,
) -> Result<Vec<Machine>, ClientError> {
    let selector = machine_set
        .spec
        .selector
        .clone()
        .and(CANDIDATE_FOR_UPDATE, LABEL_TRUE);

    let mut machines: Vec<Machine> = client
        .list_machines(&selector)
        .await?
        .into_iter()
        .filter(|m| !m.labels().contains_key(SELECTED_FOR_UPDATE))
        .collect();

    machines.sort_by(|a, b| a.name().cmp(b.name()));
    machines.truncate(target.max(0) as usize);
    Ok(machines)
}

/// Mark `replicas - new_scale` machines of `machine_set` as selected.
///
/// Returns how many were marked. Machines marked before a failure stay
/// marked and count as in flight on the next pass.
pub async fn label_machines_selected_for_update(
    client: &dyn ClusterClient,
    ctx: &PassContext,
    machine_set: &MachineSet,
    new_scale: i32,
) -> Result<i32, RolloutError> {
    let ready_for_drain = machine_set.replicas() - new_scale;
    let machines = machines_for_drain(client, machine_set, ready_for_drain).await?;

    debug!(
        "Machines of {} selected for drain: {:?}",
        machine_set.name(),
        machines.iter().map(|m| m.name()).collect::<Vec<_>>()
    );

    let mut selected = 0;
    for machine in &machines {
        let current = machine.update_state();
        let state = next(current, UpdateSignal::SelectedForUpdate);
        if state == current {
            debug!("Machine {} is {}, not selecting", machine.name(), current);
            continue;
        }

        ctx.check()?;
        let desired = merge_string_maps(machine.labels(), &state.labels());
        let patch = MachinePatch::labels(machine, desired);
        if let Err(e) = client
            .patch_machine(&machine.metadata.namespace, machine.name(), &patch)
            .await
        {
            info!(
                "Failed to select machine {} after {} selected: {}",
                machine.name(),
                selected,
                e
            );
            return Err(e.into());
        }

        info!("Selected machine {} for update", machine.name());
        selected += 1;
    }

    Ok(selected)
}
