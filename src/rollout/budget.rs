//! Availability budget for selecting machines

use serde::Serialize;

use crate::cluster::{
    get_available_replica_count_for_machine_sets, get_replica_count_for_machine_sets,
    MachineDeployment, MachineSet,
};

/// Inputs and derived values of the update budget for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateBudget {
    /// Desired replicas of the deployment
    pub desired_replicas: i32,
    pub max_unavailable: i32,
    /// `desired_replicas - max_unavailable`
    pub min_available: i32,
    /// Desired replicas summed over every generation
    pub all_replicas: i32,
    /// Available replicas summed over every generation
    pub available_replicas: i32,
    /// Desired but unavailable machines of the new generation
    pub new_unavailable: i32,
    /// Old machines already selected and not yet transferred
    pub old_in_flight: i32,
}

impl UpdateBudget {
    pub fn compute(
        deployment: &MachineDeployment,
        all: &[MachineSet],
        new: &MachineSet,
        old_in_flight: i32,
    ) -> Self {
        let max_unavailable = deployment.max_unavailable();
        Self {
            desired_replicas: deployment.spec.replicas,
            max_unavailable,
            min_available: deployment.spec.replicas - max_unavailable,
            all_replicas: get_replica_count_for_machine_sets(all),
            available_replicas: get_available_replica_count_for_machine_sets(all),
            new_unavailable: new.unavailable_replicas(),
            old_in_flight,
        }
    }

    /// Machines that could start updating without breaking the budget
    pub fn max_update_possible(&self) -> i32 {
        self.all_replicas - self.min_available - self.new_unavailable - self.old_in_flight
    }

    /// Zero or less means nothing may be selected this pass
    pub fn allows_update(&self) -> bool {
        self.max_update_possible() > 0
    }

    /// Available machines not already in flight
    pub fn effective_available(&self) -> i32 {
        self.available_replicas - self.old_in_flight
    }

    /// Upper bound on machines newly selected this pass
    pub fn selection_cap(&self) -> i32 {
        let available = self.effective_available();
        if available <= self.min_available {
            0
        } else {
            available - self.min_available
        }
    }
}

impl std::fmt::Display for UpdateBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all={} minAvailable={} newUnavailable={} inFlight={} maxUpdatePossible={} cap={}",
            self.all_replicas,
            self.min_available,
            self.new_unavailable,
            self.old_in_flight,
            self.max_update_possible(),
            self.selection_cap()
        )
    }
}
