//! Rollout orchestrator - one reconciliation pass per call
//!
//! Two variants share the pass skeleton and differ in how machines become
//! selected:
//! - **Auto**: the orchestrator selects machines within the availability budget
//! - **Manual**: an operator marks nodes; the orchestrator copies the mark to
//!   machines and keeps old generations from scaling up
//!
//! A pass stops after the first step that changes replica counts or selects
//! machines, so transfer and selection never happen in the same pass.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::new_set::reconcile_new_machine_set_in_place;
use super::nodes::{
    annotate_nodes_backing_machine_sets, clear_update_state, label_candidates, label_machine_sets,
    prefer_no_schedule_taint, propagate_selected_nodes, remove_autoscaler_annotations,
    taint_nodes_backing_machine_sets,
};
use super::old_sets::reconcile_old_machine_sets_in_place;
use super::PassContext;
use crate::client::{ClusterClient, DeploymentControl};
use crate::cluster::{
    filter_active_machine_sets, machine_sets_scaled_to_zero, MachineDeployment, MachineSet,
    OrchestrationType,
};
use crate::config::ControllerConfig;
use crate::error::RolloutError;
use crate::labels::{autoscaler_scale_down_annotations, flag, MACHINE_SET_SKIP_UPDATE};

/// Feature switches for a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutOptions {
    /// Keep the cluster autoscaler off nodes while a rollout is running
    pub autoscaler_scale_down_annotation_during_rollout: bool,
    /// Taint nodes of old generations with prefer-no-schedule
    pub taint_old_machine_sets: bool,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            autoscaler_scale_down_annotation_during_rollout: true,
            taint_old_machine_sets: true,
        }
    }
}

impl From<&ControllerConfig> for RolloutOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            autoscaler_scale_down_annotation_during_rollout: config
                .autoscaler_scale_down_annotation_during_rollout,
            taint_old_machine_sets: config.taint_old_machine_sets,
        }
    }
}

/// What a pass achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassOutcome {
    /// Machines changed owner or replica counts were corrected
    Transferred,
    /// Machines were selected for update
    Selected,
    /// The rollout is complete and old generations were cleaned up
    Completed,
    /// Nothing to do until the update agent makes progress
    Idle,
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PassOutcome::Transferred => "transferred",
            PassOutcome::Selected => "selected",
            PassOutcome::Completed => "completed",
            PassOutcome::Idle => "idle",
        };
        write!(f, "{}", s)
    }
}

/// Drives in-place rollouts of machine deployments
#[derive(Clone)]
pub struct RolloutOrchestrator {
    client: Arc<dyn ClusterClient>,
    control: Arc<dyn DeploymentControl>,
    options: RolloutOptions,
}

impl RolloutOrchestrator {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        control: Arc<dyn DeploymentControl>,
        options: RolloutOptions,
    ) -> Self {
        Self {
            client,
            control,
            options,
        }
    }

    pub fn options(&self) -> &RolloutOptions {
        &self.options
    }

    /// Run one pass for `deployment`, dispatching on its strategy
    pub async fn reconcile(
        &self,
        ctx: &PassContext,
        deployment: &MachineDeployment,
    ) -> Result<PassOutcome, RolloutError> {
        let Some(mode) = deployment.orchestration_type() else {
            return Err(RolloutError::UnsupportedStrategy(
                deployment.spec.strategy.strategy_type.to_string(),
            ));
        };
        deployment
            .validate_strategy()
            .map_err(|e| RolloutError::Config(format!("{}: {}", deployment.name(), e)))?;

        if deployment.spec.paused {
            debug!("Deployment {} is paused, syncing status only", deployment.name());
            ctx.check()?;
            let (new, old) = self
                .control
                .machine_sets_and_sync_revision(deployment)
                .await?;
            self.sync_status(ctx, &all_sets(&old, &new), &new, deployment)
                .await?;
            return Ok(PassOutcome::Idle);
        }

        match mode {
            OrchestrationType::Auto => self.rollout_auto_in_place(ctx, deployment).await,
            OrchestrationType::Manual => self.rollout_manual_in_place(ctx, deployment).await,
        }
    }

    /// Pass in which the orchestrator selects machines itself
    pub async fn rollout_auto_in_place(
        &self,
        ctx: &PassContext,
        deployment: &MachineDeployment,
    ) -> Result<PassOutcome, RolloutError> {
        self.run_pass(ctx, deployment, OrchestrationType::Auto)
            .await
    }

    /// Pass in which an operator selects machines by marking nodes
    pub async fn rollout_manual_in_place(
        &self,
        ctx: &PassContext,
        deployment: &MachineDeployment,
    ) -> Result<PassOutcome, RolloutError> {
        self.run_pass(ctx, deployment, OrchestrationType::Manual)
            .await
    }

    async fn run_pass(
        &self,
        ctx: &PassContext,
        deployment: &MachineDeployment,
        mode: OrchestrationType,
    ) -> Result<PassOutcome, RolloutError> {
        let client = self.client.as_ref();
        ctx.check()?;

        let (new, old) = self
            .control
            .machine_sets_and_sync_revision(deployment)
            .await?;
        let all = all_sets(&old, &new);

        self.prepare_nodes(ctx, mode, &old, &all).await?;

        // ownership transfer
        match reconcile_new_machine_set_in_place(
            client,
            self.control.as_ref(),
            ctx,
            &old,
            &new,
            deployment,
        )
        .await
        {
            Ok(true) => {
                self.sync_status(ctx, &all, &new, deployment).await?;
                return Ok(PassOutcome::Transferred);
            }
            Ok(false) => {}
            Err(e) => {
                if e.made_progress() {
                    if let Err(sync_err) = self.sync_status(ctx, &all, &new, deployment).await {
                        warn!(
                            "Failed to sync status of {} after partial transfer: {}",
                            deployment.name(),
                            sync_err
                        );
                    }
                }
                return Err(e);
            }
        }

        // selection
        let active_old = filter_active_machine_sets(&old);
        let selected = match mode {
            OrchestrationType::Auto => {
                reconcile_old_machine_sets_in_place(
                    client,
                    ctx,
                    &all,
                    &active_old,
                    &new,
                    deployment,
                )
                .await?
            }
            OrchestrationType::Manual => {
                match propagate_selected_nodes(client, ctx, &old).await {
                    Ok(n) => n,
                    Err(RolloutError::Cancelled) => return Err(RolloutError::Cancelled),
                    Err(e) => {
                        error!(
                            "Failed to label machines selected for update in {}: {}",
                            deployment.name(),
                            e
                        );
                        0
                    }
                }
            }
        };
        if selected > 0 {
            self.sync_status(ctx, &all, &new, deployment).await?;
            return Ok(PassOutcome::Selected);
        }

        if deployment.is_complete() {
            if self.options.autoscaler_scale_down_annotation_during_rollout {
                remove_autoscaler_annotations(client, ctx, &all).await?;
            }
            let cleared = clear_update_state(client, ctx, std::slice::from_ref(&new)).await?;
            if cleared > 0 {
                info!("Cleared update state from {} objects of {}", cleared, new.name());
            }
            ctx.check()?;
            self.control
                .cleanup_machine_deployment(&old, deployment)
                .await?;
            self.sync_status(ctx, &all, &new, deployment).await?;
            info!("Rollout of {} is complete", deployment.name());
            return Ok(PassOutcome::Completed);
        }

        self.sync_status(ctx, &all, &new, deployment).await?;
        Ok(PassOutcome::Idle)
    }

    /// Taint, annotate and label before any transfer or selection
    async fn prepare_nodes(
        &self,
        ctx: &PassContext,
        mode: OrchestrationType,
        old: &[MachineSet],
        all: &[MachineSet],
    ) -> Result<(), RolloutError> {
        let client = self.client.as_ref();

        if self.options.taint_old_machine_sets {
            match taint_nodes_backing_machine_sets(client, ctx, old, &prefer_no_schedule_taint())
                .await
            {
                Ok(()) => {}
                Err(RolloutError::Cancelled) => return Err(RolloutError::Cancelled),
                Err(e) => warn!("Failed to taint nodes of old machine sets: {}", e),
            }
        }

        if !old.is_empty() && !machine_sets_scaled_to_zero(old) {
            if mode == OrchestrationType::Manual {
                label_machine_sets(client, ctx, old, &flag(MACHINE_SET_SKIP_UPDATE)).await?;
            }
            if self.options.autoscaler_scale_down_annotation_during_rollout {
                annotate_nodes_backing_machine_sets(
                    client,
                    ctx,
                    all,
                    &autoscaler_scale_down_annotations(),
                )
                .await?;
            }
        }

        label_candidates(client, ctx, old).await
    }

    async fn sync_status(
        &self,
        ctx: &PassContext,
        all: &[MachineSet],
        new: &MachineSet,
        deployment: &MachineDeployment,
    ) -> Result<(), RolloutError> {
        ctx.check()?;
        self.control
            .sync_rollout_status(all, new, deployment)
            .await?;
        Ok(())
    }
}

fn all_sets(old: &[MachineSet], new: &MachineSet) -> Vec<MachineSet> {
    let mut all = old.to_vec();
    all.push(new.clone());
    all
}
