//! In-place rollout core
//!
//! One pass moves a deployment at most one step forward:
//!
//! ```text
//! resolve generations ─▶ taint / annotate / label candidates
//!         │
//!         ▼
//! transfer updated machines to the new set ──progress──▶ sync status
//!         │ nothing to transfer
//!         ▼
//! select machines within budget (auto)     ──progress──▶ sync status
//! or follow operator marks (manual)
//!         │ nothing selected
//!         ▼
//! complete? ─▶ drop autoscaler annotations, clean up old sets
//! ```
//!
//! Every step is idempotent over observed labels, so an aborted pass is
//! finished by the next one.

pub mod budget;
pub mod new_set;
pub mod nodes;
pub mod old_sets;
pub mod orchestrator;
pub mod selector;

use tokio_util::sync::CancellationToken;

use crate::error::RolloutError;

pub use budget::UpdateBudget;
pub use new_set::reconcile_new_machine_set_in_place;
pub use old_sets::{
    compute_budget, machines_undergoing_update, reconcile_old_machine_sets_in_place,
    select_machines_for_update,
};
pub use orchestrator::{PassOutcome, RolloutOptions, RolloutOrchestrator};
pub use selector::{label_machines_selected_for_update, machines_for_drain};

/// Per-pass context carrying cancellation
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    token: CancellationToken,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled together with `token`
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Called before every mutation
    pub fn check(&self) -> Result<(), RolloutError> {
        if self.token.is_cancelled() {
            return Err(RolloutError::Cancelled);
        }
        Ok(())
    }
}
