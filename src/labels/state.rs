//! Per-machine update state machine
//!
//! A machine moves through `NotStarted -> Candidate -> Selected -> Successful`
//! and never backwards. The state is not stored anywhere except in labels, so
//! it is always re-derived from the labels observed at the start of a pass.

use serde::{Deserialize, Serialize};

use super::{flag, has_flag, Labels, CANDIDATE_FOR_UPDATE, SELECTED_FOR_UPDATE, UPDATE_SUCCESSFUL};

/// Update progress of a single machine
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum UpdateState {
    /// Not part of the rollout yet
    #[default]
    NotStarted,
    /// Eligible for update, waiting for budget
    Candidate,
    /// Budget consumed; the update agent owns the machine now
    Selected,
    /// Node finished updating; ownership may move to the new generation
    Successful,
}

/// External observation that may advance a machine's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateSignal {
    /// The machine belongs to an old generation and has a node
    MarkedCandidate,
    /// Budget was granted, or an operator marked the node
    SelectedForUpdate,
    /// The agent labeled the node as updated
    UpdateSucceeded,
}

impl UpdateState {
    /// Derive the state from a label map. The highest state present wins.
    pub fn from_labels(labels: &Labels) -> Self {
        if has_flag(labels, UPDATE_SUCCESSFUL) {
            UpdateState::Successful
        } else if has_flag(labels, SELECTED_FOR_UPDATE) {
            UpdateState::Selected
        } else if has_flag(labels, CANDIDATE_FOR_UPDATE) {
            UpdateState::Candidate
        } else {
            UpdateState::NotStarted
        }
    }

    /// The label that encodes reaching this state, if any
    pub fn label_key(&self) -> Option<&'static str> {
        match self {
            UpdateState::NotStarted => None,
            UpdateState::Candidate => Some(CANDIDATE_FOR_UPDATE),
            UpdateState::Selected => Some(SELECTED_FOR_UPDATE),
            UpdateState::Successful => Some(UPDATE_SUCCESSFUL),
        }
    }

    /// Labels to merge into a machine to record this state
    pub fn labels(&self) -> Labels {
        self.label_key().map(flag).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::NotStarted => "not-started",
            UpdateState::Candidate => "candidate",
            UpdateState::Selected => "selected",
            UpdateState::Successful => "successful",
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transition function of the update state machine.
///
/// Total over all inputs: a signal only advances the state directly below
/// its target. Every other combination leaves the state unchanged, so
/// replaying old signals is harmless and a state can never skip or regress.
pub fn next(current: UpdateState, signal: UpdateSignal) -> UpdateState {
    match (current, signal) {
        (UpdateState::NotStarted, UpdateSignal::MarkedCandidate) => UpdateState::Candidate,
        (UpdateState::Candidate, UpdateSignal::SelectedForUpdate) => UpdateState::Selected,
        (UpdateState::Selected, UpdateSignal::UpdateSucceeded) => UpdateState::Successful,
        (state, _) => state,
    }
}
