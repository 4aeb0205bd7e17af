//! Error taxonomy of a rollout pass

use thiserror::Error;

use crate::client::ClientError;

/// Errors returned by a rollout pass
#[derive(Error, Debug)]
pub enum RolloutError {
    /// A collaborator call failed; retried on the next pass
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Budget arithmetic produced an impossible scale. Never clamped.
    #[error("Invalid scale request for machine set '{machine_set}': {from} -> {to}")]
    InvalidScale {
        machine_set: String,
        from: i32,
        to: i32,
    },

    /// Ownership transfer failed part way; compensation was attempted
    #[error(
        "Ownership transfer failed after {added_new_replicas} machine(s) moved \
         (compensation failed: {compensation_failed}): {source}"
    )]
    Transfer {
        #[source]
        source: ClientError,
        added_new_replicas: i32,
        compensation_failed: bool,
    },

    /// A transferred node could not be uncordoned
    #[error("Failed to uncordon node '{node}': {source}")]
    Uncordon {
        node: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to label candidate machines: {0}")]
    CandidateLabeling(#[source] ClientError),

    #[error("Unsupported strategy '{0}' for in-place rollout")]
    UnsupportedStrategy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rollout pass cancelled")]
    Cancelled,
}

impl RolloutError {
    /// Whether the failed pass still moved machines to the new generation
    pub fn made_progress(&self) -> bool {
        matches!(
            self,
            RolloutError::Transfer { added_new_replicas, .. } if *added_new_replicas > 0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_made_progress() {
        let err = RolloutError::Transfer {
            source: ClientError::Api("boom".into()),
            added_new_replicas: 2,
            compensation_failed: false,
        };
        assert!(err.made_progress());
        assert_eq!(
            err.to_string(),
            "Ownership transfer failed after 2 machine(s) moved \
             (compensation failed: false): API error: boom"
        );

        let err = RolloutError::Transfer {
            source: ClientError::Api("boom".into()),
            added_new_replicas: 0,
            compensation_failed: true,
        };
        assert!(!err.made_progress());
        assert!(err.to_string().contains("compensation failed: true"));
    }

    #[test]
    fn test_client_error_converts() {
        fn fails() -> Result<(), RolloutError> {
            Err::<(), _>(ClientError::not_found("Node", "n"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(RolloutError::Client(_))));
    }
}
