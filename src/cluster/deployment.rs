//! MachineDeployment resource - the fleet-level desired state
//!
//! A MachineDeployment is analogous to a Kubernetes Deployment whose pods
//! are machines. It defines:
//! - The desired total number of machines
//! - The machine template the fleet should converge to
//! - The update strategy and its availability budget

use serde::{Deserialize, Serialize};

use super::machine_set::MachineTemplateSpec;
use super::resources::{IntOrPercent, LabelSelector, ObjectMeta, ResourceError};

/// A MachineDeployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineDeployment {
    /// Metadata about the deployment
    pub metadata: ObjectMeta,

    /// Desired state specification
    pub spec: MachineDeploymentSpec,

    /// Current observed status (populated by status sync)
    #[serde(default)]
    pub status: MachineDeploymentStatus,
}

/// Specification of a machine deployment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineDeploymentSpec {
    /// Number of desired machines
    pub replicas: i32,

    /// Selects every machine of every generation of this deployment
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template the fleet converges to
    #[serde(default)]
    pub template: MachineTemplateSpec,

    /// How to move machines to a new template
    #[serde(default)]
    pub strategy: DeploymentStrategy,

    /// Paused deployments only get their status synced
    #[serde(default)]
    pub paused: bool,
}

/// Update strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentStrategy {
    /// Which strategy is active
    #[serde(rename = "type")]
    #[serde(default)]
    pub strategy_type: StrategyType,

    /// Parameters for replace-based rollouts
    #[serde(rename = "rollingUpdate")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<RollingUpdateParams>,

    /// Parameters for in-place rollouts
    #[serde(rename = "inPlaceUpdate")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_place_update: Option<InPlaceUpdateParams>,
}

impl Default for DeploymentStrategy {
    fn default() -> Self {
        Self::in_place(OrchestrationType::Auto)
    }
}

impl DeploymentStrategy {
    /// In-place strategy with default budget
    pub fn in_place(orchestration_type: OrchestrationType) -> Self {
        Self {
            strategy_type: StrategyType::InPlaceUpdate,
            rolling_update: None,
            in_place_update: Some(InPlaceUpdateParams {
                orchestration_type,
                ..Default::default()
            }),
        }
    }

    /// Surge/unavailable pair for the active strategy
    fn fenceposts(&self) -> Option<(&IntOrPercent, &IntOrPercent)> {
        match self.strategy_type {
            StrategyType::RollingUpdate => self
                .rolling_update
                .as_ref()
                .map(|p| (&p.max_surge, &p.max_unavailable)),
            StrategyType::InPlaceUpdate => self
                .in_place_update
                .as_ref()
                .map(|p| (&p.max_surge, &p.max_unavailable)),
            StrategyType::Recreate => None,
        }
    }
}

/// Strategy types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StrategyType {
    /// Replace machines, creating new ones before deleting old ones
    RollingUpdate,
    /// Delete all old machines, then create new ones
    Recreate,
    /// Update machines where they are
    #[default]
    InPlaceUpdate,
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyType::RollingUpdate => "RollingUpdate",
            StrategyType::Recreate => "Recreate",
            StrategyType::InPlaceUpdate => "InPlaceUpdate",
        };
        write!(f, "{}", s)
    }
}

/// Rolling update parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollingUpdateParams {
    /// Maximum unavailable machines during update
    #[serde(rename = "maxUnavailable")]
    #[serde(default)]
    pub max_unavailable: IntOrPercent,

    /// Maximum extra machines during update
    #[serde(rename = "maxSurge")]
    #[serde(default = "default_rolling_surge")]
    pub max_surge: IntOrPercent,
}

fn default_rolling_surge() -> IntOrPercent {
    IntOrPercent::Int(1)
}

impl Default for RollingUpdateParams {
    fn default() -> Self {
        Self {
            max_unavailable: IntOrPercent::Int(0),
            max_surge: default_rolling_surge(),
        }
    }
}

/// In-place update parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InPlaceUpdateParams {
    /// Maximum machines updating at the same time
    #[serde(rename = "maxUnavailable")]
    #[serde(default = "default_in_place_unavailable")]
    pub max_unavailable: IntOrPercent,

    /// Kept for parity with rolling updates; in-place updates never surge
    #[serde(rename = "maxSurge")]
    #[serde(default)]
    pub max_surge: IntOrPercent,

    /// Who decides that a node may start updating
    #[serde(rename = "orchestrationType")]
    #[serde(default)]
    pub orchestration_type: OrchestrationType,
}

fn default_in_place_unavailable() -> IntOrPercent {
    IntOrPercent::Int(1)
}

impl Default for InPlaceUpdateParams {
    fn default() -> Self {
        Self {
            max_unavailable: default_in_place_unavailable(),
            max_surge: IntOrPercent::Int(0),
            orchestration_type: OrchestrationType::Auto,
        }
    }
}

/// How machines are picked for in-place update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrchestrationType {
    /// The orchestrator selects machines within the budget
    #[default]
    Auto,
    /// An operator marks nodes; the orchestrator only follows
    Manual,
}

/// Observed status of a deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineDeploymentStatus {
    #[serde(rename = "observedGeneration")]
    #[serde(default)]
    pub observed_generation: i64,

    /// Machines across all generations
    #[serde(default)]
    pub replicas: i32,

    /// Machines owned by the new generation
    #[serde(rename = "updatedReplicas")]
    #[serde(default)]
    pub updated_replicas: i32,

    #[serde(rename = "readyReplicas")]
    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(rename = "availableReplicas")]
    #[serde(default)]
    pub available_replicas: i32,

    #[serde(rename = "unavailableReplicas")]
    #[serde(default)]
    pub unavailable_replicas: i32,
}

/// Resolve surge and unavailable against the desired count.
///
/// Surge rounds up, unavailable rounds down. When both resolve to zero,
/// unavailable becomes one so a rollout can always make progress.
pub fn resolve_fenceposts(
    max_surge: &IntOrPercent,
    max_unavailable: &IntOrPercent,
    desired: i32,
) -> Result<(i32, i32), ResourceError> {
    let surge = max_surge.scaled_value(desired, true)?;
    let mut unavailable = max_unavailable.scaled_value(desired, false)?;
    if surge == 0 && unavailable == 0 {
        unavailable = 1;
    }
    Ok((surge, unavailable))
}

impl MachineDeployment {
    /// Create an auto in-place deployment
    pub fn new(name: impl Into<String>, replicas: i32, template: MachineTemplateSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(name),
            spec: MachineDeploymentSpec {
                replicas,
                selector: LabelSelector::default(),
                template,
                strategy: DeploymentStrategy::default(),
                paused: false,
            },
            status: MachineDeploymentStatus::default(),
        }
    }

    /// Replace the strategy
    pub fn with_strategy(mut self, strategy: DeploymentStrategy) -> Self {
        self.spec.strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Orchestration type when the strategy is in-place
    pub fn orchestration_type(&self) -> Option<OrchestrationType> {
        match self.spec.strategy.strategy_type {
            StrategyType::InPlaceUpdate => Some(
                self.spec
                    .strategy
                    .in_place_update
                    .as_ref()
                    .map(|p| p.orchestration_type)
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }

    /// Maximum machines that may be unavailable, capped at `spec.replicas`.
    ///
    /// Zero for deployments without a surge/unavailable budget or without
    /// replicas. Malformed percentages fall back to one; `validate_strategy`
    /// reports them.
    pub fn max_unavailable(&self) -> i32 {
        let replicas = self.spec.replicas;
        let Some((surge, unavailable)) = self.spec.strategy.fenceposts() else {
            return 0;
        };
        if replicas == 0 {
            return 0;
        }
        let max_unavailable = resolve_fenceposts(surge, unavailable, replicas)
            .map(|(_, u)| u)
            .unwrap_or(1);
        max_unavailable.min(replicas)
    }

    /// Maximum machines above `spec.replicas`
    pub fn max_surge(&self) -> i32 {
        let Some((surge, unavailable)) = self.spec.strategy.fenceposts() else {
            return 0;
        };
        resolve_fenceposts(surge, unavailable, self.spec.replicas)
            .map(|(s, _)| s)
            .unwrap_or(0)
    }

    /// Check the strategy's budget values parse
    pub fn validate_strategy(&self) -> Result<(), ResourceError> {
        if let Some((surge, unavailable)) = self.spec.strategy.fenceposts() {
            resolve_fenceposts(surge, unavailable, self.spec.replicas)?;
        }
        Ok(())
    }

    /// Whether every desired machine is updated and available, and the
    /// status reflects the latest spec
    pub fn is_complete(&self) -> bool {
        let replicas = self.spec.replicas;
        self.status.updated_replicas == replicas
            && self.status.replicas == replicas
            && self.status.available_replicas == replicas
            && self.status.observed_generation >= self.metadata.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(replicas: i32, max_unavailable: IntOrPercent) -> MachineDeployment {
        let mut d = MachineDeployment::new("workers", replicas, MachineTemplateSpec::default());
        if let Some(p) = d.spec.strategy.in_place_update.as_mut() {
            p.max_unavailable = max_unavailable;
        }
        d
    }

    #[test]
    fn test_default_strategy_is_auto_in_place() {
        let d = MachineDeployment::new("workers", 3, MachineTemplateSpec::default());
        assert_eq!(d.orchestration_type(), Some(OrchestrationType::Auto));
        assert_eq!(d.max_unavailable(), 1);
    }

    #[test]
    fn test_max_unavailable_percent() {
        let d = deployment(10, IntOrPercent::Percent("25%".to_string()));
        assert_eq!(d.max_unavailable(), 2);
    }

    #[test]
    fn test_max_unavailable_capped_at_replicas() {
        let d = deployment(3, IntOrPercent::Int(10));
        assert_eq!(d.max_unavailable(), 3);
    }

    #[test]
    fn test_max_unavailable_zero_replicas() {
        let d = deployment(0, IntOrPercent::Int(1));
        assert_eq!(d.max_unavailable(), 0);
    }

    #[test]
    fn test_max_unavailable_both_zero_becomes_one() {
        let d = deployment(5, IntOrPercent::Int(0));
        assert_eq!(d.max_unavailable(), 1);
    }

    #[test]
    fn test_max_unavailable_invalid_value() {
        let d = deployment(5, IntOrPercent::Percent("lots".to_string()));
        assert!(d.validate_strategy().is_err());
        assert_eq!(d.max_unavailable(), 1);
    }

    #[test]
    fn test_negative_int_budget_is_rejected() {
        let d = deployment(5, IntOrPercent::Int(-2));
        assert!(matches!(
            d.validate_strategy(),
            Err(ResourceError::NegativeInt(-2))
        ));
        assert_eq!(d.max_unavailable(), 1);
    }

    #[test]
    fn test_recreate_has_no_budget() {
        let mut d = deployment(5, IntOrPercent::Int(2));
        d.spec.strategy.strategy_type = StrategyType::Recreate;
        assert_eq!(d.max_unavailable(), 0);
        assert_eq!(d.orchestration_type(), None);
    }

    #[test]
    fn test_rolling_update_defaults() {
        let mut d = deployment(4, IntOrPercent::Int(0));
        d.spec.strategy = DeploymentStrategy {
            strategy_type: StrategyType::RollingUpdate,
            rolling_update: Some(RollingUpdateParams::default()),
            in_place_update: None,
        };
        assert_eq!(d.max_surge(), 1);
        assert_eq!(d.max_unavailable(), 0);
    }

    #[test]
    fn test_is_complete() {
        let mut d = deployment(3, IntOrPercent::Int(1));
        assert!(!d.is_complete());

        d.status = MachineDeploymentStatus {
            observed_generation: d.metadata.generation,
            replicas: 3,
            updated_replicas: 3,
            ready_replicas: 3,
            available_replicas: 3,
            unavailable_replicas: 0,
        };
        assert!(d.is_complete());

        d.metadata.generation += 1;
        assert!(!d.is_complete());
    }

    #[test]
    fn test_strategy_deserialize() {
        let yaml = r#"
type: InPlaceUpdate
inPlaceUpdate:
  maxUnavailable: "50%"
  orchestrationType: Manual
"#;
        let strategy: DeploymentStrategy = serde_yaml::from_str(yaml).unwrap();
        let params = strategy.in_place_update.unwrap();
        assert_eq!(params.orchestration_type, OrchestrationType::Manual);
        assert_eq!(params.max_unavailable, IntOrPercent::Percent("50%".to_string()));
        assert_eq!(params.max_surge, IntOrPercent::Int(0));
    }
}
