//! # Fleet resource model
//!
//! Kubernetes-shaped resources the in-place rollout operates on.
//!
//! ## Core Resources
//!
//! - **MachineDeployment**: desired fleet size, template and update budget
//! - **MachineSet**: one generation of machines behind an immutable selector
//! - **Machine**: a worker, owned by one generation at a time
//! - **Node**: the compute resource behind a machine
//!
//! ## Ownership
//!
//! ```text
//!            MachineDeployment (replicas = N)
//!             │
//!   ┌─────────┼──────────────┐
//!   ▼         ▼              ▼
//! old set   old set       new set        sum(spec.replicas) == N
//!   │         │              │
//!   ▼         ▼              ▼
//! machines  machines      machines  ──label "node"──▶  Node
//! ```
//!
//! An in-place update moves a machine from an old set to the new set by
//! rewriting its labels and controller owner reference.

pub mod deployment;
pub mod machine;
pub mod machine_set;
pub mod node;
pub mod resources;

pub use deployment::{
    resolve_fenceposts, DeploymentStrategy, InPlaceUpdateParams, MachineDeployment,
    MachineDeploymentSpec, MachineDeploymentStatus, OrchestrationType, RollingUpdateParams,
    StrategyType,
};
pub use machine::{machine_for_node, Machine, MachinePhase, MachineSpec, MachineStatus};
pub use machine_set::{
    filter_active_machine_sets, get_available_replica_count_for_machine_sets,
    get_replica_count_for_machine_sets, machine_sets_scaled_to_zero, sort_by_creation_timestamp,
    MachineSet, MachineSetSpec, MachineSetStatus, MachineTemplateSpec, TEMPLATE_HASH_LABEL,
};
pub use node::{Node, NodeSpec, Taint, TaintEffect};
pub use resources::*;
