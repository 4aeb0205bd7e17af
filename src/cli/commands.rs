//! Command implementations for the CLI
//!
//! SBIO pattern: commands take parsed inputs and return data; reading
//! files and printing is left to `main`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::client::{ClientError, InMemoryCluster};
use crate::cluster::OrchestrationType;
use crate::config::{
    validate_snapshot, ClusterSnapshot, ConfigError, ControllerConfig, SnapshotFormat,
    ValidationResult,
};
use crate::controller::{spawn_controller, RolloutController, StatsSnapshot};
use crate::error::RolloutError;
use crate::rollout::{PassContext, RolloutOptions, RolloutOrchestrator};
use crate::simulation::{plan, PassRecord, Plan, SimulatedAgent, Simulation};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rollout error: {0}")]
    Rollout(#[from] RolloutError),

    #[error("Cluster error: {0}")]
    Client(#[from] ClientError),

    #[error("Snapshot {0} failed validation")]
    InvalidSnapshot(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

/// Options for [`simulate`]
#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    pub passes: Option<usize>,
    pub agent: bool,
    pub instant: bool,
    pub marks: usize,
}

/// Passes of a simulation and the cluster they ran on
pub struct SimulateReport {
    pub records: Vec<PassRecord>,
    pub cluster: InMemoryCluster,
    pub namespace: String,
    pub name: String,
}

impl SimulateReport {
    /// Final state of the simulated deployment
    pub fn final_snapshot(&self) -> Option<ClusterSnapshot> {
        ClusterSnapshot::capture(&self.cluster, &self.namespace, &self.name)
    }
}

fn orchestrator_for(cluster: &InMemoryCluster, config: &ControllerConfig) -> RolloutOrchestrator {
    RolloutOrchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        RolloutOptions::from(config),
    )
}

/// Refuse snapshots with validation errors, log the rest
fn checked(snapshot: &ClusterSnapshot) -> CommandResult<()> {
    let result = validate_snapshot(snapshot);
    for msg in &result.messages {
        warn!("{:?} {}: {}", msg.severity, msg.code, msg.message);
    }
    if !result.passed {
        return Err(CommandError::InvalidSnapshot(
            snapshot.deployment.metadata.qualified_name(),
        ));
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

/// Run passes over `snapshot` until the rollout completes or the pass limit is hit
pub async fn simulate(
    snapshot: ClusterSnapshot,
    config: &ControllerConfig,
    options: &SimulateOptions,
) -> CommandResult<SimulateReport> {
    checked(&snapshot)?;
    let namespace = snapshot.deployment.metadata.namespace.clone();
    let name = snapshot.deployment.name().to_string();
    let manual = snapshot.deployment.orchestration_type() == Some(OrchestrationType::Manual);

    let cluster = snapshot.into_cluster();
    let mut simulation = Simulation::new(
        cluster.clone(),
        orchestrator_for(&cluster, config),
        namespace.clone(),
        name.clone(),
    );
    if options.agent {
        let mut agent = SimulatedAgent::new(Arc::new(cluster.clone()));
        if options.instant {
            agent = agent.instant();
        }
        simulation = simulation.with_agent(agent);
        if manual {
            simulation = simulation.with_operator_marks(options.marks);
        }
    }

    let passes = options.passes.unwrap_or(config.max_passes);
    info!("Simulating {} for up to {} passes", name, passes);
    let records = simulation.run(&PassContext::new(), passes).await?;

    Ok(SimulateReport {
        records,
        cluster,
        namespace,
        name,
    })
}

/// Budget and next selection for `snapshot`, computed on a scratch cluster
pub async fn plan_snapshot(snapshot: ClusterSnapshot) -> CommandResult<Plan> {
    let namespace = snapshot.deployment.metadata.namespace.clone();
    let name = snapshot.deployment.name().to_string();
    let cluster = snapshot.into_cluster();
    Ok(plan(&cluster, &namespace, &name).await?)
}

/// Static checks on `snapshot`
pub fn validate(snapshot: &ClusterSnapshot) -> ValidationResult {
    validate_snapshot(snapshot)
}

/// Run the controller (and optionally the agent) on `snapshot` until
/// `shutdown` resolves. Returns the controller's counters.
pub async fn run_controller<F>(
    snapshot: ClusterSnapshot,
    config: &ControllerConfig,
    period: Duration,
    agent: bool,
    shutdown: F,
) -> CommandResult<StatsSnapshot>
where
    F: std::future::Future<Output = ()>,
{
    checked(&snapshot)?;
    let cluster = snapshot.into_cluster();
    let controller = Arc::new(RolloutController::new(
        orchestrator_for(&cluster, config),
        Arc::new(cluster.clone()),
    ));
    let controller_shutdown = spawn_controller(controller.clone(), period);

    let agent = agent.then(|| SimulatedAgent::new(Arc::new(cluster.clone())));
    let mut ticker = tokio::time::interval(period);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(agent) = &agent {
                    if let Err(e) = agent.step().await {
                        warn!("Simulated agent step failed: {}", e);
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    // the controller may already be gone
    let _ = controller_shutdown.send(());
    Ok(controller.stats())
}

/// Write the final state of a simulation next to the user's other snapshots
pub fn write_snapshot(snapshot: &ClusterSnapshot, path: &Path) -> CommandResult<()> {
    let rendered = snapshot.render(SnapshotFormat::from_path(path))?;
    std::fs::write(path, rendered).map_err(ConfigError::from)?;
    Ok(())
}
