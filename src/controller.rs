//! Rollout controller - runs passes for every deployment on a timer
//!
//! The controller runs as a background task and on every tick:
//! - Lists machine deployments
//! - Runs one rollout pass per in-place deployment, one after another
//! - Counts outcomes in [`ReconcileStats`]
//!
//! Shutdown cancels the pass in progress through its [`PassContext`] and
//! waits for it, so a transfer that already started finishes its replica
//! bookkeeping before the task exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, DeploymentControl};
use crate::error::RolloutError;
use crate::rollout::{PassContext, PassOutcome, RolloutOrchestrator};

/// Outcome counters, updated by every pass
#[derive(Debug, Default)]
pub struct ReconcileStats {
    passes: AtomicU64,
    transferred: AtomicU64,
    selected: AtomicU64,
    completed: AtomicU64,
    idle: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`ReconcileStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub passes: u64,
    pub transferred: u64,
    pub selected: u64,
    pub completed: u64,
    pub idle: u64,
    pub skipped: u64,
    pub failures: u64,
}

impl ReconcileStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, result: &Result<PassOutcome, RolloutError>) {
        self.passes.fetch_add(1, Ordering::SeqCst);
        let counter = match result {
            Ok(PassOutcome::Transferred) => &self.transferred,
            Ok(PassOutcome::Selected) => &self.selected,
            Ok(PassOutcome::Completed) => &self.completed,
            Ok(PassOutcome::Idle) => &self.idle,
            Err(RolloutError::UnsupportedStrategy(_)) => &self.skipped,
            Err(_) => &self.failures,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            passes: self.passes.load(Ordering::SeqCst),
            transferred: self.transferred.load(Ordering::SeqCst),
            selected: self.selected.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            idle: self.idle.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }
}

/// Result of one pass over one deployment
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPass {
    /// `namespace/name`
    pub deployment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PassOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs rollout passes across all deployments
pub struct RolloutController {
    orchestrator: RolloutOrchestrator,
    control: Arc<dyn DeploymentControl>,
    stats: ReconcileStats,
}

impl RolloutController {
    pub fn new(orchestrator: RolloutOrchestrator, control: Arc<dyn DeploymentControl>) -> Self {
        Self {
            orchestrator,
            control,
            stats: ReconcileStats::new(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// One pass for every deployment.
    ///
    /// Deployments with other strategies are skipped. A failing deployment
    /// does not stop the others; cancellation does.
    pub async fn reconcile_all(
        &self,
        ctx: &PassContext,
    ) -> Result<Vec<DeploymentPass>, ClientError> {
        let deployments = self.control.list_deployments().await?;
        let mut passes = Vec::with_capacity(deployments.len());

        for deployment in deployments {
            if ctx.is_cancelled() {
                break;
            }
            let key = deployment.metadata.qualified_name();
            let result = self.orchestrator.reconcile(ctx, &deployment).await;
            self.stats.record(&result);

            let pass = match result {
                Ok(outcome) => {
                    debug!("Deployment {} pass: {}", key, outcome);
                    DeploymentPass {
                        deployment: key,
                        outcome: Some(outcome),
                        error: None,
                    }
                }
                Err(RolloutError::UnsupportedStrategy(strategy)) => {
                    debug!("Skipping deployment {} with strategy {}", key, strategy);
                    continue;
                }
                Err(e) => {
                    warn!("Rollout pass for {} failed: {}", key, e);
                    DeploymentPass {
                        deployment: key,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            passes.push(pass);
        }

        Ok(passes)
    }
}

/// Spawn the controller as a background task
pub fn spawn_controller(
    controller: Arc<RolloutController>,
    period: Duration,
) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut ticker = interval(period);
        let root = CancellationToken::new();

        info!("Rollout controller started, reconciling every {:?}", period);

        loop {
            let mut stop = false;
            tokio::select! {
                _ = ticker.tick() => {
                    let ctx = PassContext::with_token(root.child_token());
                    let pass = controller.reconcile_all(&ctx);
                    tokio::pin!(pass);

                    let result = tokio::select! {
                        result = &mut pass => result,
                        _ = shutdown_rx.changed() => {
                            info!("Rollout controller cancelling the pass in progress");
                            ctx.cancel();
                            stop = true;
                            pass.await
                        }
                    };
                    if let Err(e) = result {
                        error!("Failed to list machine deployments: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    stop = true;
                }
            }
            if stop {
                info!("Rollout controller shutting down");
                break;
            }
        }
    });

    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryCluster, Operation};
    use crate::cluster::StrategyType;
    use crate::rollout::testing::seeded;
    use crate::rollout::RolloutOptions;
    use tokio_test::{assert_err, assert_ok};

    fn controller(cluster: &InMemoryCluster) -> RolloutController {
        let orchestrator = RolloutOrchestrator::new(
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            RolloutOptions::default(),
        );
        RolloutController::new(orchestrator, Arc::new(cluster.clone()))
    }

    #[tokio::test]
    async fn test_reconcile_all_counts_outcomes() {
        let (cluster, _) = seeded(3, 1);
        let mut other = cluster.deployment("default", "workers").unwrap();
        other.metadata.name = "replaced".to_string();
        other.spec.strategy.strategy_type = StrategyType::RollingUpdate;
        cluster.insert_deployment(other);

        let controller = controller(&cluster);
        let passes = assert_ok!(controller.reconcile_all(&PassContext::new()).await);

        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].deployment, "default/workers");
        assert_eq!(passes[0].outcome, Some(PassOutcome::Selected));

        let stats = controller.stats();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.selected, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_failed_pass_is_reported() {
        let (cluster, _) = seeded(3, 1);
        cluster.fail_always(Operation::SyncRevision);

        let controller = controller(&cluster);
        let passes = controller.reconcile_all(&PassContext::new()).await.unwrap();
        assert_eq!(passes.len(), 1);
        assert!(passes[0].outcome.is_none());
        assert!(passes[0].error.as_deref().unwrap().contains("injected"));
        assert_eq!(controller.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_propagates() {
        let (cluster, _) = seeded(3, 1);
        cluster.fail_next(Operation::ListDeployments, 0);
        let result = controller(&cluster).reconcile_all(&PassContext::new()).await;
        assert_err!(result);
    }

    #[tokio::test]
    async fn test_cancelled_context_runs_nothing() {
        let (cluster, _) = seeded(3, 1);
        let ctx = PassContext::new();
        ctx.cancel();
        let controller = controller(&cluster);
        let passes = controller.reconcile_all(&ctx).await.unwrap();
        assert!(passes.is_empty());
        assert_eq!(controller.stats().passes, 0);
    }

    #[tokio::test]
    async fn test_spawned_controller_ticks_and_stops() {
        let (cluster, _) = seeded(3, 1);
        let controller = Arc::new(controller(&cluster));
        let shutdown = spawn_controller(controller.clone(), Duration::from_millis(10));

        for _ in 0..200 {
            if controller.stats().passes >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(controller.stats().passes >= 2);

        shutdown.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = controller.stats().passes;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.stats().passes, after);
    }
}
