//! End-to-end rollouts on an in-memory cluster
//!
//! These tests drive the orchestrator and the simulated update agent the
//! way a controller would: one pass per tick, with a fresh deployment read
//! before every pass.

use std::collections::HashMap;
use std::sync::Arc;

use inplace_rollout::cli::{simulate, SimulateOptions};
use inplace_rollout::client::InMemoryCluster;
use inplace_rollout::cluster::{
    DeploymentStrategy, IntOrPercent, Machine, MachineDeployment, MachineSet,
    MachineTemplateSpec, Node, OrchestrationType, OwnerReference,
};
use inplace_rollout::config::{ClusterSnapshot, ControllerConfig, SnapshotFormat};
use inplace_rollout::labels::{
    has_update_state, Labels, UpdateState, AUTOSCALER_SCALE_DOWN_DISABLED,
    AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM, PREFER_NO_SCHEDULE_KEY,
};
use inplace_rollout::rollout::{PassContext, PassOutcome, RolloutOptions, RolloutOrchestrator};
use inplace_rollout::simulation::SimulatedAgent;

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Deployment at v2 with one fully available v1 generation
fn fleet(replicas: i32, max_unavailable: i32, orchestration: OrchestrationType) -> InMemoryCluster {
    let cluster = InMemoryCluster::new();

    let mut strategy = DeploymentStrategy::in_place(orchestration);
    if let Some(params) = strategy.in_place_update.as_mut() {
        params.max_unavailable = IntOrPercent::Int(max_unavailable);
    }
    let template = MachineTemplateSpec {
        labels: labels(&[("pool", "workers"), ("version", "v2")]),
        class_name: "class-v2".to_string(),
    };
    let mut deployment =
        MachineDeployment::new("workers", replicas, template).with_strategy(strategy);
    deployment.spec.selector.match_labels = labels(&[("pool", "workers")]);

    let old_labels = labels(&[("pool", "workers"), ("version", "v1")]);
    let mut set = MachineSet::new("workers-v1", replicas, old_labels.clone());
    set.spec.template = MachineTemplateSpec {
        labels: old_labels.clone(),
        class_name: "class-v1".to_string(),
    };
    for i in 0..replicas {
        let node = format!("node-{}", i);
        cluster.insert_machine(
            Machine::new(format!("m{}", i), old_labels.clone())
                .with_node(node.clone())
                .with_owner(OwnerReference::controller(set.name(), set.metadata.uid)),
        );
        cluster.insert_node(Node::new(node));
    }
    cluster.insert_machine_set(set);
    cluster.insert_deployment(deployment);
    cluster.refresh_machine_set_statuses();
    cluster
}

fn orchestrator(cluster: &InMemoryCluster) -> RolloutOrchestrator {
    RolloutOrchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        RolloutOptions::from(&ControllerConfig::default()),
    )
}

fn total_replicas(cluster: &InMemoryCluster) -> i32 {
    cluster.machine_sets().iter().map(|s| s.replicas()).sum()
}

/// Run passes until completion, checking invariants after every pass
async fn drive(
    cluster: &InMemoryCluster,
    agent: &SimulatedAgent,
    replicas: i32,
    max_in_flight: Option<usize>,
    marks_per_pass: usize,
) -> usize {
    let orchestrator = orchestrator(cluster);
    let ctx = PassContext::new();
    let mut states: HashMap<String, UpdateState> = HashMap::new();

    for pass in 1..=80 {
        if marks_per_pass > 0 {
            agent.mark_nodes(marks_per_pass).await.unwrap();
        }
        let deployment = cluster.deployment("default", "workers").unwrap();
        let outcome = orchestrator.reconcile(&ctx, &deployment).await.unwrap();

        assert_eq!(total_replicas(cluster), replicas, "pass {}", pass);
        if outcome == PassOutcome::Completed {
            return pass;
        }

        for machine in cluster.machines() {
            let state = machine.update_state();
            let previous = states.insert(machine.name().to_string(), state);
            if let Some(previous) = previous {
                assert!(previous <= state, "{} went back to {}", machine.name(), state);
            }
        }
        if let Some(limit) = max_in_flight {
            let selected = states.values().filter(|s| **s == UpdateState::Selected).count();
            assert!(selected <= limit, "pass {} has {} selected", pass, selected);
        }
        agent.step().await.unwrap();
    }
    panic!("rollout did not complete");
}

fn assert_cleaned_up(cluster: &InMemoryCluster, replicas: i32, version: &str) {
    let sets = cluster.machine_sets();
    assert_eq!(sets.len(), 1);
    assert_eq!(
        sets[0].spec.template.labels.get("version").map(String::as_str),
        Some(version)
    );
    assert_eq!(sets[0].replicas(), replicas);

    for machine in cluster.machines() {
        assert!(machine.is_controlled_by(sets[0].metadata.uid));
        assert_eq!(machine.labels().get("version").map(String::as_str), Some(version));
        assert_eq!(machine.update_state(), UpdateState::NotStarted);
        assert!(!has_update_state(machine.labels()));
    }
    for node in cluster.nodes() {
        assert!(!has_update_state(node.labels()), "{} keeps update state", node.name());
        assert!(!node.spec.unschedulable, "{} still cordoned", node.name());
        assert!(node.spec.taints.iter().all(|t| t.key != PREFER_NO_SCHEDULE_KEY));
        assert!(!node.metadata.annotations.contains_key(AUTOSCALER_SCALE_DOWN_DISABLED));
        assert!(!node
            .metadata
            .annotations
            .contains_key(AUTOSCALER_SCALE_DOWN_DISABLED_BY_MCM));
    }

    let deployment = cluster.deployment("default", "workers").unwrap();
    assert!(deployment.is_complete());
}

#[tokio::test]
async fn test_auto_rollout_respects_budget() {
    let cluster = fleet(5, 2, OrchestrationType::Auto);
    let agent = SimulatedAgent::new(Arc::new(cluster.clone()));

    drive(&cluster, &agent, 5, Some(2), 0).await;
    assert_cleaned_up(&cluster, 5, "v2");
}

#[tokio::test]
async fn test_auto_rollout_one_at_a_time() {
    let cluster = fleet(3, 1, OrchestrationType::Auto);
    let agent = SimulatedAgent::new(Arc::new(cluster.clone()));

    drive(&cluster, &agent, 3, Some(1), 0).await;
    assert_cleaned_up(&cluster, 3, "v2");
}

#[tokio::test]
async fn test_second_rollout_updates_every_machine_again() {
    let cluster = fleet(3, 1, OrchestrationType::Auto);
    let agent = SimulatedAgent::new(Arc::new(cluster.clone()));
    drive(&cluster, &agent, 3, Some(1), 0).await;
    assert_cleaned_up(&cluster, 3, "v2");

    let mut deployment = cluster.deployment("default", "workers").unwrap();
    deployment.spec.template = MachineTemplateSpec {
        labels: labels(&[("pool", "workers"), ("version", "v3")]),
        class_name: "class-v3".to_string(),
    };
    deployment.metadata.generation += 1;
    cluster.insert_deployment(deployment);

    // nothing is updated yet, so the first pass may only select
    let deployment = cluster.deployment("default", "workers").unwrap();
    let outcome = orchestrator(&cluster)
        .reconcile(&PassContext::new(), &deployment)
        .await
        .unwrap();
    assert_eq!(outcome, PassOutcome::Selected);
    let selected = cluster
        .machines()
        .iter()
        .filter(|m| m.update_state() == UpdateState::Selected)
        .count();
    assert_eq!(selected, 1);
    assert!(cluster
        .machines()
        .iter()
        .all(|m| m.labels().get("version").map(String::as_str) == Some("v2")));

    agent.step().await.unwrap();
    drive(&cluster, &agent, 3, Some(1), 0).await;
    assert_cleaned_up(&cluster, 3, "v3");
}

#[tokio::test]
async fn test_manual_rollout_follows_operator() {
    let cluster = fleet(4, 1, OrchestrationType::Manual);
    let agent = SimulatedAgent::new(Arc::new(cluster.clone())).instant();

    drive(&cluster, &agent, 4, None, 1).await;
    assert_cleaned_up(&cluster, 4, "v2");
}

#[tokio::test]
async fn test_manual_rollout_waits_for_operator() {
    let cluster = fleet(3, 1, OrchestrationType::Manual);
    let agent = SimulatedAgent::new(Arc::new(cluster.clone())).instant();
    let orchestrator = orchestrator(&cluster);
    let ctx = PassContext::new();

    for _ in 0..5 {
        let deployment = cluster.deployment("default", "workers").unwrap();
        let outcome = orchestrator.reconcile(&ctx, &deployment).await.unwrap();
        assert_ne!(outcome, PassOutcome::Completed);
        agent.step().await.unwrap();
    }
    assert!(cluster
        .machines()
        .iter()
        .all(|m| m.update_state() <= UpdateState::Candidate));
    assert_eq!(
        cluster.machine_set("default", "workers-v1").unwrap().replicas(),
        3
    );
}

const SNAPSHOT: &str = r#"
deployment:
  metadata:
    name: workers
  spec:
    replicas: 3
    selector:
      matchLabels:
        pool: workers
    template:
      labels:
        pool: workers
        version: v2
      className: class-v2
    strategy:
      type: InPlaceUpdate
      inPlaceUpdate:
        maxUnavailable: 1
        orchestrationType: Auto
machineSets:
  - metadata:
      name: workers-v1
      uid: 0b7e4c2a-1f3d-4e5a-8b6c-7d8e9f0a1b2c
      labels:
        pool: workers
        version: v1
    spec:
      replicas: 3
      selector:
        matchLabels:
          pool: workers
          version: v1
      template:
        labels:
          pool: workers
          version: v1
        className: class-v1
machines:
  - metadata:
      name: m0
      labels: {pool: workers, version: v1, node: node-0}
      ownerReferences:
        - {apiVersion: machine.io/v1alpha1, kind: MachineSet, name: workers-v1, uid: 0b7e4c2a-1f3d-4e5a-8b6c-7d8e9f0a1b2c, controller: true}
    status:
      phase: Running
  - metadata:
      name: m1
      labels: {pool: workers, version: v1, node: node-1}
      ownerReferences:
        - {apiVersion: machine.io/v1alpha1, kind: MachineSet, name: workers-v1, uid: 0b7e4c2a-1f3d-4e5a-8b6c-7d8e9f0a1b2c, controller: true}
    status:
      phase: Running
  - metadata:
      name: m2
      labels: {pool: workers, version: v1, node: node-2}
      ownerReferences:
        - {apiVersion: machine.io/v1alpha1, kind: MachineSet, name: workers-v1, uid: 0b7e4c2a-1f3d-4e5a-8b6c-7d8e9f0a1b2c, controller: true}
    status:
      phase: Running
nodes:
  - metadata: {name: node-0}
  - metadata: {name: node-1}
  - metadata: {name: node-2}
"#;

#[tokio::test]
async fn test_snapshot_simulation_completes() {
    let snapshot = ClusterSnapshot::parse(SNAPSHOT, SnapshotFormat::Yaml).unwrap();
    let options = SimulateOptions {
        agent: true,
        ..Default::default()
    };
    let report = simulate(snapshot, &ControllerConfig::default(), &options)
        .await
        .unwrap();

    let last = report.records.last().unwrap();
    assert_eq!(last.outcome, Some(PassOutcome::Completed));
    assert!(report.records.iter().all(|r| r.total_replicas() == 3));
    assert!(report.records.iter().all(|r| r.error.is_none()));
    assert_cleaned_up(&report.cluster, 3, "v2");

    let final_state = report.final_snapshot().unwrap();
    let rendered = final_state.render(SnapshotFormat::Yaml).unwrap();
    let reparsed = ClusterSnapshot::parse(&rendered, SnapshotFormat::Yaml).unwrap();
    assert_eq!(reparsed.machine_sets.len(), 1);
    assert_eq!(reparsed.machines.len(), 3);
}
