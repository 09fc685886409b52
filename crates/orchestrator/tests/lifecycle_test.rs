mod common;

use std::sync::Arc;

use common::{fast_lifecycle, init_tracing, topology, MockGateway, MockSupervisor, ROUTER_PORT};
use orchestrator::lifecycle::{LifecycleController, ShardOutcome};
use orchestrator::metadata::{ClusterConfig, NodeRole, NodeStatus};
use orchestrator::OrchestratorError;
use tempfile::TempDir;

struct Harness {
    supervisor: Arc<MockSupervisor>,
    gateway: Arc<MockGateway>,
    lifecycle: LifecycleController,
    data: TempDir,
}

fn harness() -> Harness {
    init_tracing();
    let data = tempfile::tempdir().unwrap();
    let supervisor = MockSupervisor::new();
    let gateway = MockGateway::new(supervisor.clone());
    let lifecycle = LifecycleController::new(
        supervisor.clone(),
        gateway.clone(),
        topology(data.path(), &data.path().join("configs")),
        fast_lifecycle(),
    );
    Harness {
        supervisor,
        gateway,
        lifecycle,
        data,
    }
}

fn status_of(config: &ClusterConfig, node_id: &str) -> NodeStatus {
    config.node(node_id).unwrap().status
}

#[tokio::test]
async fn test_initialize_fresh_cluster() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();

    let report = h.lifecycle.initialize(&mut config).await.unwrap();

    assert!(!report.already_initialized);
    assert!(report.config_initiated);
    assert!(report.router_started);
    assert_eq!(report.start.as_ref().unwrap().started.len(), 3);
    assert_eq!(
        report.shards.iter().map(|s| s.outcome.clone()).collect::<Vec<_>>(),
        vec![ShardOutcome::Registered, ShardOutcome::Registered]
    );
    assert!(report.is_complete());

    // Config replica set first, seeded on the first config server
    let initiates = h.gateway.initiate_calls.lock().clone();
    assert_eq!(initiates[0].0, 28000);
    assert_eq!(initiates[0].1, "configReplSet");
    assert_eq!(initiates[0].2, vec!["localhost:28000".to_string()]);

    let launch = h.supervisor.last_router_launch.lock().clone().unwrap();
    assert_eq!(launch.port, ROUTER_PORT);
    assert_eq!(launch.config_connection, "configReplSet/localhost:28000");

    assert_eq!(h.gateway.registered(), vec!["shard1", "shard2"]);
    assert_eq!(
        *h.gateway.add_shard_calls.lock(),
        vec!["shard1/localhost:28001", "shard2/localhost:28002"]
    );

    let router = config.router().unwrap();
    assert_eq!(router.id, "mongos");
    assert_eq!(router.port, ROUTER_PORT);
    assert!(config.nodes.iter().all(|n| n.status == NodeStatus::Running));
    assert!(h.data.path().join("config").join("configsvr1").exists());
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.lifecycle.initialize(&mut config).await.unwrap();

    let servers = h.supervisor.server_starts();
    let initiates = h.gateway.initiate_count();
    let adds = h.gateway.add_shard_count();

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert!(report.already_initialized);
    assert!(report.shards.is_empty());
    assert_eq!(h.supervisor.server_starts(), servers);
    assert_eq!(h.supervisor.router_starts(), 1);
    assert_eq!(h.gateway.initiate_count(), initiates);
    assert_eq!(h.gateway.add_shard_count(), adds);
}

#[tokio::test]
async fn test_initialize_after_partial_state_skips_done_steps() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.lifecycle.start(&mut config).await;
    // Config replica set and shard1 done by an earlier run
    h.gateway.mark_initiated(28000);
    h.gateway.mark_initiated(28001);
    h.gateway.register("shard1");

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert!(report.start.is_none());
    assert!(!report.config_initiated);
    assert_eq!(report.shards[0].outcome, ShardOutcome::AlreadyRegistered);
    assert_eq!(report.shards[1].outcome, ShardOutcome::Registered);

    let initiated: Vec<String> = h
        .gateway
        .initiate_calls
        .lock()
        .iter()
        .map(|c| c.1.clone())
        .collect();
    assert_eq!(initiated, vec!["shard2"]);
}

#[tokio::test]
async fn test_multi_member_shards() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 3, 2).unwrap();

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert!(report.is_complete());

    let initiates = h.gateway.initiate_calls.lock().clone();
    assert_eq!(
        initiates[0].2,
        vec!["localhost:28000", "localhost:28001", "localhost:28002"]
    );
    let shard1 = initiates.iter().find(|c| c.1 == "shard1").unwrap();
    assert_eq!(shard1.0, 28003);
    assert_eq!(shard1.2, vec!["localhost:28003", "localhost:28004"]);

    assert_eq!(
        *h.gateway.add_shard_calls.lock(),
        vec![
            "shard1/localhost:28003,localhost:28004",
            "shard2/localhost:28005,localhost:28006"
        ]
    );
    let launch = h.supervisor.last_router_launch.lock().clone().unwrap();
    assert_eq!(
        launch.config_connection,
        "configReplSet/localhost:28000,localhost:28001,localhost:28002"
    );
}

#[tokio::test]
async fn test_shard_failure_does_not_abort_initialize() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.gateway.fail_initiate("shard1");

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert!(matches!(report.shards[0].outcome, ShardOutcome::InitiateFailed(_)));
    assert_eq!(report.shards[1].outcome, ShardOutcome::Registered);
    assert_eq!(report.failed_shards(), vec!["shard1"]);
    assert!(!report.is_complete());

    assert_eq!(status_of(&config, "shard-1"), NodeStatus::Error);
    assert_eq!(status_of(&config, "shard-2"), NodeStatus::Running);
    assert_eq!(h.gateway.registered(), vec!["shard2"]);
}

#[tokio::test]
async fn test_register_failure_is_reported() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.gateway.fail_add_shard("shard2");

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert_eq!(report.shards[0].outcome, ShardOutcome::Registered);
    assert!(matches!(report.shards[1].outcome, ShardOutcome::RegisterFailed(_)));
    assert_eq!(status_of(&config, "shard-2"), NodeStatus::Error);
}

#[tokio::test]
async fn test_retry_failed_shards() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.gateway.fail_initiate("shard1");
    h.lifecycle.initialize(&mut config).await.unwrap();

    h.gateway.clear_failures();
    let results = h.lifecycle.retry_failed_shards(&mut config).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].replica_set, "shard1");
    assert_eq!(results[0].outcome, ShardOutcome::Registered);
    assert_eq!(status_of(&config, "shard-1"), NodeStatus::Running);

    // Nothing left to retry
    assert!(h.lifecycle.retry_failed_shards(&mut config).await.is_empty());
}

#[tokio::test]
async fn test_config_replica_set_failure_is_fatal() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.gateway.fail_initiate("configReplSet");

    let err = h.lifecycle.initialize(&mut config).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ConfigReplicaSet(_)));
    assert_eq!(h.supervisor.router_starts(), 0);
    assert_eq!(h.gateway.add_shard_count(), 0);
}

#[tokio::test]
async fn test_config_status_fault_still_initiates() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 1, 1, 1).unwrap();
    h.gateway.status_fault(28000);

    let report = h.lifecycle.initialize(&mut config).await.unwrap();
    assert!(report.config_initiated);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_router_start_failure_is_fatal() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.supervisor.fail_start("mongos");

    let err = h.lifecycle.initialize(&mut config).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Router(_)));
    assert_eq!(h.gateway.add_shard_count(), 0);
    assert!(config.router().is_none());
}

#[tokio::test]
async fn test_router_not_ready_is_fatal() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 1, 1, 1).unwrap();
    h.supervisor.crash_on_start("mongos");

    let err = h.lifecycle.initialize(&mut config).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Router(_)));
    assert_eq!(status_of(&config, "mongos"), NodeStatus::Error);
}

#[tokio::test]
async fn test_start_skips_alive_nodes() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();

    let first = h.lifecycle.start(&mut config).await;
    assert_eq!(first.started, vec!["config-1", "shard-1", "shard-2"]);
    assert!(first.all_running());

    let second = h.lifecycle.start(&mut config).await;
    assert!(second.started.is_empty());
    assert_eq!(second.already_running.len(), 3);
    assert_eq!(h.supervisor.server_starts(), 3);
}

#[tokio::test]
async fn test_start_failure_marks_node_error() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.supervisor.fail_start("shard-2");

    let report = h.lifecycle.start(&mut config).await;
    assert_eq!(report.started.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "shard-2");
    assert_eq!(status_of(&config, "shard-2"), NodeStatus::Error);
    assert_eq!(status_of(&config, "shard-1"), NodeStatus::Running);
}

#[tokio::test]
async fn test_stop_planned_cluster_is_noop() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();

    let report = h.lifecycle.stop(&mut config).await;
    assert!(report.stopped.is_empty());
    assert!(report.all_stopped());
    assert_eq!(h.supervisor.stops(), 0);
    assert!(config.nodes.iter().all(|n| n.status == NodeStatus::Stopped));
}

#[tokio::test]
async fn test_stop_router_first() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.lifecycle.initialize(&mut config).await.unwrap();

    let report = h.lifecycle.stop(&mut config).await;
    assert_eq!(report.stopped[0], "mongos");
    assert_eq!(report.stopped.len(), 4);
    assert_eq!(h.supervisor.running_count(), 0);
    assert!(config.nodes.iter().all(|n| n.status == NodeStatus::Stopped));
}

#[tokio::test]
async fn test_start_and_stop_single_node() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 1, 1, 1).unwrap();

    assert!(h.lifecycle.start_node(&mut config, "shard-1").await.unwrap());
    assert!(!h.lifecycle.start_node(&mut config, "shard-1").await.unwrap());
    assert_eq!(status_of(&config, "shard-1"), NodeStatus::Running);

    assert!(h.lifecycle.stop_node(&mut config, "shard-1").await.unwrap());
    assert!(!h.lifecycle.stop_node(&mut config, "shard-1").await.unwrap());
    assert_eq!(status_of(&config, "shard-1"), NodeStatus::Stopped);

    let err = h.lifecycle.start_node(&mut config, "nope").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NodeNotFound { .. }));
}

#[tokio::test]
async fn test_delete_cluster_data() {
    let h = harness();
    let mut config = h.lifecycle.plan("c1", 2, 1, 1).unwrap();
    h.lifecycle.start(&mut config).await;
    h.lifecycle.stop(&mut config).await;

    let report = h.lifecycle.delete_cluster_data(&config).await;
    assert!(report.is_clean());
    assert_eq!(report.removed.len(), 3);
    for node in config.nodes.iter().filter(|n| n.role != NodeRole::Router) {
        assert!(!node.data_path.as_ref().unwrap().exists());
    }
}
