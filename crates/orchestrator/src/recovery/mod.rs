//! Recovery coordinator
//!
//! Repairs failed nodes: stop a zombie process, free the port, optionally
//! restart, then verify liveness. Failure events arrive over a channel and are
//! handled on their own tasks so a slow recovery never blocks health scans.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{RecoveryConfig, TopologyConfig};
use crate::error::{OrchestratorError, Result};
use crate::external::{
    is_node_alive, ProcessSupervisor, RouterLaunch, ServerLaunch, SupervisorError,
};
use crate::lifecycle::prepare_data_dir;
use crate::locks::ClusterLocks;
use crate::metadata::{ClusterConfig, NodeFailureEvent, NodeId, NodeInfo, NodeStatus, RecoveryOutcome};
use crate::settle::wait_until;
use crate::storage::ClusterStore;

/// Result of recovering every data-bearing node of a cluster
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub cluster_id: String,
    pub outcomes: Vec<RecoveryOutcome>,
}

impl RecoveryReport {
    pub fn all_recovered(&self) -> bool {
        self.outcomes.iter().all(|o| o.recovered)
    }

    pub fn failed_nodes(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.recovered)
            .map(|o| o.node_id.as_str())
            .collect()
    }
}

/// Recovery coordinator
pub struct RecoveryCoordinator {
    supervisor: Arc<dyn ProcessSupervisor>,
    store: Arc<dyn ClusterStore>,
    locks: Arc<ClusterLocks>,
    topology: TopologyConfig,
    config: RecoveryConfig,
    poll_interval: Duration,
    /// (cluster, node) pairs with a recovery running
    in_flight: Mutex<HashSet<(String, NodeId)>>,
}

impl RecoveryCoordinator {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        store: Arc<dyn ClusterStore>,
        locks: Arc<ClusterLocks>,
        topology: TopologyConfig,
        config: RecoveryConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            supervisor,
            store,
            locks,
            topology,
            config,
            poll_interval,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Recover one node
    ///
    /// `Err` only when the cluster or node is unknown; every other failure is
    /// recorded in the outcome's step log.
    pub async fn recover_node(
        &self,
        cluster_id: &str,
        node_id: &str,
        auto_restart: bool,
    ) -> Result<RecoveryOutcome> {
        let config = self
            .store
            .load(cluster_id)
            .await?
            .ok_or_else(|| OrchestratorError::ClusterNotFound(cluster_id.to_string()))?;
        let node = config
            .node(node_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                cluster_id: cluster_id.to_string(),
                node_id: node_id.to_string(),
            })?;

        info!(cluster_id, node_id, auto_restart, "Starting node recovery");
        let mut outcome = RecoveryOutcome::new(cluster_id, node_id);
        let deadline = self.config.deadline();
        let attempt = self.run_steps(&config, &node, auto_restart, &mut outcome);
        if tokio::time::timeout(deadline, attempt).await.is_err() {
            outcome.fail(format!("Recovery failed: deadline of {:?} exceeded", deadline));
        }

        let status = if outcome.recovered {
            NodeStatus::Running
        } else if auto_restart {
            NodeStatus::Error
        } else {
            NodeStatus::Stopped
        };
        if let Err(e) = self.persist_status(cluster_id, node_id, status).await {
            error!(cluster_id, node_id, "Failed to persist node status: {}", e);
            outcome.step(format!("Failed to persist node status: {}", e));
        }

        if outcome.recovered {
            info!(cluster_id, node_id, "Node recovered");
        } else {
            warn!(cluster_id, node_id, "Node recovery failed: {:?}", outcome.steps);
        }
        Ok(outcome)
    }

    async fn run_steps(
        &self,
        config: &ClusterConfig,
        node: &NodeInfo,
        auto_restart: bool,
        outcome: &mut RecoveryOutcome,
    ) {
        let supervisor = self.supervisor.as_ref();

        if supervisor.is_tracked_alive(&node.id).await {
            match supervisor.stop_process(&node.id).await {
                Ok(()) => outcome.step(format!("Stopped zombie process on port {}", node.port)),
                Err(e) => outcome.step(format!("Failed to stop zombie process: {}", e)),
            }
            tokio::time::sleep(self.config.stop_grace()).await;
        }

        if let Err(e) = supervisor.free_port(node.port).await {
            outcome.fail(format!("Recovery failed: {}", e));
            return;
        }
        outcome.step(format!("Cleaned up port {}", node.port));
        tokio::time::sleep(self.config.port_release()).await;

        if auto_restart {
            match self.restart(config, node).await {
                Ok(()) => {
                    outcome.step(format!("Restarted node {}", node.id));
                    let (id, port) = (node.id.as_str(), node.port);
                    wait_until(self.config.restart_timeout(), self.poll_interval, move || {
                        is_node_alive(supervisor, id, port)
                    })
                    .await;
                }
                Err(e) => outcome.fail(format!("Failed to restart node {}: {}", node.id, e)),
            }
        }

        if is_node_alive(supervisor, &node.id, node.port).await {
            outcome.step(format!(
                "Node health verified - process running on port {}",
                node.port
            ));
        } else {
            outcome.fail(format!("Node still not running on port {}", node.port));
        }
    }

    /// Start a node the way its role requires
    async fn restart(
        &self,
        config: &ClusterConfig,
        node: &NodeInfo,
    ) -> std::result::Result<(), SupervisorError> {
        let host = self.topology.host.as_str();
        if node.role.is_router() {
            // Config membership may have changed since the router was first started
            let config_connection = config
                .config_connection(host, &self.topology.config_replica_set)
                .ok_or_else(|| SupervisorError::Spawn {
                    node_id: node.id.clone(),
                    reason: "cluster has no config servers".to_string(),
                })?;
            let launch = RouterLaunch {
                node_id: node.id.clone(),
                port: node.port,
                config_connection,
                bind_host: host.to_string(),
            };
            return self.supervisor.start_router_process(&launch).await;
        }

        let launch = ServerLaunch::for_node(node, host).ok_or_else(|| SupervisorError::Spawn {
            node_id: node.id.clone(),
            reason: "missing data path or replica set".to_string(),
        })?;
        prepare_data_dir(&launch.data_path)
            .await
            .map_err(|e| SupervisorError::Spawn {
                node_id: node.id.clone(),
                reason: e.to_string(),
            })?;
        self.supervisor.start_server_process(&launch).await
    }

    async fn persist_status(&self, cluster_id: &str, node_id: &str, status: NodeStatus) -> Result<()> {
        let _guard = self.locks.lock(cluster_id).await;
        let Some(mut config) = self.store.load(cluster_id).await? else {
            return Ok(());
        };
        if config.set_status(node_id, status) {
            self.store.save(&config).await?;
        }
        Ok(())
    }

    /// Recover every non-router node in turn, restarting each
    pub async fn recover_all(&self, cluster_id: &str) -> Result<RecoveryReport> {
        let config = self
            .store
            .load(cluster_id)
            .await?
            .ok_or_else(|| OrchestratorError::ClusterNotFound(cluster_id.to_string()))?;

        let mut report = RecoveryReport {
            cluster_id: cluster_id.to_string(),
            outcomes: Vec::new(),
        };
        for node in config.nodes.iter().filter(|n| !n.role.is_router()) {
            report
                .outcomes
                .push(self.recover_node(cluster_id, &node.id, true).await?);
        }
        Ok(report)
    }

    /// Whether a recovery of this node is running
    pub fn is_recovering(&self, cluster_id: &str, node_id: &str) -> bool {
        self.in_flight
            .lock()
            .contains(&(cluster_id.to_string(), node_id.to_string()))
    }

    async fn handle_failure(&self, event: &NodeFailureEvent) {
        warn!(
            cluster_id = %event.cluster_id,
            node_id = %event.node_id,
            kind = %event.kind,
            "Node failure detected: {}",
            event.message
        );
        if let Err(e) = self
            .recover_node(&event.cluster_id, &event.node_id, event.auto_restart)
            .await
        {
            error!(
                "Failed to recover node {} in cluster {}: {}",
                event.node_id, event.cluster_id, e
            );
        }
    }

    /// Start the failure event worker
    ///
    /// Each event is recovered on its own task, at most `max_concurrent` at a
    /// time. Events for a node already under recovery are dropped.
    pub fn start_worker(
        self: Arc<Self>,
        mut events: mpsc::Receiver<NodeFailureEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        info!(
            "Recovery worker started, max {} concurrent recoveries",
            self.config.max_concurrent.max(1)
        );

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let key = (event.cluster_id.clone(), event.node_id.clone());
                if !self.in_flight.lock().insert(key.clone()) {
                    debug!("Node {} already under recovery, dropping event", event.node_id);
                    continue;
                }

                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let coordinator = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    coordinator.handle_failure(&event).await;
                    coordinator.in_flight.lock().remove(&key);
                });
            }
            info!("Failure event channel closed, recovery worker exiting");
        })
    }
}
