//! Shard and chunk distribution management
//!
//! Adds and removes shards through the router, pre-splits chunks and spreads
//! them round-robin across the registered shards.

pub mod chunks;

pub use chunks::{ChunkLocator, ChunkSource, PlannedMove};

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{LifecycleConfig, TopologyConfig};
use crate::error::{OrchestratorError, Result};
use crate::external::{
    is_replica_set_initiated, with_timeout, ClusterGateway, NodeAddr, ProcessSupervisor,
    RemoveShardState, ServerLaunch,
};
use crate::lifecycle::prepare_data_dir;
use crate::metadata::{ClusterConfig, NodeId, NodeInfo, NodeRole, NodeStatus};
use crate::settle::wait_until;
use crate::storage::is_plain_name;

/// `<database>.<collection>`
pub fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

/// Replica set name given to a shard added after creation
pub fn added_shard_replica_set(shard_id: &str) -> String {
    format!("{}Rs", shard_id.replace('-', ""))
}

/// Result of a remove-shard request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RemoveShardOutcome {
    /// Drain finished; these nodes left the topology
    Removed(Vec<NodeId>),
    /// Drain still running; call again later
    Draining(RemoveShardState),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SplitReport {
    pub namespace: String,
    pub succeeded: usize,
    pub failed: Vec<(Value, String)>,
}

impl SplitReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DistributionReport {
    pub namespace: String,
    pub chunks: usize,
    pub moved: usize,
    pub skipped_same_shard: usize,
    pub skipped_min_key: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitAndDistributeReport {
    /// Absent when no split points were given
    pub split: Option<SplitReport>,
    pub distribution: DistributionReport,
}

/// One member of a shard as seen now
#[derive(Debug, Clone, Serialize)]
pub struct ShardMember {
    pub node_id: NodeId,
    pub port: u16,
    pub status: NodeStatus,
    /// Answered an administrative ping
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardSummary {
    pub replica_set: String,
    pub members: Vec<ShardMember>,
}

/// Shard manager
pub struct ShardManager {
    supervisor: Arc<dyn ProcessSupervisor>,
    gateway: Arc<dyn ClusterGateway>,
    topology: TopologyConfig,
    timings: LifecycleConfig,
    locator: ChunkLocator,
}

impl ShardManager {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        gateway: Arc<dyn ClusterGateway>,
        topology: TopologyConfig,
        timings: LifecycleConfig,
    ) -> Self {
        Self {
            supervisor,
            gateway,
            topology,
            timings,
            locator: ChunkLocator::default(),
        }
    }

    fn addr(&self, port: u16) -> NodeAddr {
        NodeAddr::new(self.topology.host.clone(), port)
    }

    fn router(&self, config: &ClusterConfig) -> Result<NodeAddr> {
        config
            .router()
            .map(|r| self.addr(r.port))
            .ok_or_else(|| OrchestratorError::NoRouter(config.id.clone()))
    }

    async fn responds(&self, addr: &NodeAddr) -> bool {
        with_timeout(self.timings.command_timeout(), addr, self.gateway.ping(addr))
            .await
            .is_ok()
    }

    async fn is_initiated(&self, addr: &NodeAddr) -> bool {
        matches!(
            with_timeout(
                self.timings.command_timeout(),
                addr,
                is_replica_set_initiated(self.gateway.as_ref(), addr),
            )
            .await,
            Ok(true)
        )
    }

    /// Shards grouped by replica set, with live reachability of each member
    pub async fn list_shards(&self, config: &ClusterConfig) -> Vec<ShardSummary> {
        let mut shards = Vec::new();
        for group in config.shard_groups(&self.topology.host) {
            let mut members = Vec::with_capacity(group.node_ids.len());
            for node in group.node_ids.iter().filter_map(|id| config.node(id)) {
                members.push(ShardMember {
                    node_id: node.id.clone(),
                    port: node.port,
                    status: node.status,
                    reachable: self.responds(&self.addr(node.port)).await,
                });
            }
            shards.push(ShardSummary {
                replica_set: group.replica_set,
                members,
            });
        }
        shards
    }

    /// Create a single-member shard on the next free port and register it
    ///
    /// On any failure the node is taken back out of the topology and its
    /// process stopped, so the topology only lists what is actually serving.
    pub async fn add_shard(&self, config: &mut ClusterConfig, shard_id: &str) -> Result<NodeInfo> {
        info!(cluster_id = %config.id, shard_id, "=== Creating new shard ===");
        if !is_plain_name(shard_id) {
            return Err(OrchestratorError::InvalidPlan(format!(
                "shard id {:?} is not a plain name",
                shard_id
            )));
        }
        let replica_set = added_shard_replica_set(shard_id);
        if config.node(shard_id).is_some() || config.shard_names().contains(&replica_set) {
            return Err(OrchestratorError::ShardExists(shard_id.to_string()));
        }
        let router = self.router(config)?;

        let port = config.next_port();
        if config.nodes.iter().any(|n| n.port == port) {
            return Err(OrchestratorError::InvalidPlan(format!(
                "no free port left for shard {}",
                shard_id
            )));
        }
        let data_path = config.base_data_path.join("shard").join(shard_id);
        if config
            .nodes
            .iter()
            .any(|n| n.data_path.as_ref() == Some(&data_path))
        {
            return Err(OrchestratorError::ShardExists(shard_id.to_string()));
        }
        let node = NodeInfo::server(shard_id, NodeRole::Shard, port, data_path, replica_set);
        info!(
            "Shard {} gets port {}, replica set {}",
            shard_id,
            port,
            node.replica_set.as_deref().unwrap_or_default()
        );

        config.nodes.push(node.clone());
        config.touch();

        match self.bootstrap(&router, &node).await {
            Ok(()) => {
                config.set_status(shard_id, NodeStatus::Running);
                info!(cluster_id = %config.id, shard_id, "Shard added to cluster");
                let mut node = node;
                node.status = NodeStatus::Running;
                Ok(node)
            }
            Err(e) => {
                error!(cluster_id = %config.id, shard_id, "Failed to create shard: {}", e);
                config.remove_node(shard_id);
                if self.supervisor.is_tracked_alive(shard_id).await {
                    if let Err(stop) = self.supervisor.stop_process(shard_id).await {
                        warn!("Failed to stop half-created shard {}: {}", shard_id, stop);
                    }
                }
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, router: &NodeAddr, node: &NodeInfo) -> Result<()> {
        let fail = |step: &'static str, reason: String| OrchestratorError::ShardBootstrap {
            shard: node.id.clone(),
            step,
            reason,
        };
        let launch = ServerLaunch::for_node(node, &self.topology.host)
            .ok_or_else(|| fail("plan", "missing data path or replica set".to_string()))?;
        let replica_set = launch.replica_set.clone();
        let addr = self.addr(node.port);
        let timeout = self.timings.command_timeout();

        prepare_data_dir(&launch.data_path)
            .await
            .map_err(|e| fail("prepare data directory", e.to_string()))?;

        self.supervisor
            .start_server_process(&launch)
            .await
            .map_err(|e| fail("start process", e.to_string()))?;

        let addr_ref = &addr;
        if !wait_until(
            self.timings.process_settle_timeout(),
            self.timings.poll_interval(),
            move || self.responds(addr_ref),
        )
        .await
        {
            return Err(fail(
                "wait for process",
                format!("no answer on {} within {:?}", addr, self.timings.process_settle_timeout()),
            ));
        }

        let members = vec![addr.to_string()];
        with_timeout(
            timeout,
            &addr,
            self.gateway.initiate_replica_set(&addr, &replica_set, &members),
        )
        .await
        .map_err(|e| fail("initiate replica set", e.to_string()))?;

        if !wait_until(
            self.timings.shard_settle_timeout(members.len()),
            self.timings.poll_interval(),
            move || self.is_initiated(addr_ref),
        )
        .await
        {
            warn!("Replica set {} not settled, registering anyway", replica_set);
        }

        let connection = format!("{}/{}", replica_set, addr);
        with_timeout(timeout, router, self.gateway.add_shard(router, &connection))
            .await
            .map_err(|e| fail("register shard", e.to_string()))?;
        info!(connection = %connection, "Shard registered with router");
        Ok(())
    }

    /// Resolve a node ID or replica set name to the registered shard name
    fn shard_name(&self, config: &ClusterConfig, shard_id: &str) -> Result<String> {
        if let Some(node) = config.node(shard_id).filter(|n| n.role == NodeRole::Shard) {
            return Ok(node
                .replica_set
                .clone()
                .unwrap_or_else(|| node.id.clone()));
        }
        if config.shard_names().iter().any(|name| name == shard_id) {
            return Ok(shard_id.to_string());
        }
        Err(OrchestratorError::ShardNotFound(shard_id.to_string()))
    }

    /// Ask the router to remove a shard
    ///
    /// Removal is a drain: the shard's nodes leave the topology only once the
    /// router reports `completed`.
    pub async fn remove_shard(
        &self,
        config: &mut ClusterConfig,
        shard_id: &str,
    ) -> Result<RemoveShardOutcome> {
        let shard = self.shard_name(config, shard_id)?;
        let router = self.router(config)?;

        let state = with_timeout(
            self.timings.command_timeout(),
            &router,
            self.gateway.remove_shard(&router, &shard),
        )
        .await?;
        info!(cluster_id = %config.id, shard = %shard, state = %state, "Remove shard response");

        match state {
            RemoveShardState::Completed => {
                let node_ids: Vec<NodeId> = config
                    .shard_nodes()
                    .into_iter()
                    .filter(|n| n.replica_set.as_deref() == Some(shard.as_str()))
                    .map(|n| n.id.clone())
                    .collect();
                for id in &node_ids {
                    config.remove_node(id);
                    if self.supervisor.is_tracked_alive(id).await {
                        if let Err(e) = self.supervisor.stop_process(id).await {
                            warn!("Failed to stop removed shard node {}: {}", id, e);
                        }
                    }
                }
                info!("Shard {} successfully removed", shard);
                Ok(RemoveShardOutcome::Removed(node_ids))
            }
            RemoveShardState::Started | RemoveShardState::Ongoing => {
                info!("Shard {} is being drained", shard);
                Ok(RemoveShardOutcome::Draining(state))
            }
            state => Err(OrchestratorError::UnexpectedRemoveState { shard, state }),
        }
    }

    /// Split `namespace` at each value of `split_points`
    ///
    /// Keeps going past failed splits; they are listed in the report.
    pub async fn split_chunks(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        shard_key: &str,
        split_points: &[Value],
    ) -> Result<SplitReport> {
        let router = self.router(config)?;
        let mut report = SplitReport {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        for middle in split_points {
            info!("Splitting {} at {}={}", namespace, shard_key, middle);
            match with_timeout(
                self.timings.command_timeout(),
                &router,
                self.gateway.split_chunk(&router, namespace, shard_key, middle),
            )
            .await
            {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!("Split of {} at {} failed: {}", namespace, middle, e);
                    report.failed.push((middle.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Spread the namespace's chunks round-robin over the registered shards
    pub async fn move_chunks_to_shards(
        &self,
        config: &ClusterConfig,
        namespace: &str,
    ) -> Result<DistributionReport> {
        let router = self.router(config)?;
        let shards = config.shard_names();
        if shards.len() < 2 {
            return Err(OrchestratorError::NotEnoughShards(shards.len()));
        }

        let chunks = self
            .locator
            .locate(self.gateway.as_ref(), &router, namespace)
            .await?;
        if chunks.is_empty() {
            return Err(OrchestratorError::NoChunks(namespace.to_string()));
        }
        info!("Found {} chunks to distribute for {}", chunks.len(), namespace);

        let mut report = DistributionReport {
            namespace: namespace.to_string(),
            chunks: chunks.len(),
            ..Default::default()
        };
        for planned in chunks::plan_moves(&chunks, &shards) {
            match planned {
                PlannedMove::SameShard => report.skipped_same_shard += 1,
                PlannedMove::SentinelBound => report.skipped_min_key += 1,
                PlannedMove::Move {
                    shard_key,
                    find,
                    to,
                } => {
                    info!("Moving chunk with {}={} to {}", shard_key, find, to);
                    match with_timeout(
                        self.timings.command_timeout(),
                        &router,
                        self.gateway
                            .move_chunk(&router, namespace, &shard_key, &find, &to),
                    )
                    .await
                    {
                        Ok(()) => report.moved += 1,
                        Err(e) => {
                            warn!("Failed to move chunk {}={}: {}", shard_key, find, e);
                            report
                                .failed
                                .push(format!("{}={} -> {}: {}", shard_key, find, to, e));
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Turn automatic balancing on
    pub async fn rebalance(&self, config: &ClusterConfig) -> Result<()> {
        let router = self.router(config)?;
        with_timeout(
            self.timings.command_timeout(),
            &router,
            self.gateway.start_balancer(&router),
        )
        .await?;
        info!(cluster_id = %config.id, "Balancer started");
        Ok(())
    }

    /// Split at the given points, then distribute
    pub async fn split_and_distribute(
        &self,
        config: &ClusterConfig,
        namespace: &str,
        shard_key: &str,
        split_points: &[Value],
    ) -> Result<SplitAndDistributeReport> {
        let split = if split_points.is_empty() {
            None
        } else {
            let report = self
                .split_chunks(config, namespace, shard_key, split_points)
                .await?;
            if !report.all_succeeded() {
                warn!("Some splits of {} failed, distributing anyway", namespace);
            }
            Some(report)
        };
        let distribution = self.move_chunks_to_shards(config, namespace).await?;
        Ok(SplitAndDistributeReport {
            split,
            distribution,
        })
    }
}
