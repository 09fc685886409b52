//! Topology planning and lifecycle control
//!
//! Drives a cluster through Created -> Started -> Initialized -> Stopped.
//! Every step of `initialize` is guarded by a pre-check so a repeated call
//! has no further observable effect.
//!
//! Ordering inside one initialization is strict: config replica set, then the
//! router, then shards.

pub mod planner;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::{LifecycleConfig, TopologyConfig};
use crate::error::{OrchestratorError, Result};
use crate::external::{
    is_node_alive, is_replica_set_initiated, with_timeout, ClusterGateway, NodeAddr,
    ProcessSupervisor, RouterLaunch, ServerLaunch, SupervisorError,
};
use crate::metadata::{ClusterConfig, NodeId, NodeInfo, NodeStatus, ShardGroup};
use crate::settle::wait_until;

/// Lock file a server leaves behind after an unclean shutdown
const LOCK_FILE: &str = "mongod.lock";

/// Per-node result of a start pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartReport {
    pub started: Vec<NodeId>,
    /// Alive before the pass; left untouched
    pub already_running: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
}

impl StartReport {
    pub fn all_running(&self) -> bool {
        self.failed.is_empty()
    }
}

/// How one shard fared during initialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum ShardOutcome {
    Registered,
    AlreadyRegistered,
    InitiateFailed(String),
    RegisterFailed(String),
}

impl ShardOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ShardOutcome::Registered | ShardOutcome::AlreadyRegistered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardInitResult {
    pub replica_set: String,
    pub outcome: ShardOutcome,
}

/// Result of a successful (possibly partial) initialization
#[derive(Debug, Clone, Default, Serialize)]
pub struct InitializeReport {
    pub cluster_id: String,
    /// Router reachable and every shard registered before anything was done
    pub already_initialized: bool,
    /// Present when processes had to be started first
    pub start: Option<StartReport>,
    /// Config replica set was initiated by this run
    pub config_initiated: bool,
    /// Router was started by this run
    pub router_started: bool,
    pub shards: Vec<ShardInitResult>,
}

impl InitializeReport {
    fn new(cluster_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            ..Default::default()
        }
    }

    /// Replica set names of shards left uninitialized or unregistered
    pub fn failed_shards(&self) -> Vec<&str> {
        self.shards
            .iter()
            .filter(|s| !s.outcome.is_ok())
            .map(|s| s.replica_set.as_str())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_shards().is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    pub stopped: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
}

impl StopReport {
    pub fn all_stopped(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ensure a node's data directory exists and drop a stale lock file
pub(crate) async fn prepare_data_dir(path: &Path) -> std::io::Result<()> {
    if fs::try_exists(path).await? {
        let lock = path.join(LOCK_FILE);
        if fs::try_exists(&lock).await? {
            warn!("Removing stale lock file: {:?}", lock);
            fs::remove_file(&lock).await?;
        }
    } else {
        fs::create_dir_all(path).await?;
        info!("Created data directory: {:?}", path);
    }
    Ok(())
}

/// Lifecycle controller
pub struct LifecycleController {
    supervisor: Arc<dyn ProcessSupervisor>,
    gateway: Arc<dyn ClusterGateway>,
    topology: TopologyConfig,
    timings: LifecycleConfig,
}

impl LifecycleController {
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
        }
    }

    /// Plan a new cluster with the configured base port and data path
    pub fn plan(
        &self,
        cluster_id: &str,
        shard_count: u32,
        config_server_count: u32,
        replica_set_size: u32,
    ) -> Result<ClusterConfig> {
        planner::plan(
            &self.topology,
            cluster_id,
            shard_count,
            config_server_count,
            replica_set_size,
        )
    }

    fn addr(&self, port: u16) -> NodeAddr {
        NodeAddr::new(self.topology.host.clone(), port)
    }

    async fn responds(&self, addr: &NodeAddr) -> bool {
        with_timeout(self.timings.command_timeout(), addr, self.gateway.ping(addr))
            .await
            .is_ok()
    }

    async fn all_respond(&self, addrs: &[NodeAddr]) -> bool {
        for addr in addrs {
            if !self.responds(addr).await {
                return false;
            }
        }
        true
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

    /// Launch every non-router node that is not already alive
    ///
    /// Best effort: a node that fails to start is marked `error` and the pass
    /// continues.
    pub async fn start(&self, config: &mut ClusterConfig) -> StartReport {
        info!(cluster_id = %config.id, "Starting cluster processes");
        let mut report = StartReport::default();
        let host = self.topology.host.as_str();

        for node in config.nodes.iter_mut().filter(|n| !n.role.is_router()) {
            if is_node_alive(self.supervisor.as_ref(), &node.id, node.port).await {
                debug!("Node {} already alive on port {}", node.id, node.port);
                node.status = NodeStatus::Running;
                report.already_running.push(node.id.clone());
                continue;
            }

            let Some(launch) = ServerLaunch::for_node(node, host) else {
                node.status = NodeStatus::Error;
                report
                    .failed
                    .push((node.id.clone(), "missing data path or replica set".to_string()));
                continue;
            };

            if let Err(e) = prepare_data_dir(&launch.data_path).await {
                error!("Failed to prepare data directory {:?}: {}", launch.data_path, e);
                node.status = NodeStatus::Error;
                report.failed.push((node.id.clone(), e.to_string()));
                continue;
            }

            match self.supervisor.start_server_process(&launch).await {
                Ok(()) => {
                    info!(node_id = %node.id, port = node.port, role = %node.role, "Node started");
                    node.status = NodeStatus::Running;
                    report.started.push(node.id.clone());
                }
                Err(e) => {
                    error!(node_id = %node.id, "Failed to start node: {}", e);
                    node.status = NodeStatus::Error;
                    report.failed.push((node.id.clone(), e.to_string()));
                }
            }
        }

        config.touch();
        report
    }

    /// Start one node; returns false when it was already alive
    pub async fn start_node(&self, config: &mut ClusterConfig, node_id: &str) -> Result<bool> {
        let node = config
            .node(node_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NodeNotFound {
                cluster_id: config.id.clone(),
                node_id: node_id.to_string(),
            })?;
        if is_node_alive(self.supervisor.as_ref(), &node.id, node.port).await {
            config.set_status(node_id, NodeStatus::Running);
            return Ok(false);
        }

        let host = self.topology.host.as_str();
        let started = if node.role.is_router() {
            let config_connection = config
                .config_connection(host, &self.topology.config_replica_set)
                .ok_or_else(|| OrchestratorError::Router("cluster has no config servers".to_string()))?;
            let launch = RouterLaunch {
                node_id: node.id.clone(),
                port: node.port,
                config_connection,
                bind_host: host.to_string(),
            };
            self.supervisor.start_router_process(&launch).await
        } else {
            let launch = ServerLaunch::for_node(&node, host).ok_or_else(|| {
                OrchestratorError::InvalidPlan(format!("node {} has no data path or replica set", node.id))
            })?;
            if let Err(e) = prepare_data_dir(&launch.data_path).await {
                config.set_status(node_id, NodeStatus::Error);
                return Err(SupervisorError::Spawn {
                    node_id: node.id,
                    reason: format!("data directory: {}", e),
                }
                .into());
            }
            self.supervisor.start_server_process(&launch).await
        };

        match started {
            Ok(()) => {
                info!(node_id, port = node.port, "Node started");
                config.set_status(node_id, NodeStatus::Running);
                Ok(true)
            }
            Err(e) => {
                config.set_status(node_id, NodeStatus::Error);
                Err(e.into())
            }
        }
    }

    /// Stop one node; returns false when no tracked process was running
    pub async fn stop_node(&self, config: &mut ClusterConfig, node_id: &str) -> Result<bool> {
        if config.node(node_id).is_none() {
            return Err(OrchestratorError::NodeNotFound {
                cluster_id: config.id.clone(),
                node_id: node_id.to_string(),
            });
        }
        if !self.supervisor.is_tracked_alive(node_id).await {
            config.set_status(node_id, NodeStatus::Stopped);
            return Ok(false);
        }
        self.supervisor.stop_process(node_id).await?;
        info!(node_id, "Node stopped");
        config.set_status(node_id, NodeStatus::Stopped);
        Ok(true)
    }

    /// Bring a planned or started cluster to the initialized state
    ///
    /// `Err` only for fatal steps (config replica set, router) or when the
    /// whole run exceeds its deadline. Shard failures are reported in the
    /// returned report and mark the shard's nodes `error`.
    pub async fn initialize(&self, config: &mut ClusterConfig) -> Result<InitializeReport> {
        let cluster_id = config.id.clone();
        match tokio::time::timeout(self.timings.initialize_deadline(), self.run_initialize(config))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(cluster_id = %cluster_id, "Initialization exceeded deadline");
                Err(OrchestratorError::Deadline {
                    operation: "Initialization",
                    cluster_id,
                })
            }
        }
    }

    async fn run_initialize(&self, config: &mut ClusterConfig) -> Result<InitializeReport> {
        info!(cluster_id = %config.id, "=== Starting cluster initialization ===");
        let mut report = InitializeReport::new(&config.id);

        if self.is_fully_initialized(config).await {
            info!(cluster_id = %config.id, "Cluster already initialized, nothing to do");
            report.already_initialized = true;
            return Ok(report);
        }

        let mut needs_start = false;
        for node in config.nodes.iter().filter(|n| !n.role.is_router()) {
            if !is_node_alive(self.supervisor.as_ref(), &node.id, node.port).await {
                needs_start = true;
                break;
            }
        }
        if needs_start {
            let started = self.start(config).await;
            let addrs: Vec<NodeAddr> = config
                .nodes
                .iter()
                .filter(|n| !n.role.is_router() && n.is_running())
                .map(|n| self.addr(n.port))
                .collect();
            let addrs = addrs.as_slice();
            if !wait_until(
                self.timings.process_settle_timeout(),
                self.timings.poll_interval(),
                move || self.all_respond(addrs),
            )
            .await
            {
                warn!(cluster_id = %config.id, "Not every started process answered within settle timeout");
            }
            report.start = Some(started);
        }

        info!(cluster_id = %config.id, "Step 1: config server replica set");
        report.config_initiated = self.ensure_config_replica_set(config).await?;

        info!(cluster_id = %config.id, "Step 2: router");
        report.router_started = self.ensure_router(config).await?;

        info!(cluster_id = %config.id, "Step 3: shard replica sets");
        report.shards = self.initialize_shards(config, None).await;

        let failed = report.failed_shards();
        if failed.is_empty() {
            info!(cluster_id = %config.id, "=== Cluster initialization complete ===");
        } else {
            warn!(
                cluster_id = %config.id,
                "=== Cluster initialization finished with failed shards: {:?} ===",
                failed
            );
        }
        Ok(report)
    }

    /// Router reachable and every shard group registered with it
    pub async fn is_fully_initialized(&self, config: &ClusterConfig) -> bool {
        let Some(router) = config.router() else {
            return false;
        };
        let router = self.addr(router.port);
        if !self.responds(&router).await {
            return false;
        }
        for group in config.shard_groups(&self.topology.host) {
            let registered = with_timeout(
                self.timings.command_timeout(),
                &router,
                self.gateway.is_shard_registered(&router, &group.replica_set),
            )
            .await;
            if !matches!(registered, Ok(true)) {
                return false;
            }
        }
        true
    }

    /// Initiate the config replica set unless it already is; returns whether it was initiated now
    async fn ensure_config_replica_set(&self, config: &ClusterConfig) -> Result<bool> {
        let host = self.topology.host.as_str();
        let config_nodes = config.config_nodes();
        let Some(seed) = config_nodes.first() else {
            return Err(OrchestratorError::ConfigReplicaSet(
                "cluster has no config servers".to_string(),
            ));
        };
        let replica_set = config
            .config_replica_set()
            .unwrap_or(self.topology.config_replica_set.as_str())
            .to_string();
        let seed = self.addr(seed.port);
        let members: Vec<String> = config_nodes.iter().map(|n| n.member_addr(host)).collect();

        let status = with_timeout(
            self.timings.command_timeout(),
            &seed,
            is_replica_set_initiated(self.gateway.as_ref(), &seed),
        )
        .await;
        match status {
            Ok(true) => {
                info!("Config replica set {} already initiated", replica_set);
                return Ok(false);
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Config replica set status probe on {} failed, initiating anyway: {}",
                seed, e
            ),
        }

        with_timeout(
            self.timings.command_timeout(),
            &seed,
            self.gateway.initiate_replica_set(&seed, &replica_set, &members),
        )
        .await
        .map_err(|e| {
            error!("Failed to initialize config replica set {}: {}", replica_set, e);
            OrchestratorError::ConfigReplicaSet(format!("initiate {} failed: {}", replica_set, e))
        })?;
        info!(replica_set = %replica_set, members = members.len(), "Config replica set initiated");

        let seed_ref = &seed;
        if !wait_until(
            self.timings.config_election_timeout(),
            self.timings.poll_interval(),
            move || self.is_initiated(seed_ref),
        )
        .await
        {
            warn!(
                "Config replica set {} not settled after {:?}, continuing",
                replica_set,
                self.timings.config_election_timeout()
            );
        }
        Ok(true)
    }

    /// Start the router unless it already answers; returns whether it was started now
    ///
    /// The router node is added to the topology if it is not there yet.
    async fn ensure_router(&self, config: &mut ClusterConfig) -> Result<bool> {
        let (router_id, port) = match config.router() {
            Some(r) => (r.id.clone(), r.port),
            None => (self.topology.router_node_id.clone(), self.topology.router_port),
        };
        let addr = self.addr(port);

        if self.responds(&addr).await {
            info!("Router {} already accepting connections on {}", router_id, addr);
            upsert_router(config, &router_id, port, NodeStatus::Running);
            return Ok(false);
        }

        let config_connection = config
            .config_connection(&self.topology.host, &self.topology.config_replica_set)
            .ok_or_else(|| OrchestratorError::Router("cluster has no config servers".to_string()))?;
        let launch = RouterLaunch {
            node_id: router_id.clone(),
            port,
            config_connection,
            bind_host: self.topology.host.clone(),
        };

        if let Err(e) = self.supervisor.start_router_process(&launch).await {
            error!("Failed to start router {}: {}", router_id, e);
            if config.router().is_some() {
                config.set_status(&router_id, NodeStatus::Error);
            }
            return Err(OrchestratorError::Router(e.to_string()));
        }
        info!(node_id = %router_id, port, "Router process started");

        let addr_ref = &addr;
        let ready = wait_until(
            self.timings.router_ready_timeout(),
            self.timings.poll_interval(),
            move || self.responds(addr_ref),
        )
        .await;
        if !ready {
            upsert_router(config, &router_id, port, NodeStatus::Error);
            return Err(OrchestratorError::Router(format!(
                "router {} did not accept connections within {:?}",
                addr,
                self.timings.router_ready_timeout()
            )));
        }

        upsert_router(config, &router_id, port, NodeStatus::Running);
        Ok(true)
    }

    /// Initiate and register shard replica sets
    ///
    /// `only` restricts the pass to the named replica sets. Failed shards get
    /// their nodes marked `error`; the loop always moves on to the next shard.
    pub async fn initialize_shards(
        &self,
        config: &mut ClusterConfig,
        only: Option<&[String]>,
    ) -> Vec<ShardInitResult> {
        let Some(router) = config.router().map(|r| self.addr(r.port)) else {
            warn!(cluster_id = %config.id, "No router in topology, skipping shard initialization");
            return Vec::new();
        };

        let groups: Vec<ShardGroup> = config
            .shard_groups(&self.topology.host)
            .into_iter()
            .filter(|g| only.map_or(true, |names| names.contains(&g.replica_set)))
            .collect();

        let mut results = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let seed_port = group
                .node_ids
                .first()
                .and_then(|id| config.node(id))
                .map(|n| n.port);
            let outcome = match seed_port {
                Some(port) => self.initialize_shard(&router, &self.addr(port), group).await,
                None => ShardOutcome::InitiateFailed("shard has no members".to_string()),
            };

            let status = if outcome.is_ok() {
                NodeStatus::Running
            } else {
                warn!(
                    replica_set = %group.replica_set,
                    "Shard initialization failed, skipping: {:?}", outcome
                );
                NodeStatus::Error
            };
            for id in &group.node_ids {
                config.set_status(id, status);
            }

            let registered_now = outcome == ShardOutcome::Registered;
            results.push(ShardInitResult {
                replica_set: group.replica_set.clone(),
                outcome,
            });
            if registered_now && index + 1 < groups.len() {
                tokio::time::sleep(self.timings.registration_pause()).await;
            }
        }
        results
    }

    async fn initialize_shard(
        &self,
        router: &NodeAddr,
        seed: &NodeAddr,
        group: &ShardGroup,
    ) -> ShardOutcome {
        let timeout = self.timings.command_timeout();
        let replica_set = group.replica_set.as_str();

        match with_timeout(timeout, seed, is_replica_set_initiated(self.gateway.as_ref(), seed)).await
        {
            Ok(true) => debug!("Shard replica set {} already initiated", replica_set),
            status => {
                if let Err(e) = status {
                    warn!("Status probe of {} on {} failed: {}", replica_set, seed, e);
                }
                info!(replica_set, members = group.members.len(), "Initializing shard replica set");
                if let Err(e) = with_timeout(
                    timeout,
                    seed,
                    self.gateway
                        .initiate_replica_set(seed, replica_set, &group.members),
                )
                .await
                {
                    error!("Failed to initialize shard {}: {}", replica_set, e);
                    return ShardOutcome::InitiateFailed(e.to_string());
                }

                let settle = self.timings.shard_settle_timeout(group.members.len());
                if !wait_until(settle, self.timings.poll_interval(), move || {
                    self.is_initiated(seed)
                })
                .await
                {
                    warn!("Shard {} not settled after {:?}, registering anyway", replica_set, settle);
                }
            }
        }

        match with_timeout(
            timeout,
            router,
            self.gateway.is_shard_registered(router, replica_set),
        )
        .await
        {
            Ok(true) => {
                info!("Shard {} already registered", replica_set);
                return ShardOutcome::AlreadyRegistered;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check registration of {}: {}", replica_set, e),
        }

        let connection = group.connection_spec();
        match with_timeout(timeout, router, self.gateway.add_shard(router, &connection)).await {
            Ok(()) => {
                info!(replica_set, connection = %connection, "Shard added to cluster");
                ShardOutcome::Registered
            }
            Err(e) => {
                error!("Failed to add shard {} to cluster: {}", replica_set, e);
                ShardOutcome::RegisterFailed(e.to_string())
            }
        }
    }

    /// Re-run the shard phase for shards whose nodes are in `error`
    pub async fn retry_failed_shards(&self, config: &mut ClusterConfig) -> Vec<ShardInitResult> {
        let failed: Vec<String> = config
            .shard_groups(&self.topology.host)
            .into_iter()
            .filter(|g| {
                g.node_ids
                    .iter()
                    .any(|id| config.node(id).map_or(false, |n| n.status == NodeStatus::Error))
            })
            .map(|g| g.replica_set)
            .collect();
        if failed.is_empty() {
            return Vec::new();
        }
        info!(cluster_id = %config.id, "Retrying failed shards: {:?}", failed);
        self.initialize_shards(config, Some(failed.as_slice())).await
    }

    /// Stop the router, then every node whose process is tracked alive
    ///
    /// Nodes that were never started are skipped, so stopping a planned
    /// cluster is a no-op.
    pub async fn stop(&self, config: &mut ClusterConfig) -> StopReport {
        info!(cluster_id = %config.id, "=== Stopping cluster ===");
        let mut report = StopReport::default();

        let mut order: Vec<NodeId> = config
            .nodes
            .iter()
            .filter(|n| n.role.is_router())
            .map(|n| n.id.clone())
            .collect();
        if order.is_empty() {
            order.push(self.topology.router_node_id.clone());
        }
        order.extend(
            config
                .nodes
                .iter()
                .filter(|n| !n.role.is_router())
                .map(|n| n.id.clone()),
        );

        for node_id in order {
            if !self.supervisor.is_tracked_alive(&node_id).await {
                if let Some(node) = config.node_mut(&node_id) {
                    if node.status == NodeStatus::Running {
                        node.status = NodeStatus::Stopped;
                    }
                }
                continue;
            }
            match self.supervisor.stop_process(&node_id).await {
                Ok(()) => {
                    info!(node_id = %node_id, "Node stopped");
                    config.set_status(&node_id, NodeStatus::Stopped);
                    report.stopped.push(node_id);
                }
                Err(e) => {
                    error!(node_id = %node_id, "Failed to stop node: {}", e);
                    report.failed.push((node_id, e.to_string()));
                }
            }
        }

        config.touch();
        info!(cluster_id = %config.id, "=== Cluster stop complete ===");
        report
    }

    /// Remove every non-router node's data directory
    pub async fn delete_cluster_data(&self, config: &ClusterConfig) -> DeleteReport {
        let mut report = DeleteReport::default();
        for path in config.nodes.iter().filter_map(|n| n.data_path.as_ref()) {
            match fs::try_exists(path).await {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => {
                    report.failed.push((path.clone(), e.to_string()));
                    continue;
                }
            }
            match fs::remove_dir_all(path).await {
                Ok(()) => {
                    info!("Deleted data directory: {:?}", path);
                    report.removed.push(path.clone());
                }
                Err(e) => {
                    error!("Failed to delete data directory {:?}: {}", path, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }
        report
    }
}

fn upsert_router(config: &mut ClusterConfig, router_id: &str, port: u16, status: NodeStatus) {
    match config.node_mut(router_id) {
        Some(node) => node.status = status,
        None => {
            let mut node = NodeInfo::router(router_id, port);
            node.status = status;
            config.nodes.push(node);
        }
    }
    config.touch();
}
