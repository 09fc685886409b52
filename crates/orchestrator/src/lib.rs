//! Orchestrator - Sharded database cluster control plane
//!
//! Provisions, bootstraps, monitors and heals a sharded cluster made of config
//! servers, shard replica set members and a router process.
//!
//! # Features
//! - Topology planning and idempotent lifecycle control
//! - Health monitoring with failure hysteresis
//! - Event-driven node recovery
//! - Shard add/remove and chunk distribution
//!
//! # Usage Example
//! ```ignore
//! use orchestrator::{Orchestrator, OrchestratorConfig};
//! use orchestrator::storage::FileClusterStore;
//!
//! let config = OrchestratorConfig::default();
//! let store = Arc::new(FileClusterStore::new(&config.topology.store_dir));
//! let orchestrator = Arc::new(Orchestrator::new(config, store, supervisor, gateway));
//! orchestrator.start_background();
//! orchestrator.create_cluster("c1", 2, 1, 1).await?;
//! orchestrator.initialize_cluster("c1").await?;
//! ```

pub mod config;
pub mod error;
pub mod external;
pub mod health;
pub mod lifecycle;
pub mod locks;
pub mod metadata;
pub mod recovery;
pub mod settle;
pub mod shard;
pub mod status;
pub mod storage;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use external::{ClusterGateway, ProcessSupervisor};
use health::{ClusterHealthReport, HealthCache, HealthMonitor};
use lifecycle::{DeleteReport, InitializeReport, LifecycleController, ShardInitResult, StartReport, StopReport};
use locks::ClusterLocks;
use metadata::{ClusterConfig, NodeFailureEvent, NodeHealth, NodeInfo, RecoveryOutcome};
use recovery::{RecoveryCoordinator, RecoveryReport};
use shard::{
    namespace, DistributionReport, RemoveShardOutcome, ShardManager, ShardSummary,
    SplitAndDistributeReport, SplitReport,
};
use status::ClusterStatus;
use storage::ClusterStore;

/// Result of deleting a cluster
#[derive(Debug, Clone, Serialize)]
pub struct DeleteClusterReport {
    pub cluster_id: String,
    pub stop: StopReport,
    pub data: DeleteReport,
}

/// Orchestrator control plane
///
/// Owns the injected collaborators and every piece of process-wide state:
/// the health cache, the failure event channel and the background tasks.
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn ClusterStore>,
    supervisor: Arc<dyn ProcessSupervisor>,
    locks: Arc<ClusterLocks>,
    lifecycle: LifecycleController,
    health: Arc<HealthMonitor>,
    recovery: Arc<RecoveryCoordinator>,
    shards: ShardManager,
    events: mpsc::Sender<NodeFailureEvent>,
    /// Taken by the recovery worker on `start_background`
    events_rx: Mutex<Option<mpsc::Receiver<NodeFailureEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create orchestrator instance
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn ClusterStore>,
        supervisor: Arc<dyn ProcessSupervisor>,
        gateway: Arc<dyn ClusterGateway>,
    ) -> Self {
        let (events, events_rx) = mpsc::channel(config.recovery.event_queue_capacity.max(1));
        let locks = Arc::new(ClusterLocks::new());
        let topology = config.topology.clone();

        let lifecycle = LifecycleController::new(
            supervisor.clone(),
            gateway.clone(),
            topology.clone(),
            config.lifecycle.clone(),
        );
        let health = Arc::new(
            HealthMonitor::new(
                supervisor.clone(),
                gateway.clone(),
                Arc::new(HealthCache::new()),
                config.health.clone(),
                topology.host.clone(),
            )
            .with_events(events.clone()),
        );
        let recovery = Arc::new(RecoveryCoordinator::new(
            supervisor.clone(),
            store.clone(),
            locks.clone(),
            topology.clone(),
            config.recovery.clone(),
            config.lifecycle.poll_interval(),
        ));
        let shards = ShardManager::new(
            supervisor.clone(),
            gateway,
            topology,
            config.lifecycle.clone(),
        );

        info!(
            "Orchestrator initialized: host={}, base_port={}, store={:?}",
            config.topology.host, config.topology.base_port, config.topology.store_dir
        );

        Self {
            config,
            store,
            supervisor,
            locks,
            lifecycle,
            health,
            recovery,
            shards,
            events,
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Start the health checker, the recovery worker and, when enabled, the
    /// shard retry timer
    pub fn start_background(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Background tasks already running");
            return;
        }

        tasks.push(self.health.clone().start_health_checker(self.store.clone()));
        if let Some(events_rx) = self.events_rx.lock().take() {
            tasks.push(self.recovery.clone().start_worker(events_rx));
        }
        if self.config.lifecycle.retry_failed_shards {
            tasks.push(self.clone().start_shard_retry());
        }
        info!("Started {} background tasks", tasks.len());
    }

    /// Abort background tasks
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        info!("Stopped {} background tasks", tasks.len());
    }

    fn start_shard_retry(self: Arc<Self>) -> JoinHandle<()> {
        let retry_interval = self.config.lifecycle.shard_retry_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(retry_interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let ids = match self.store.list_ids().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        error!("Failed to list clusters for shard retry: {}", e);
                        continue;
                    }
                };
                for id in ids {
                    if let Err(e) = self.retry_failed_shards(&id).await {
                        warn!("Shard retry for cluster {} failed: {}", id, e);
                    }
                }
            }
        })
    }

    async fn load(&self, cluster_id: &str) -> Result<ClusterConfig> {
        self.store
            .load(cluster_id)
            .await?
            .ok_or_else(|| OrchestratorError::ClusterNotFound(cluster_id.to_string()))
    }

    /// Plan a new cluster and persist it
    pub async fn create_cluster(
        &self,
        cluster_id: &str,
        shard_count: u32,
        config_server_count: u32,
        replica_set_size: u32,
    ) -> Result<ClusterConfig> {
        let config = self.lifecycle.plan(
            cluster_id,
            shard_count,
            config_server_count,
            replica_set_size,
        )?;
        config.validate().map_err(OrchestratorError::InvalidPlan)?;
        let _guard = self.locks.lock(cluster_id).await;
        if self.store.exists(cluster_id).await? {
            return Err(OrchestratorError::ClusterExists(cluster_id.to_string()));
        }
        self.store.save(&config).await?;
        info!(
            cluster_id,
            nodes = config.nodes.len(),
            "Cluster created"
        );
        Ok(config)
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> Result<ClusterConfig> {
        self.load(cluster_id).await
    }

    pub async fn list_clusters(&self) -> Result<Vec<String>> {
        Ok(self.store.list_ids().await?)
    }

    pub async fn start_cluster(&self, cluster_id: &str) -> Result<StartReport> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let report = self.lifecycle.start(&mut config).await;
        self.store.save(&config).await?;
        Ok(report)
    }

    /// Initialize a cluster; partial progress is persisted even on failure
    pub async fn initialize_cluster(&self, cluster_id: &str) -> Result<InitializeReport> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let result = self.lifecycle.initialize(&mut config).await;
        self.store.save(&config).await?;
        result
    }

    /// Re-run initialization for shards left in error
    pub async fn retry_failed_shards(&self, cluster_id: &str) -> Result<Vec<ShardInitResult>> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let results = self.lifecycle.retry_failed_shards(&mut config).await;
        if !results.is_empty() {
            self.store.save(&config).await?;
        }
        Ok(results)
    }

    pub async fn stop_cluster(&self, cluster_id: &str) -> Result<StopReport> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let report = self.lifecycle.stop(&mut config).await;
        self.store.save(&config).await?;
        Ok(report)
    }

    pub async fn start_node(&self, cluster_id: &str, node_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let result = self.lifecycle.start_node(&mut config, node_id).await;
        self.store.save(&config).await?;
        result
    }

    pub async fn stop_node(&self, cluster_id: &str, node_id: &str) -> Result<bool> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let stopped = self.lifecycle.stop_node(&mut config, node_id).await?;
        self.store.save(&config).await?;
        Ok(stopped)
    }

    /// Stop every process, remove data directories and forget the topology
    pub async fn delete_cluster(&self, cluster_id: &str) -> Result<DeleteClusterReport> {
        let guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let stop = self.lifecycle.stop(&mut config).await;
        let data = self.lifecycle.delete_cluster_data(&config).await;
        self.store.delete(cluster_id).await?;
        drop(guard);
        self.locks.forget(cluster_id);

        info!(cluster_id, "Cluster deleted");
        Ok(DeleteClusterReport {
            cluster_id: cluster_id.to_string(),
            stop,
            data,
        })
    }

    pub async fn cluster_status(&self, cluster_id: &str) -> Result<ClusterStatus> {
        let config = self.load(cluster_id).await?;
        Ok(ClusterStatus::collect(self.supervisor.as_ref(), &config).await)
    }

    /// Probe every node now
    pub async fn cluster_health(&self, cluster_id: &str) -> Result<ClusterHealthReport> {
        let config = self.load(cluster_id).await?;
        Ok(self.health.check_cluster_health(&config).await)
    }

    /// Last recorded judgments, without probing
    pub async fn cached_health(&self, cluster_id: &str) -> Result<Vec<NodeHealth>> {
        self.load(cluster_id).await?;
        Ok(self.health.cached(cluster_id))
    }

    pub async fn recover_node(
        &self,
        cluster_id: &str,
        node_id: &str,
        auto_restart: bool,
    ) -> Result<RecoveryOutcome> {
        self.recovery
            .recover_node(cluster_id, node_id, auto_restart)
            .await
    }

    pub async fn recover_all(&self, cluster_id: &str) -> Result<RecoveryReport> {
        self.recovery.recover_all(cluster_id).await
    }

    /// Queue an operator-reported failure for the recovery worker
    pub async fn report_failure(&self, event: NodeFailureEvent) -> Result<()> {
        let config = self.load(&event.cluster_id).await?;
        if config.node(&event.node_id).is_none() {
            return Err(OrchestratorError::NodeNotFound {
                cluster_id: event.cluster_id,
                node_id: event.node_id,
            });
        }
        warn!(
            cluster_id = %event.cluster_id,
            node_id = %event.node_id,
            "Manual failure report: {}",
            event.message
        );
        self.events
            .try_send(event)
            .map_err(|e| OrchestratorError::EventQueue(e.to_string()))
    }

    pub async fn list_shards(&self, cluster_id: &str) -> Result<Vec<ShardSummary>> {
        let config = self.load(cluster_id).await?;
        Ok(self.shards.list_shards(&config).await)
    }

    pub async fn add_shard(&self, cluster_id: &str, shard_id: &str) -> Result<NodeInfo> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let node = self.shards.add_shard(&mut config, shard_id).await?;
        self.store.save(&config).await?;
        Ok(node)
    }

    pub async fn remove_shard(&self, cluster_id: &str, shard_id: &str) -> Result<RemoveShardOutcome> {
        let _guard = self.locks.lock(cluster_id).await;
        let mut config = self.load(cluster_id).await?;
        let outcome = self.shards.remove_shard(&mut config, shard_id).await?;
        if matches!(outcome, RemoveShardOutcome::Removed(_)) {
            self.store.save(&config).await?;
        }
        Ok(outcome)
    }

    pub async fn rebalance(&self, cluster_id: &str) -> Result<()> {
        let config = self.load(cluster_id).await?;
        self.shards.rebalance(&config).await
    }

    pub async fn split_chunks(
        &self,
        cluster_id: &str,
        database: &str,
        collection: &str,
        shard_key: &str,
        split_points: &[Value],
    ) -> Result<SplitReport> {
        let config = self.load(cluster_id).await?;
        self.shards
            .split_chunks(&config, &namespace(database, collection), shard_key, split_points)
            .await
    }

    pub async fn move_chunks(
        &self,
        cluster_id: &str,
        database: &str,
        collection: &str,
    ) -> Result<DistributionReport> {
        let config = self.load(cluster_id).await?;
        self.shards
            .move_chunks_to_shards(&config, &namespace(database, collection))
            .await
    }

    pub async fn split_and_distribute(
        &self,
        cluster_id: &str,
        database: &str,
        collection: &str,
        shard_key: &str,
        split_points: &[Value],
    ) -> Result<SplitAndDistributeReport> {
        let config = self.load(cluster_id).await?;
        self.shards
            .split_and_distribute(
                &config,
                &namespace(database, collection),
                shard_key,
                split_points,
            )
            .await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
