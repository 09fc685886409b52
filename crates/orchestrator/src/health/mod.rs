//! Health monitor
//!
//! Probes liveness and connectivity of every node, classifies the result and
//! keeps a rolling consecutive-failure count per node. Probe failures never
//! leave this module as errors.

mod cache;

pub use cache::HealthCache;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::HealthConfig;
use crate::external::{is_node_alive, ClusterGateway, GatewayError, NodeAddr, ProcessSupervisor};
use crate::metadata::{ClusterConfig, FailureKind, NodeFailureEvent, NodeHealth, NodeInfo};
use crate::storage::ClusterStore;

/// Summary of one cluster health pass
#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealthReport {
    pub cluster_id: String,
    pub checked_at: DateTime<Utc>,
    pub healthy: Vec<NodeHealth>,
    pub unhealthy: Vec<NodeHealth>,
}

impl ClusterHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }

    pub fn total(&self) -> usize {
        self.healthy.len() + self.unhealthy.len()
    }

    pub fn unhealthy_ids(&self) -> Vec<&str> {
        self.unhealthy.iter().map(|h| h.node_id.as_str()).collect()
    }
}

/// Whether a failure count should raise a failure event
///
/// Fires when the count reaches the threshold and again at every multiple,
/// so a node that stays down is retried without flooding the queue.
pub fn should_raise_event(consecutive_failures: u32, threshold: u32) -> bool {
    let threshold = threshold.max(1);
    consecutive_failures >= threshold && consecutive_failures % threshold == 0
}

/// Health monitor
pub struct HealthMonitor {
    supervisor: Arc<dyn ProcessSupervisor>,
    gateway: Arc<dyn ClusterGateway>,
    cache: Arc<HealthCache>,
    config: HealthConfig,
    host: String,
    /// Failure events go to the recovery worker when set
    events: Option<mpsc::Sender<NodeFailureEvent>>,
}

impl HealthMonitor {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        gateway: Arc<dyn ClusterGateway>,
        cache: Arc<HealthCache>,
        config: HealthConfig,
        host: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            gateway,
            cache,
            config,
            host: host.into(),
            events: None,
        }
    }

    /// Raise failure events on this channel
    pub fn with_events(mut self, events: mpsc::Sender<NodeFailureEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache(&self) -> &Arc<HealthCache> {
        &self.cache
    }

    /// Judge one node and record the judgment
    pub async fn check_node_health(&self, cluster_id: &str, node: &NodeInfo) -> NodeHealth {
        let health = self.probe(node).await;
        self.cache.observe(cluster_id, health)
    }

    /// Failure counts are filled in by the cache when the judgment is recorded
    async fn probe(&self, node: &NodeInfo) -> NodeHealth {
        if !is_node_alive(self.supervisor.as_ref(), &node.id, node.port).await {
            return NodeHealth::failed(
                node.id.clone(),
                FailureKind::Dead,
                format!("Process not running on port {}", node.port),
                0,
            );
        }

        let addr = NodeAddr::new(self.host.clone(), node.port);
        let timeout = self.config.probe_timeout();
        match tokio::time::timeout(timeout, self.gateway.ping(&addr)).await {
            Ok(Ok(())) => NodeHealth::healthy(node.id.clone()),
            Ok(Err(GatewayError::Timeout { .. })) | Err(_) => NodeHealth::failed(
                node.id.clone(),
                FailureKind::Timeout,
                format!("Ping to {} timed out after {:?}", addr, timeout),
                0,
            ),
            Ok(Err(e)) => NodeHealth::failed(
                node.id.clone(),
                FailureKind::Unhealthy,
                format!("Failed to connect on port {}: {}", node.port, e),
                0,
            ),
        }
    }

    /// Judge every node of a cluster
    ///
    /// Never mutates the topology. Raises failure events for nodes whose
    /// failure count crossed the threshold when auto recovery is on.
    pub async fn check_cluster_health(&self, config: &ClusterConfig) -> ClusterHealthReport {
        let mut report = ClusterHealthReport {
            cluster_id: config.id.clone(),
            checked_at: Utc::now(),
            healthy: Vec::new(),
            unhealthy: Vec::new(),
        };

        for node in &config.nodes {
            let health = self.check_node_health(&config.id, node).await;
            if health.is_healthy() {
                report.healthy.push(health);
                continue;
            }

            warn!(
                cluster_id = %config.id,
                node_id = %node.id,
                failures = health.consecutive_failures,
                "Unhealthy node detected: {}",
                health.error.as_deref().unwrap_or("unknown")
            );
            if should_raise_event(health.consecutive_failures, self.config.failure_threshold) {
                self.raise(&config.id, &health);
            }
            report.unhealthy.push(health);
        }

        debug!(
            cluster_id = %config.id,
            "Health pass: {} healthy, {} unhealthy",
            report.healthy.len(),
            report.unhealthy.len()
        );
        report
    }

    fn raise(&self, cluster_id: &str, health: &NodeHealth) {
        if !self.config.auto_recover {
            return;
        }
        let Some(events) = &self.events else {
            return;
        };
        let Some(event) = NodeFailureEvent::from_health(cluster_id, health, true) else {
            return;
        };
        info!(
            cluster_id,
            node_id = %event.node_id,
            kind = %event.kind,
            "Raising node failure event"
        );
        if let Err(e) = events.try_send(event) {
            warn!("Failure event for {} not queued: {}", health.node_id, e);
        }
    }

    /// Cached judgments of a cluster, without probing
    pub fn cached(&self, cluster_id: &str) -> Vec<NodeHealth> {
        self.cache.snapshot(cluster_id)
    }

    /// Run one pass over every stored cluster
    pub async fn scan_all(&self, store: &dyn ClusterStore) -> Vec<ClusterHealthReport> {
        let ids = match store.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list clusters for health scan: {}", e);
                return Vec::new();
            }
        };

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            match store.load(&id).await {
                Ok(Some(config)) => reports.push(self.check_cluster_health(&config).await),
                Ok(None) => debug!("Cluster {} vanished before health scan", id),
                Err(e) => error!("Failed to load cluster {} for health scan: {}", id, e),
            }
        }
        reports
    }

    /// Start periodic health scan task
    pub fn start_health_checker(
        self: Arc<Self>,
        store: Arc<dyn ClusterStore>,
    ) -> tokio::task::JoinHandle<()> {
        let check_interval = self.config.check_interval();
        info!("Health checker started, interval {:?}", check_interval);

        tokio::spawn(async move {
            let mut interval = interval(check_interval);
            loop {
                interval.tick().await;
                let reports = self.scan_all(store.as_ref()).await;
                let unhealthy: usize = reports.iter().map(|r| r.unhealthy.len()).sum();
                if unhealthy > 0 {
                    info!(
                        "{} unhealthy nodes across {} clusters",
                        unhealthy,
                        reports.len()
                    );
                }
            }
        })
    }
}
