//! Process-wide health cache keyed by (cluster, node)

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::metadata::{NodeHealth, NodeId};

/// Latest health judgment per node
///
/// Shared between the health monitor, the recovery worker and readers of the
/// orchestrator facade. Entries are overwritten, never removed.
#[derive(Default)]
pub struct HealthCache {
    entries: RwLock<HashMap<(String, NodeId), NodeHealth>>,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cluster_id: &str, node_id: &str) -> Option<NodeHealth> {
        self.entries
            .read()
            .get(&(cluster_id.to_string(), node_id.to_string()))
            .cloned()
    }

    /// Consecutive failures of the last judgment, 0 when never checked
    pub fn consecutive_failures(&self, cluster_id: &str, node_id: &str) -> u32 {
        self.get(cluster_id, node_id)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Record a fresh judgment, counting failures against the cached entry
    ///
    /// Read and insert happen under one write lock so overlapping checks of
    /// the same node each add their failure. Returns the judgment as stored.
    pub fn observe(&self, cluster_id: &str, mut health: NodeHealth) -> NodeHealth {
        let mut entries = self.entries.write();
        let key = (cluster_id.to_string(), health.node_id.clone());
        health.consecutive_failures = if health.is_healthy() {
            0
        } else {
            entries
                .get(&key)
                .map(|h| h.consecutive_failures)
                .unwrap_or(0)
                .saturating_add(1)
        };
        entries.insert(key, health.clone());
        health
    }

    /// Cached judgments of one cluster, ordered by node ID
    pub fn snapshot(&self, cluster_id: &str) -> Vec<NodeHealth> {
        let mut nodes: Vec<NodeHealth> = self
            .entries
            .read()
            .iter()
            .filter(|((cluster, _), _)| cluster == cluster_id)
            .map(|(_, health)| health.clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
