//! Cluster status summary
//!
//! A live roll-up of node liveness for operators: counts per role, router
//! state and an overall `running` / `partial` / `stopped` verdict.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::external::{is_node_alive, ProcessSupervisor};
use crate::metadata::{ClusterConfig, NodeId, NodeRole};

/// Overall cluster state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    /// Every node alive and the router up
    Running,
    /// Some nodes alive
    Partial,
    /// Nothing alive
    Stopped,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::Running => write!(f, "running"),
            ClusterState::Partial => write!(f, "partial"),
            ClusterState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeLiveness {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub state: ClusterState,
    pub total_nodes: usize,
    pub running_nodes: usize,
    pub stopped_nodes: usize,
    pub config_servers: usize,
    pub shard_servers: usize,
    pub router_running: bool,
    /// Shard replica sets in the topology
    pub total_shards: usize,
    /// Shard replica sets with at least one live member
    pub active_shards: usize,
    pub nodes: Vec<NodeLiveness>,
    pub checked_at: DateTime<Utc>,
}

impl ClusterStatus {
    /// Probe every node's liveness and summarize
    pub async fn collect(supervisor: &dyn ProcessSupervisor, config: &ClusterConfig) -> Self {
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            nodes.push(NodeLiveness {
                node_id: node.id.clone(),
                role: node.role,
                port: node.port,
                replica_set: node.replica_set.clone(),
                alive: is_node_alive(supervisor, &node.id, node.port).await,
            });
        }
        Self::summarize(&config.id, nodes)
    }

    /// Summarize already probed liveness
    pub fn summarize(cluster_id: &str, nodes: Vec<NodeLiveness>) -> Self {
        let total_nodes = nodes.len();
        let running_nodes = nodes.iter().filter(|n| n.alive).count();
        let count_role = |role: NodeRole| nodes.iter().filter(|n| n.role == role).count();
        let config_servers = count_role(NodeRole::Config);
        let shard_servers = count_role(NodeRole::Shard);
        let router_running = nodes.iter().any(|n| n.role.is_router() && n.alive);

        let mut shard_sets: Vec<(&str, bool)> = Vec::new();
        for node in nodes.iter().filter(|n| n.role == NodeRole::Shard) {
            let rs = node.replica_set.as_deref().unwrap_or(node.node_id.as_str());
            match shard_sets.iter_mut().find(|(name, _)| *name == rs) {
                Some((_, alive)) => *alive |= node.alive,
                None => shard_sets.push((rs, node.alive)),
            }
        }
        let total_shards = shard_sets.len();
        let active_shards = shard_sets.iter().filter(|(_, alive)| *alive).count();

        let state = if running_nodes == total_nodes && router_running {
            ClusterState::Running
        } else if running_nodes == 0 {
            ClusterState::Stopped
        } else {
            ClusterState::Partial
        };

        Self {
            cluster_id: cluster_id.to_string(),
            state,
            total_nodes,
            running_nodes,
            stopped_nodes: total_nodes - running_nodes,
            config_servers,
            shard_servers,
            router_running,
            total_shards,
            active_shards,
            nodes,
            checked_at: Utc::now(),
        }
    }

    /// Share of live nodes, 0 for an empty topology
    pub fn health_percentage(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        self.running_nodes as f64 / self.total_nodes as f64 * 100.0
    }

    pub fn is_healthy(&self) -> bool {
        self.state == ClusterState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, role: NodeRole, rs: Option<&str>, alive: bool) -> NodeLiveness {
        NodeLiveness {
            node_id: id.into(),
            role,
            port: 0,
            replica_set: rs.map(String::from),
            alive,
        }
    }

    #[test]
    fn test_running_needs_router() {
        let status = ClusterStatus::summarize(
            "c1",
            vec![
                node("config-1", NodeRole::Config, Some("configReplSet"), true),
                node("shard-1", NodeRole::Shard, Some("shard1"), true),
            ],
        );
        assert_eq!(status.state, ClusterState::Partial);
        assert!(!status.router_running);
        assert_eq!(status.health_percentage(), 100.0);

        let mut nodes = status.nodes.clone();
        nodes.push(node("mongos", NodeRole::Router, None, true));
        let status = ClusterStatus::summarize("c1", nodes);
        assert_eq!(status.state, ClusterState::Running);
        assert!(status.is_healthy());
    }

    #[test]
    fn test_partial_and_shard_counts() {
        let status = ClusterStatus::summarize(
            "c1",
            vec![
                node("config-1", NodeRole::Config, Some("configReplSet"), true),
                node("shard-1-1", NodeRole::Shard, Some("shard1"), false),
                node("shard-1-2", NodeRole::Shard, Some("shard1"), true),
                node("shard-2-1", NodeRole::Shard, Some("shard2"), false),
                node("shard-2-2", NodeRole::Shard, Some("shard2"), false),
            ],
        );
        assert_eq!(status.state, ClusterState::Partial);
        assert_eq!(status.total_shards, 2);
        assert_eq!(status.active_shards, 1);
        assert_eq!(status.shard_servers, 4);
        assert_eq!(status.stopped_nodes, 3);
        assert_eq!(status.health_percentage(), 40.0);
    }

    #[test]
    fn test_stopped_and_empty() {
        let status = ClusterStatus::summarize(
            "c1",
            vec![node("config-1", NodeRole::Config, Some("configReplSet"), false)],
        );
        assert_eq!(status.state, ClusterState::Stopped);

        let empty = ClusterStatus::summarize("c2", Vec::new());
        assert_eq!(empty.health_percentage(), 0.0);
    }
}
