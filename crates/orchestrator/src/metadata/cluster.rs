//! Cluster topology

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::{NodeId, NodeInfo, NodeRole, NodeStatus};

/// Authoritative topology of one cluster
///
/// Mutated in place by lifecycle and shard operations and written back to the
/// cluster store after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster ID (immutable)
    pub id: String,
    /// Shard count requested at creation
    pub shard_count: u32,
    /// Config server count requested at creation
    pub config_server_count: u32,
    /// Members per shard replica set
    pub replica_set_size: u32,
    /// Base data directory
    pub base_data_path: PathBuf,
    /// First port handed out by the planner
    pub base_port: u16,
    /// Nodes in plan order
    pub nodes: Vec<NodeInfo>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Members of one shard, grouped by replica set name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGroup {
    /// Replica set name, also the name the shard is registered under
    pub replica_set: String,
    /// Node IDs in plan order
    pub node_ids: Vec<NodeId>,
    /// `host:port` of each member, same order as `node_ids`
    pub members: Vec<String>,
}

impl ShardGroup {
    /// `<replicaSet>/<host:port>,...` as understood by add-shard
    pub fn connection_spec(&self) -> String {
        format!("{}/{}", self.replica_set, self.members.join(","))
    }

    pub fn is_multi_member(&self) -> bool {
        self.members.len() > 1
    }
}

impl ClusterConfig {
    /// Create an empty topology
    pub fn new(
        id: String,
        shard_count: u32,
        config_server_count: u32,
        replica_set_size: u32,
        base_data_path: PathBuf,
        base_port: u16,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            shard_count,
            config_server_count,
            replica_set_size,
            base_data_path,
            base_port,
            nodes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeInfo> {
        self.nodes.iter_mut().find(|n| n.id == node_id)
    }

    /// Nodes with the given role, in plan order
    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn config_nodes(&self) -> Vec<&NodeInfo> {
        self.nodes_with_role(NodeRole::Config).collect()
    }

    pub fn shard_nodes(&self) -> Vec<&NodeInfo> {
        self.nodes_with_role(NodeRole::Shard).collect()
    }

    /// First router in the topology, if one has been started
    pub fn router(&self) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.role.is_router())
    }

    /// Replica set name shared by the config servers
    pub fn config_replica_set(&self) -> Option<&str> {
        self.config_nodes()
            .first()
            .and_then(|n| n.replica_set.as_deref())
    }

    /// `<configReplSet>/<host:port>,...` used to bind a router to the config servers
    pub fn config_connection(&self, host: &str, default_replica_set: &str) -> Option<String> {
        let members: Vec<String> = self
            .nodes_with_role(NodeRole::Config)
            .map(|n| n.member_addr(host))
            .collect();
        if members.is_empty() {
            return None;
        }
        let rs = self.config_replica_set().unwrap_or(default_replica_set);
        Some(format!("{}/{}", rs, members.join(",")))
    }

    /// Shard nodes grouped by replica set, groups in order of first appearance
    pub fn shard_groups(&self, host: &str) -> Vec<ShardGroup> {
        let mut groups: Vec<ShardGroup> = Vec::new();
        for node in self.nodes_with_role(NodeRole::Shard) {
            let rs = node.replica_set.clone().unwrap_or_else(|| node.id.clone());
            match groups.iter_mut().find(|g| g.replica_set == rs) {
                Some(group) => {
                    group.node_ids.push(node.id.clone());
                    group.members.push(node.member_addr(host));
                }
                None => groups.push(ShardGroup {
                    replica_set: rs,
                    node_ids: vec![node.id.clone()],
                    members: vec![node.member_addr(host)],
                }),
            }
        }
        groups
    }

    /// Registered shard names (replica set names), in plan order
    pub fn shard_names(&self) -> Vec<String> {
        self.shard_groups("localhost")
            .into_iter()
            .map(|g| g.replica_set)
            .collect()
    }

    /// Next free port: one past the highest port in use
    pub fn next_port(&self) -> u16 {
        self.nodes
            .iter()
            .map(|n| n.port)
            .max()
            .map(|p| p.saturating_add(1))
            .unwrap_or(self.base_port)
    }

    /// Set node status, returns false for an unknown node
    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) -> bool {
        match self.node_mut(node_id) {
            Some(node) => {
                node.status = status;
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Remove node
    pub fn remove_node(&mut self, node_id: &str) -> Option<NodeInfo> {
        let pos = self.nodes.iter().position(|n| n.id == node_id)?;
        let node = self.nodes.remove(pos);
        self.touch();
        Some(node)
    }

    /// Check topology invariants
    pub fn validate(&self) -> Result<(), String> {
        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(format!("Duplicate node id {}", node.id));
            }
            if !ports.insert(node.port) {
                return Err(format!("Duplicate port {} (node {})", node.port, node.id));
            }
            if !node.role.is_router() && node.replica_set.is_none() {
                return Err(format!("Node {} has no replica set", node.id));
            }
        }

        let config_sets: HashSet<_> = self
            .nodes_with_role(NodeRole::Config)
            .filter_map(|n| n.replica_set.as_deref())
            .collect();
        if config_sets.len() > 1 {
            return Err(format!(
                "Config servers span {} replica sets",
                config_sets.len()
            ));
        }
        Ok(())
    }
}
