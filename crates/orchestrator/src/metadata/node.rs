//! Node definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node ID
pub type NodeId = String;

/// Role a node plays in the sharded cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Member of the config server replica set
    Config,
    /// Member of a shard replica set
    Shard,
    /// Query router
    Router,
}

impl NodeRole {
    /// Server flag passed to the database process for this role
    pub fn server_flag(&self) -> Option<&'static str> {
        match self {
            NodeRole::Config => Some("--configsvr"),
            NodeRole::Shard => Some("--shardsvr"),
            NodeRole::Router => None,
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self, NodeRole::Router)
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Config => write!(f, "config"),
            NodeRole::Shard => write!(f, "shard"),
            NodeRole::Router => write!(f, "router"),
        }
    }
}

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not running
    Stopped,
    /// Process started and tracked
    Running,
    /// Last lifecycle action on this node failed
    Error,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Stopped => write!(f, "stopped"),
            NodeStatus::Running => write!(f, "running"),
            NodeStatus::Error => write!(f, "error"),
        }
    }
}

/// One logical server of a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node ID, unique within the cluster
    pub id: NodeId,
    /// Node role
    pub role: NodeRole,
    /// Listen port, unique within the cluster
    pub port: u16,
    /// Lifecycle status
    #[serde(default)]
    pub status: NodeStatus,
    /// Data directory (routers keep no data)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<PathBuf>,
    /// Replica set name (config and shard nodes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_set: Option<String>,
}

impl NodeInfo {
    /// Create a data-bearing node (config or shard member)
    pub fn server(
        id: impl Into<NodeId>,
        role: NodeRole,
        port: u16,
        data_path: PathBuf,
        replica_set: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            port,
            status: NodeStatus::Stopped,
            data_path: Some(data_path),
            replica_set: Some(replica_set.into()),
        }
    }

    /// Create a router node
    pub fn router(id: impl Into<NodeId>, port: u16) -> Self {
        Self {
            id: id.into(),
            role: NodeRole::Router,
            port,
            status: NodeStatus::Stopped,
            data_path: None,
            replica_set: None,
        }
    }

    /// `host:port` member address
    pub fn member_addr(&self, host: &str) -> String {
        format!("{}:{}", host, self.port)
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }
}
