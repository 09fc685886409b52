//! Node process supervisor interface

use async_trait::async_trait;
use std::path::PathBuf;

use crate::metadata::{NodeId, NodeInfo, NodeRole};

/// Process supervisor error
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn {node_id}: {reason}")]
    Spawn { node_id: NodeId, reason: String },
    #[error("Failed to stop {node_id}: {reason}")]
    Stop { node_id: NodeId, reason: String },
    #[error("Failed to free port {port}: {reason}")]
    Port { port: u16, reason: String },
}

/// Launch parameters for a data-bearing server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLaunch {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub port: u16,
    pub data_path: PathBuf,
    pub replica_set: String,
    pub bind_host: String,
}

impl ServerLaunch {
    /// Build from a topology node; `None` for routers or nodes missing data path / replica set
    pub fn for_node(node: &NodeInfo, bind_host: &str) -> Option<Self> {
        if node.role.is_router() {
            return None;
        }
        Some(Self {
            node_id: node.id.clone(),
            role: node.role,
            port: node.port,
            data_path: node.data_path.clone()?,
            replica_set: node.replica_set.clone()?,
            bind_host: bind_host.to_string(),
        })
    }

    /// Server command-line arguments
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(flag) = self.role.server_flag() {
            args.push(flag.to_string());
        }
        args.extend([
            "--replSet".to_string(),
            self.replica_set.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--dbpath".to_string(),
            self.data_path.display().to_string(),
            "--bind_ip".to_string(),
            self.bind_host.clone(),
        ]);
        args
    }
}

/// Launch parameters for a router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterLaunch {
    pub node_id: NodeId,
    pub port: u16,
    /// `<configReplSet>/<host:port>,...`
    pub config_connection: String,
    pub bind_host: String,
}

impl RouterLaunch {
    /// Router command-line arguments
    pub fn args(&self) -> Vec<String> {
        vec![
            "--port".to_string(),
            self.port.to_string(),
            "--configdb".to_string(),
            self.config_connection.clone(),
            "--bind_ip".to_string(),
            self.bind_host.clone(),
        ]
    }
}

/// Starts and stops OS processes per logical node
///
/// Implementations keep their own node -> process registry; the orchestrator
/// only sees liveness through `is_tracked_alive` and `is_port_occupied`.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start_server_process(&self, launch: &ServerLaunch) -> Result<(), SupervisorError>;

    async fn start_router_process(&self, launch: &RouterLaunch) -> Result<(), SupervisorError>;

    async fn stop_process(&self, node_id: &str) -> Result<(), SupervisorError>;

    /// Process started by this supervisor and still alive
    async fn is_tracked_alive(&self, node_id: &str) -> bool;

    /// Something is listening on the port, whoever started it
    async fn is_port_occupied(&self, port: u16) -> bool;

    /// Kill whatever holds the port
    async fn free_port(&self, port: u16) -> Result<(), SupervisorError>;
}

/// Liveness as the orchestrator sees it: a tracked process or anything on the port
///
/// A process started out-of-band (e.g. by a previous run) still counts as alive.
pub async fn is_node_alive(supervisor: &dyn ProcessSupervisor, node_id: &str, port: u16) -> bool {
    supervisor.is_tracked_alive(node_id).await || supervisor.is_port_occupied(port).await
}
