//! Orchestrator error taxonomy
//!
//! Fatal-to-step failures and "not found" results travel as `OrchestratorError`.
//! Partial failures travel inside the report types of each operation, and probe
//! failures never leave the health monitor.

use crate::external::{GatewayError, RemoveShardState, SupervisorError};
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),
    #[error("Cluster already exists: {0}")]
    ClusterExists(String),
    #[error("Node {node_id} not found in cluster {cluster_id}")]
    NodeNotFound { cluster_id: String, node_id: String },
    #[error("Shard {0} already exists")]
    ShardExists(String),
    #[error("Shard {0} not found")]
    ShardNotFound(String),
    #[error("Invalid cluster plan: {0}")]
    InvalidPlan(String),
    #[error("No router found in cluster {0}")]
    NoRouter(String),
    #[error("Config replica set failed: {0}")]
    ConfigReplicaSet(String),
    #[error("Router failed: {0}")]
    Router(String),
    #[error("Shard {shard} failed during {step}: {reason}")]
    ShardBootstrap {
        shard: String,
        step: &'static str,
        reason: String,
    },
    #[error("{operation} of cluster {cluster_id} exceeded its deadline")]
    Deadline {
        operation: &'static str,
        cluster_id: String,
    },
    #[error("Need at least 2 shards to distribute chunks, found {0}")]
    NotEnoughShards(usize),
    #[error("No chunks found for {0}")]
    NoChunks(String),
    #[error("Unexpected remove-shard state for {shard}: {state}")]
    UnexpectedRemoveState {
        shard: String,
        state: RemoveShardState,
    },
    #[error("Failure event not queued: {0}")]
    EventQueue(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
