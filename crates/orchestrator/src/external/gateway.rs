//! Cluster database gateway interface
//!
//! Administrative commands against individual nodes and the router. The
//! orchestrator never speaks the wire protocol itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Command error code returned while a replica set has not been initiated
pub const NOT_YET_INITIALIZED: i32 = 94;

/// Gateway error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Command failed (code {code}): {message}")]
    Command { code: i32, message: String },
    #[error("Connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },
    #[error("Request to {addr} timed out")]
    Timeout { addr: String },
}

impl GatewayError {
    /// Replica set exists in config but was never initiated
    pub fn is_not_yet_initialized(&self) -> bool {
        matches!(self, GatewayError::Command { code, .. } if *code == NOT_YET_INITIALIZED)
    }
}

/// Address of a node or router
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Drain state reported by remove-shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveShardState {
    Started,
    Ongoing,
    Completed,
    Other(String),
}

impl RemoveShardState {
    /// Parse the `state` field of a remove-shard reply (case-insensitive)
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "started" => Self::Started,
            "ongoing" => Self::Ongoing,
            "completed" => Self::Completed,
            _ => Self::Other(state.to_string()),
        }
    }
}

impl std::fmt::Display for RemoveShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoveShardState::Started => write!(f, "started"),
            RemoveShardState::Ongoing => write!(f, "ongoing"),
            RemoveShardState::Completed => write!(f, "completed"),
            RemoveShardState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One side of a chunk range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyBound {
    /// Sentinel below every key; not accepted as a move-chunk boundary
    MinKey,
    /// Sentinel above every key
    MaxKey,
    Value(Value),
}

/// Chunk metadata as stored by the config servers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Shard (replica set name) currently owning the chunk
    pub shard: String,
    /// Shard key field of the lower bound
    pub shard_key: String,
    pub min: KeyBound,
    pub max: KeyBound,
}

/// Administrative access to cluster nodes
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Lightweight liveness command
    async fn ping(&self, addr: &NodeAddr) -> Result<(), GatewayError>;

    /// Replica set status; `NOT_YET_INITIALIZED` when the set was never initiated
    async fn replica_set_status(&self, addr: &NodeAddr) -> Result<(), GatewayError>;

    /// Initiate a replica set with `members` (`host:port`), issued against `addr`
    async fn initiate_replica_set(
        &self,
        addr: &NodeAddr,
        name: &str,
        members: &[String],
    ) -> Result<(), GatewayError>;

    async fn is_shard_registered(
        &self,
        router: &NodeAddr,
        shard_name: &str,
    ) -> Result<bool, GatewayError>;

    /// Register a shard; `connection` is `<replicaSet>/<host:port>,...`
    async fn add_shard(&self, router: &NodeAddr, connection: &str) -> Result<(), GatewayError>;

    async fn remove_shard(
        &self,
        router: &NodeAddr,
        shard_name: &str,
    ) -> Result<RemoveShardState, GatewayError>;

    async fn split_chunk(
        &self,
        router: &NodeAddr,
        namespace: &str,
        shard_key: &str,
        middle: &Value,
    ) -> Result<(), GatewayError>;

    /// Move the chunk containing `shard_key == find` to `to_shard`
    async fn move_chunk(
        &self,
        router: &NodeAddr,
        namespace: &str,
        shard_key: &str,
        find: &Value,
        to_shard: &str,
    ) -> Result<(), GatewayError>;

    async fn start_balancer(&self, router: &NodeAddr) -> Result<(), GatewayError>;

    /// Chunks recorded under the namespace string
    async fn chunks_by_namespace(
        &self,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError>;

    /// Collection UUID registered for the namespace
    async fn collection_uuid(
        &self,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Option<String>, GatewayError>;

    /// Chunks recorded under a collection UUID
    async fn chunks_by_collection_uuid(
        &self,
        router: &NodeAddr,
        uuid: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError>;
}

/// Bound a gateway call; elapsed time becomes `GatewayError::Timeout`
pub async fn with_timeout<T, F>(timeout: Duration, addr: &NodeAddr, fut: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            addr: addr.to_string(),
        }),
    }
}

/// Classify replica set status into initiated / not yet initiated / fault
pub async fn is_replica_set_initiated(
    gateway: &dyn ClusterGateway,
    addr: &NodeAddr,
) -> Result<bool, GatewayError> {
    match gateway.replica_set_status(addr).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_yet_initialized() => Ok(false),
        Err(e) => Err(e),
    }
}
