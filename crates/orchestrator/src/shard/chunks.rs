//! Chunk discovery and round-robin distribution planning
//!
//! Chunk metadata is recorded either under the namespace string or, on newer
//! config server schemas, under the collection UUID. `ChunkLocator` hides the
//! difference by trying each resolution strategy in order.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::external::{ChunkRecord, ClusterGateway, GatewayError, KeyBound, NodeAddr};

/// One way of resolving a namespace to its chunks
#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find(
        &self,
        gateway: &dyn ClusterGateway,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError>;
}

/// Chunks recorded under the namespace string
pub struct ByNamespace;

#[async_trait]
impl ChunkSource for ByNamespace {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn find(
        &self,
        gateway: &dyn ClusterGateway,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError> {
        gateway.chunks_by_namespace(router, namespace).await
    }
}

/// Chunks recorded under the collection UUID
pub struct ByCollectionUuid;

#[async_trait]
impl ChunkSource for ByCollectionUuid {
    fn name(&self) -> &'static str {
        "collection uuid"
    }

    async fn find(
        &self,
        gateway: &dyn ClusterGateway,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError> {
        match gateway.collection_uuid(router, namespace).await? {
            Some(uuid) => gateway.chunks_by_collection_uuid(router, &uuid).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Schema-agnostic chunk lookup
pub struct ChunkLocator {
    sources: Vec<Box<dyn ChunkSource>>,
}

impl Default for ChunkLocator {
    fn default() -> Self {
        Self::new(vec![Box::new(ByNamespace), Box::new(ByCollectionUuid)])
    }
}

impl ChunkLocator {
    pub fn new(sources: Vec<Box<dyn ChunkSource>>) -> Self {
        Self { sources }
    }

    /// Chunks of the first source that finds any
    ///
    /// A failing source is skipped. Returns the last error only when no
    /// source answered at all.
    pub async fn locate(
        &self,
        gateway: &dyn ClusterGateway,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError> {
        let mut last_error = None;
        let mut answered = false;
        for source in &self.sources {
            match source.find(gateway, router, namespace).await {
                Ok(chunks) if !chunks.is_empty() => {
                    debug!(
                        "Found {} chunks for {} by {}",
                        chunks.len(),
                        namespace,
                        source.name()
                    );
                    return Ok(chunks);
                }
                Ok(_) => answered = true,
                Err(e) => {
                    warn!("Chunk lookup by {} failed for {}: {}", source.name(), namespace, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(Vec::new()),
        }
    }
}

/// What to do with one chunk
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedMove {
    Move {
        shard_key: String,
        find: Value,
        to: String,
    },
    /// Already on its target shard
    SameShard,
    /// Lower bound is a sentinel and cannot address a move
    SentinelBound,
}

/// Assign chunks to shards round-robin, in chunk order
///
/// The target index advances for every chunk, moved or not.
pub fn plan_moves(chunks: &[ChunkRecord], shards: &[String]) -> Vec<PlannedMove> {
    if shards.is_empty() {
        return Vec::new();
    }
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let target = &shards[i % shards.len()];
            if chunk.shard == *target {
                return PlannedMove::SameShard;
            }
            match &chunk.min {
                KeyBound::Value(find) => PlannedMove::Move {
                    shard_key: chunk.shard_key.clone(),
                    find: find.clone(),
                    to: target.clone(),
                },
                KeyBound::MinKey | KeyBound::MaxKey => PlannedMove::SentinelBound,
            }
        })
        .collect()
}
