//! File persistent storage
//!
//! Persists cluster topologies to one JSON file per cluster

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::metadata::ClusterConfig;

const CONFIG_FILE_SUFFIX: &str = "-config.json";

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid cluster id: {0:?}")]
    InvalidId(String),
}

/// True when `name` can be used as a single path component
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(|c: char| c == '/' || c == '\\')
}

/// Keyed store of cluster topologies
///
/// `load` must hand back exactly what `save` stored.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn load(&self, cluster_id: &str) -> Result<Option<ClusterConfig>, StorageError>;

    async fn save(&self, config: &ClusterConfig) -> Result<(), StorageError>;

    /// Returns false when nothing was stored under `cluster_id`
    async fn delete(&self, cluster_id: &str) -> Result<bool, StorageError>;

    async fn exists(&self, cluster_id: &str) -> Result<bool, StorageError> {
        Ok(self.load(cluster_id).await?.is_some())
    }

    async fn list_ids(&self) -> Result<Vec<String>, StorageError>;
}

/// File storage
pub struct FileClusterStore {
    /// Directory holding `<cluster_id>-config.json` files
    dir: PathBuf,
    /// Active topologies
    cache: RwLock<HashMap<String, ClusterConfig>>,
}

impl FileClusterStore {
    /// Create file storage
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// File of a cluster; IDs that would leave the store directory are refused
    fn path_for(&self, cluster_id: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_name(cluster_id) {
            return Err(StorageError::InvalidId(cluster_id.to_string()));
        }
        Ok(self.dir.join(format!("{}{}", cluster_id, CONFIG_FILE_SUFFIX)))
    }

    /// Ensure store directory exists
    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if !fs::try_exists(&self.dir).await? {
            fs::create_dir_all(&self.dir).await?;
            info!("Created config directory: {:?}", self.dir);
        }
        Ok(())
    }

    /// Drop a cached topology so the next load reads the file
    pub fn evict(&self, cluster_id: &str) {
        self.cache.write().remove(cluster_id);
    }
}

#[async_trait]
impl ClusterStore for FileClusterStore {
    async fn load(&self, cluster_id: &str) -> Result<Option<ClusterConfig>, StorageError> {
        let cached = self.cache.read().get(cluster_id).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let path = self.path_for(cluster_id)?;
        if !fs::try_exists(&path).await? {
            debug!("Config file not found: {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let config: ClusterConfig = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        info!(
            "Loaded cluster config {}: {} nodes",
            config.id,
            config.nodes.len()
        );
        self.cache
            .write()
            .insert(cluster_id.to_string(), config.clone());
        Ok(Some(config))
    }

    async fn save(&self, config: &ClusterConfig) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        // Write to temp file first, then atomically rename
        let path = self.path_for(&config.id)?;
        let temp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        self.cache.write().insert(config.id.clone(), config.clone());
        debug!("Saved cluster config {} to {:?}", config.id, path);
        Ok(())
    }

    async fn delete(&self, cluster_id: &str) -> Result<bool, StorageError> {
        self.cache.write().remove(cluster_id);
        let path = self.path_for(cluster_id)?;
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::remove_file(&path).await?;
        info!("Deleted cluster config: {:?}", path);
        Ok(true)
    }

    async fn list_ids(&self) -> Result<Vec<String>, StorageError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(CONFIG_FILE_SUFFIX)) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
