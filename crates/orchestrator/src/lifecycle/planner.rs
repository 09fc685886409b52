//! Topology planning
//!
//! Assigns roles, sequential ports, data paths and replica set names for a new
//! cluster. Config servers come first, then every shard's members.

use std::path::Path;

use crate::config::TopologyConfig;
use crate::error::{OrchestratorError, Result};
use crate::metadata::{ClusterConfig, NodeInfo, NodeRole};
use crate::storage::is_plain_name;

/// Replica set name of the shard with 1-based index `shard`
pub fn shard_replica_set(shard: u32) -> String {
    format!("shard{}", shard)
}

/// Plan a new cluster
///
/// Duplicate cluster IDs are rejected by the caller against the store.
pub fn plan(
    topology: &TopologyConfig,
    cluster_id: &str,
    shard_count: u32,
    config_server_count: u32,
    replica_set_size: u32,
) -> Result<ClusterConfig> {
    if !is_plain_name(cluster_id) {
        return Err(OrchestratorError::InvalidPlan(format!(
            "cluster id {:?} must be a non-empty name without path separators or \"..\"",
            cluster_id
        )));
    }
    if shard_count == 0 || config_server_count == 0 || replica_set_size == 0 {
        return Err(OrchestratorError::InvalidPlan(format!(
            "counts must be positive (shards={}, config servers={}, replica set size={})",
            shard_count, config_server_count, replica_set_size
        )));
    }

    let total = u64::from(config_server_count) + u64::from(shard_count) * u64::from(replica_set_size);
    let base = topology.base_port;
    let last = u64::from(base) + total - 1;
    if last > u64::from(u16::MAX) {
        return Err(OrchestratorError::InvalidPlan(format!(
            "{} nodes do not fit in ports starting at {}",
            total, base
        )));
    }
    let router = u64::from(topology.router_port);
    if router >= u64::from(base) && router <= last {
        return Err(OrchestratorError::InvalidPlan(format!(
            "router port {} falls inside planned range {}-{}",
            topology.router_port, base, last
        )));
    }

    let data = topology.base_data_path.as_path();
    let mut config = ClusterConfig::new(
        cluster_id.to_string(),
        shard_count,
        config_server_count,
        replica_set_size,
        data.to_path_buf(),
        base,
    );

    let mut port = base;
    for i in 1..=config_server_count {
        config.nodes.push(NodeInfo::server(
            format!("config-{}", i),
            NodeRole::Config,
            port,
            data_dir(data, "config", &format!("configsvr{}", i)),
            topology.config_replica_set.clone(),
        ));
        port = port.saturating_add(1);
    }

    for shard in 1..=shard_count {
        let rs = shard_replica_set(shard);
        for member in 1..=replica_set_size {
            let (id, dir) = if replica_set_size == 1 {
                (format!("shard-{}", shard), format!("shard{}", shard))
            } else {
                (
                    format!("shard-{}-{}", shard, member),
                    format!("shard{}-{}", shard, member),
                )
            };
            config.nodes.push(NodeInfo::server(
                id,
                NodeRole::Shard,
                port,
                data_dir(data, "shard", &dir),
                rs.clone(),
            ));
            port = port.saturating_add(1);
        }
    }

    Ok(config)
}

fn data_dir(base: &Path, kind: &str, name: &str) -> std::path::PathBuf {
    base.join(kind).join(name)
}
