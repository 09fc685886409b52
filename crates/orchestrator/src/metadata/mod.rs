//! Cluster metadata definitions
//!
//! Contains the topology, node, health and recovery data structures

mod cluster;
mod health;
mod node;

pub use cluster::{ClusterConfig, ShardGroup};
pub use health::{FailureKind, HealthStatus, NodeFailureEvent, NodeHealth, RecoveryOutcome};
pub use node::{NodeId, NodeInfo, NodeRole, NodeStatus};
