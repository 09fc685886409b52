//! Capabilities consumed from outside the orchestrator
//!
//! - process supervision (start/stop/liveness/port ownership)
//! - administrative database commands

mod gateway;
mod supervisor;

pub use gateway::{
    is_replica_set_initiated, ChunkRecord, ClusterGateway, GatewayError, KeyBound, NodeAddr,
    RemoveShardState, with_timeout, NOT_YET_INITIALIZED,
};
pub use supervisor::{is_node_alive, ProcessSupervisor, RouterLaunch, ServerLaunch, SupervisorError};
