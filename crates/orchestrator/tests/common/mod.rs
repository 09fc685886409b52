//! In-memory process supervisor and cluster gateway for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orchestrator::config::{HealthConfig, LifecycleConfig, OrchestratorConfig, RecoveryConfig, TopologyConfig};
use orchestrator::external::{
    ChunkRecord, ClusterGateway, GatewayError, NodeAddr, ProcessSupervisor, RemoveShardState,
    RouterLaunch, ServerLaunch, SupervisorError, NOT_YET_INITIALIZED,
};

pub const HOST: &str = "localhost";
pub const BASE_PORT: u16 = 28000;
pub const ROUTER_PORT: u16 = 27999;

/// Tracked process with the port it holds
#[derive(Debug, Default)]
struct Processes {
    /// node id -> port
    tracked: HashMap<String, u16>,
    /// Ports held by something, tracked or not
    occupied: HashSet<u16>,
}

/// Process supervisor backed by a map of "running" processes
#[derive(Default)]
pub struct MockSupervisor {
    processes: Mutex<Processes>,
    fail_start: Mutex<HashSet<String>>,
    /// Start succeeds but the process exits right away
    crash_on_start: Mutex<HashSet<String>>,
    fail_free_port: Mutex<HashSet<u16>>,
    pub server_starts: AtomicUsize,
    pub router_starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub last_router_launch: Mutex<Option<RouterLaunch>>,
    /// Slows every start down, to keep recoveries in flight
    start_delay: Mutex<Option<Duration>>,
}

impl MockSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, node_id: &str) {
        self.fail_start.lock().insert(node_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_start.lock().clear();
        self.crash_on_start.lock().clear();
        self.fail_free_port.lock().clear();
    }

    pub fn crash_on_start(&self, node_id: &str) {
        self.crash_on_start.lock().insert(node_id.to_string());
    }

    pub fn fail_free_port(&self, port: u16) {
        self.fail_free_port.lock().insert(port);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        *self.start_delay.lock() = Some(delay);
    }

    /// Simulate a crash: the process disappears and its port is released
    pub fn kill(&self, node_id: &str) {
        let mut processes = self.processes.lock();
        if let Some(port) = processes.tracked.remove(node_id) {
            processes.occupied.remove(&port);
        }
    }

    /// A tracked process is running on `port`
    pub fn spawn(&self, node_id: &str, port: u16) {
        let mut processes = self.processes.lock();
        processes.tracked.insert(node_id.to_string(), port);
        processes.occupied.insert(port);
    }

    /// Something the supervisor did not start holds the port
    pub fn spawn_untracked(&self, port: u16) {
        self.processes.lock().occupied.insert(port);
    }

    pub fn is_running(&self, node_id: &str) -> bool {
        self.processes.lock().tracked.contains_key(node_id)
    }

    pub fn port_occupied(&self, port: u16) -> bool {
        self.processes.lock().occupied.contains(&port)
    }

    pub fn running_count(&self) -> usize {
        self.processes.lock().tracked.len()
    }

    pub fn server_starts(&self) -> usize {
        self.server_starts.load(Ordering::SeqCst)
    }

    pub fn router_starts(&self) -> usize {
        self.router_starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    async fn launch(&self, node_id: &str, port: u16) -> Result<(), SupervisorError> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start.lock().contains(node_id) {
            return Err(SupervisorError::Spawn {
                node_id: node_id.to_string(),
                reason: "injected start failure".to_string(),
            });
        }
        if self.crash_on_start.lock().contains(node_id) {
            return Ok(());
        }
        let mut processes = self.processes.lock();
        processes.tracked.insert(node_id.to_string(), port);
        processes.occupied.insert(port);
        Ok(())
    }
}

#[async_trait]
impl ProcessSupervisor for MockSupervisor {
    async fn start_server_process(&self, launch: &ServerLaunch) -> Result<(), SupervisorError> {
        self.server_starts.fetch_add(1, Ordering::SeqCst);
        self.launch(&launch.node_id, launch.port).await
    }

    async fn start_router_process(&self, launch: &RouterLaunch) -> Result<(), SupervisorError> {
        self.router_starts.fetch_add(1, Ordering::SeqCst);
        *self.last_router_launch.lock() = Some(launch.clone());
        self.launch(&launch.node_id, launch.port).await
    }

    async fn stop_process(&self, node_id: &str) -> Result<(), SupervisorError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.kill(node_id);
        Ok(())
    }

    async fn is_tracked_alive(&self, node_id: &str) -> bool {
        self.processes.lock().tracked.contains_key(node_id)
    }

    async fn is_port_occupied(&self, port: u16) -> bool {
        self.processes.lock().occupied.contains(&port)
    }

    async fn free_port(&self, port: u16) -> Result<(), SupervisorError> {
        if self.fail_free_port.lock().contains(&port) {
            return Err(SupervisorError::Port {
                port,
                reason: "injected free-port failure".to_string(),
            });
        }
        let mut processes = self.processes.lock();
        processes.occupied.remove(&port);
        processes.tracked.retain(|_, p| *p != port);
        Ok(())
    }
}

/// Cluster gateway whose nodes answer when the mock supervisor holds their port
pub struct MockGateway {
    supervisor: Arc<MockSupervisor>,
    /// Ports whose replica set has been initiated
    initiated: Mutex<HashSet<u16>>,
    registered: Mutex<Vec<String>>,
    fail_initiate: Mutex<HashSet<String>>,
    fail_add_shard: Mutex<HashSet<String>>,
    fail_move_to: Mutex<HashSet<String>>,
    fail_split_at: Mutex<Vec<Value>>,
    /// Ports whose ping never returns
    hang_ping: Mutex<HashSet<u16>>,
    /// Ports whose ping fails with a command error
    refuse_ping: Mutex<HashSet<u16>>,
    /// Ports whose replica set status fails with a non-94 error
    status_fault: Mutex<HashSet<u16>>,
    remove_states: Mutex<HashMap<String, RemoveShardState>>,
    chunks_by_ns: Mutex<HashMap<String, Vec<ChunkRecord>>>,
    uuids: Mutex<HashMap<String, String>>,
    chunks_by_uuid: Mutex<HashMap<String, Vec<ChunkRecord>>>,
    pub initiate_calls: Mutex<Vec<(u16, String, Vec<String>)>>,
    pub add_shard_calls: Mutex<Vec<String>>,
    pub split_calls: Mutex<Vec<(String, String, Value)>>,
    pub move_calls: Mutex<Vec<(String, Value, String)>>,
    pub balancer_starts: AtomicUsize,
}

impl MockGateway {
    pub fn new(supervisor: Arc<MockSupervisor>) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            initiated: Mutex::new(HashSet::new()),
            registered: Mutex::new(Vec::new()),
            fail_initiate: Mutex::new(HashSet::new()),
            fail_add_shard: Mutex::new(HashSet::new()),
            fail_move_to: Mutex::new(HashSet::new()),
            fail_split_at: Mutex::new(Vec::new()),
            hang_ping: Mutex::new(HashSet::new()),
            refuse_ping: Mutex::new(HashSet::new()),
            status_fault: Mutex::new(HashSet::new()),
            remove_states: Mutex::new(HashMap::new()),
            chunks_by_ns: Mutex::new(HashMap::new()),
            uuids: Mutex::new(HashMap::new()),
            chunks_by_uuid: Mutex::new(HashMap::new()),
            initiate_calls: Mutex::new(Vec::new()),
            add_shard_calls: Mutex::new(Vec::new()),
            split_calls: Mutex::new(Vec::new()),
            move_calls: Mutex::new(Vec::new()),
            balancer_starts: AtomicUsize::new(0),
        })
    }

    pub fn fail_initiate(&self, replica_set: &str) {
        self.fail_initiate.lock().insert(replica_set.to_string());
    }

    pub fn fail_add_shard(&self, replica_set: &str) {
        self.fail_add_shard.lock().insert(replica_set.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_initiate.lock().clear();
        self.fail_add_shard.lock().clear();
        self.fail_move_to.lock().clear();
        self.fail_split_at.lock().clear();
        self.hang_ping.lock().clear();
        self.refuse_ping.lock().clear();
        self.status_fault.lock().clear();
    }

    pub fn fail_move_to(&self, shard: &str) {
        self.fail_move_to.lock().insert(shard.to_string());
    }

    pub fn fail_split_at(&self, middle: Value) {
        self.fail_split_at.lock().push(middle);
    }

    pub fn hang_ping(&self, port: u16) {
        self.hang_ping.lock().insert(port);
    }

    pub fn refuse_ping(&self, port: u16) {
        self.refuse_ping.lock().insert(port);
    }

    pub fn status_fault(&self, port: u16) {
        self.status_fault.lock().insert(port);
    }

    pub fn mark_initiated(&self, port: u16) {
        self.initiated.lock().insert(port);
    }

    pub fn register(&self, replica_set: &str) {
        self.registered.lock().push(replica_set.to_string());
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    pub fn set_remove_state(&self, shard: &str, state: RemoveShardState) {
        self.remove_states.lock().insert(shard.to_string(), state);
    }

    pub fn set_chunks_by_namespace(&self, namespace: &str, chunks: Vec<ChunkRecord>) {
        self.chunks_by_ns.lock().insert(namespace.to_string(), chunks);
    }

    pub fn set_chunks_by_uuid(&self, namespace: &str, uuid: &str, chunks: Vec<ChunkRecord>) {
        self.uuids.lock().insert(namespace.to_string(), uuid.to_string());
        self.chunks_by_uuid.lock().insert(uuid.to_string(), chunks);
    }

    pub fn initiate_count(&self) -> usize {
        self.initiate_calls.lock().len()
    }

    pub fn add_shard_count(&self) -> usize {
        self.add_shard_calls.lock().len()
    }

    fn reachable(&self, addr: &NodeAddr) -> Result<(), GatewayError> {
        if self.supervisor.port_occupied(addr.port) {
            Ok(())
        } else {
            Err(GatewayError::Connection {
                addr: addr.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

fn port_of(member: &str) -> Option<u16> {
    member.rsplit(':').next().and_then(|p| p.parse().ok())
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn ping(&self, addr: &NodeAddr) -> Result<(), GatewayError> {
        let hang = self.hang_ping.lock().contains(&addr.port);
        if hang {
            std::future::pending::<()>().await;
        }
        if self.refuse_ping.lock().contains(&addr.port) {
            return Err(GatewayError::Command {
                code: 13,
                message: "unauthorized".to_string(),
            });
        }
        self.reachable(addr)
    }

    async fn replica_set_status(&self, addr: &NodeAddr) -> Result<(), GatewayError> {
        self.reachable(addr)?;
        if self.status_fault.lock().contains(&addr.port) {
            return Err(GatewayError::Command {
                code: 1,
                message: "status fault".to_string(),
            });
        }
        if self.initiated.lock().contains(&addr.port) {
            Ok(())
        } else {
            Err(GatewayError::Command {
                code: NOT_YET_INITIALIZED,
                message: "no replset config has been received".to_string(),
            })
        }
    }

    async fn initiate_replica_set(
        &self,
        addr: &NodeAddr,
        name: &str,
        members: &[String],
    ) -> Result<(), GatewayError> {
        self.initiate_calls
            .lock()
            .push((addr.port, name.to_string(), members.to_vec()));
        self.reachable(addr)?;
        if self.fail_initiate.lock().contains(name) {
            return Err(GatewayError::Command {
                code: 93,
                message: format!("invalid replica set config for {}", name),
            });
        }
        let mut initiated = self.initiated.lock();
        initiated.insert(addr.port);
        initiated.extend(members.iter().filter_map(|m| port_of(m)));
        Ok(())
    }

    async fn is_shard_registered(
        &self,
        router: &NodeAddr,
        shard_name: &str,
    ) -> Result<bool, GatewayError> {
        self.reachable(router)?;
        Ok(self.registered.lock().iter().any(|s| s == shard_name))
    }

    async fn add_shard(&self, router: &NodeAddr, connection: &str) -> Result<(), GatewayError> {
        self.add_shard_calls.lock().push(connection.to_string());
        self.reachable(router)?;
        let name = connection.split('/').next().unwrap_or(connection).to_string();
        if self.fail_add_shard.lock().contains(&name) {
            return Err(GatewayError::Command {
                code: 96,
                message: format!("cannot add shard {}", name),
            });
        }
        let mut registered = self.registered.lock();
        if !registered.contains(&name) {
            registered.push(name);
        }
        Ok(())
    }

    async fn remove_shard(
        &self,
        router: &NodeAddr,
        shard_name: &str,
    ) -> Result<RemoveShardState, GatewayError> {
        self.reachable(router)?;
        let state = self
            .remove_states
            .lock()
            .get(shard_name)
            .cloned()
            .unwrap_or(RemoveShardState::Started);
        if state == RemoveShardState::Completed {
            self.registered.lock().retain(|s| s != shard_name);
        }
        Ok(state)
    }

    async fn split_chunk(
        &self,
        router: &NodeAddr,
        namespace: &str,
        shard_key: &str,
        middle: &Value,
    ) -> Result<(), GatewayError> {
        self.reachable(router)?;
        self.split_calls
            .lock()
            .push((namespace.to_string(), shard_key.to_string(), middle.clone()));
        if self.fail_split_at.lock().contains(middle) {
            return Err(GatewayError::Command {
                code: 180,
                message: "split failed".to_string(),
            });
        }
        Ok(())
    }

    async fn move_chunk(
        &self,
        router: &NodeAddr,
        _namespace: &str,
        shard_key: &str,
        find: &Value,
        to_shard: &str,
    ) -> Result<(), GatewayError> {
        self.reachable(router)?;
        self.move_calls
            .lock()
            .push((shard_key.to_string(), find.clone(), to_shard.to_string()));
        if self.fail_move_to.lock().contains(to_shard) {
            return Err(GatewayError::Command {
                code: 117,
                message: "move failed".to_string(),
            });
        }
        Ok(())
    }

    async fn start_balancer(&self, router: &NodeAddr) -> Result<(), GatewayError> {
        self.reachable(router)?;
        self.balancer_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn chunks_by_namespace(
        &self,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError> {
        self.reachable(router)?;
        Ok(self
            .chunks_by_ns
            .lock()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }

    async fn collection_uuid(
        &self,
        router: &NodeAddr,
        namespace: &str,
    ) -> Result<Option<String>, GatewayError> {
        self.reachable(router)?;
        Ok(self.uuids.lock().get(namespace).cloned())
    }

    async fn chunks_by_collection_uuid(
        &self,
        router: &NodeAddr,
        uuid: &str,
    ) -> Result<Vec<ChunkRecord>, GatewayError> {
        self.reachable(router)?;
        Ok(self
            .chunks_by_uuid
            .lock()
            .get(uuid)
            .cloned()
            .unwrap_or_default())
    }
}

pub fn topology(data_dir: &Path, store_dir: &Path) -> TopologyConfig {
    TopologyConfig {
        host: HOST.to_string(),
        base_port: BASE_PORT,
        base_data_path: data_dir.to_path_buf(),
        router_port: ROUTER_PORT,
        router_node_id: "mongos".to_string(),
        config_replica_set: "configReplSet".to_string(),
        store_dir: store_dir.to_path_buf(),
    }
}

/// Timings short enough for tests, long enough for the mocks
pub fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        process_settle_timeout_ms: 200,
        config_election_timeout_ms: 200,
        router_ready_timeout_ms: 200,
        shard_settle_timeout_ms: 200,
        multi_member_settle_timeout_ms: 200,
        registration_pause_ms: 0,
        poll_interval_ms: 5,
        command_timeout_ms: 500,
        initialize_deadline_secs: 30,
        retry_failed_shards: false,
        shard_retry_interval_secs: 60,
    }
}

pub fn fast_health() -> HealthConfig {
    HealthConfig {
        check_interval_secs: 3600,
        probe_timeout_ms: 50,
        failure_threshold: 3,
        auto_recover: true,
    }
}

pub fn fast_recovery() -> RecoveryConfig {
    RecoveryConfig {
        max_concurrent: 2,
        stop_grace_ms: 0,
        port_release_ms: 0,
        restart_timeout_ms: 100,
        deadline_secs: 10,
        event_queue_capacity: 16,
    }
}

pub fn test_config(data_dir: &Path, store_dir: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        topology: topology(data_dir, store_dir),
        lifecycle: fast_lifecycle(),
        health: fast_health(),
        recovery: fast_recovery(),
        log: Default::default(),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
