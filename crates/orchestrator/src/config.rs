//! Configuration module for the orchestrator
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Topology defaults
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Lifecycle settle timings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Health monitor
    #[serde(default)]
    pub health: HealthConfig,
    /// Recovery coordinator
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl OrchestratorConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: OrchestratorConfig) {
        self.topology.merge(other.topology);
        self.lifecycle = other.lifecycle;
        self.health = other.health;
        self.recovery = other.recovery;
        self.log.merge(other.log);
    }
}

/// Topology defaults used by the planner and for addressing nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Host all nodes bind to and are addressed by
    #[serde(default = "default_host")]
    pub host: String,
    /// First port handed out by the planner
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    /// Base data directory for node data paths
    #[serde(default = "default_base_data_path")]
    pub base_data_path: PathBuf,
    /// Router listen port
    #[serde(default = "default_router_port")]
    pub router_port: u16,
    /// Node ID given to the router
    #[serde(default = "default_router_node_id")]
    pub router_node_id: String,
    /// Replica set name shared by config servers
    #[serde(default = "default_config_replica_set")]
    pub config_replica_set: String,
    /// Directory holding persisted cluster topologies
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            base_port: default_base_port(),
            base_data_path: default_base_data_path(),
            router_port: default_router_port(),
            router_node_id: default_router_node_id(),
            config_replica_set: default_config_replica_set(),
            store_dir: default_store_dir(),
        }
    }
}

impl TopologyConfig {
    fn merge(&mut self, other: Self) {
        if !other.host.is_empty() {
            self.host = other.host;
        }
        if other.base_port > 0 {
            self.base_port = other.base_port;
        }
        if !other.base_data_path.as_os_str().is_empty() {
            self.base_data_path = other.base_data_path;
        }
        if other.router_port > 0 {
            self.router_port = other.router_port;
        }
        if !other.router_node_id.is_empty() {
            self.router_node_id = other.router_node_id;
        }
        if !other.config_replica_set.is_empty() {
            self.config_replica_set = other.config_replica_set;
        }
        if !other.store_dir.as_os_str().is_empty() {
            self.store_dir = other.store_dir;
        }
    }
}

/// Lifecycle settle timings
///
/// Every wait polls the real readiness probe every `poll_interval_ms` and gives
/// up after the matching timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Wait for freshly started processes to answer pings
    #[serde(default = "default_process_settle_timeout_ms")]
    pub process_settle_timeout_ms: u64,
    /// Wait for the config replica set to report initiated
    #[serde(default = "default_config_election_timeout_ms")]
    pub config_election_timeout_ms: u64,
    /// Wait for the router to accept connections
    #[serde(default = "default_router_ready_timeout_ms")]
    pub router_ready_timeout_ms: u64,
    /// Wait for a single-member shard replica set
    #[serde(default = "default_shard_settle_timeout_ms")]
    pub shard_settle_timeout_ms: u64,
    /// Wait for a multi-member shard replica set to elect a primary
    #[serde(default = "default_multi_member_settle_timeout_ms")]
    pub multi_member_settle_timeout_ms: u64,
    /// Pause between consecutive shard registrations
    #[serde(default = "default_registration_pause_ms")]
    pub registration_pause_ms: u64,
    /// Readiness poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on a single administrative command
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Bound on a whole initialization run
    #[serde(default = "default_initialize_deadline_secs")]
    pub initialize_deadline_secs: u64,
    /// Periodically retry shards left in error by initialization
    #[serde(default)]
    pub retry_failed_shards: bool,
    /// Interval of the shard retry timer
    #[serde(default = "default_shard_retry_interval_secs")]
    pub shard_retry_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            process_settle_timeout_ms: default_process_settle_timeout_ms(),
            config_election_timeout_ms: default_config_election_timeout_ms(),
            router_ready_timeout_ms: default_router_ready_timeout_ms(),
            shard_settle_timeout_ms: default_shard_settle_timeout_ms(),
            multi_member_settle_timeout_ms: default_multi_member_settle_timeout_ms(),
            registration_pause_ms: default_registration_pause_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            initialize_deadline_secs: default_initialize_deadline_secs(),
            retry_failed_shards: false,
            shard_retry_interval_secs: default_shard_retry_interval_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn process_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.process_settle_timeout_ms)
    }

    pub fn config_election_timeout(&self) -> Duration {
        Duration::from_millis(self.config_election_timeout_ms)
    }

    pub fn router_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.router_ready_timeout_ms)
    }

    /// Settle timeout for a shard replica set of `members` members
    pub fn shard_settle_timeout(&self, members: usize) -> Duration {
        if members > 1 {
            Duration::from_millis(self.multi_member_settle_timeout_ms)
        } else {
            Duration::from_millis(self.shard_settle_timeout_ms)
        }
    }

    pub fn registration_pause(&self) -> Duration {
        Duration::from_millis(self.registration_pause_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn initialize_deadline(&self) -> Duration {
        Duration::from_secs(self.initialize_deadline_secs)
    }

    pub fn shard_retry_interval(&self) -> Duration {
        Duration::from_secs(self.shard_retry_interval_secs.max(1))
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between full health scans (seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Timeout of a single connectivity probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Consecutive failures before a failure event is raised
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Raise failure events from health scans
    #[serde(default = "default_true")]
    pub auto_recover: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            auto_recover: true,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Recovery coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recoveries running at the same time
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Pause after stopping a zombie process
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Pause after freeing the port
    #[serde(default = "default_port_release_ms")]
    pub port_release_ms: u64,
    /// Wait for a restarted node to come up
    #[serde(default = "default_restart_timeout_ms")]
    pub restart_timeout_ms: u64,
    /// Overall bound on one recovery attempt
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Capacity of the failure event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stop_grace_ms: default_stop_grace_ms(),
            port_release_ms: default_port_release_ms(),
            restart_timeout_ms: default_restart_timeout_ms(),
            deadline_secs: default_deadline_secs(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl RecoveryConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn port_release(&self) -> Duration {
        Duration::from_millis(self.port_release_ms)
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

/// Configuration error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

// Default value functions

fn default_host() -> String {
    "localhost".to_string()
}

fn default_base_port() -> u16 {
    28000
}

fn default_base_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_router_port() -> u16 {
    27999
}

fn default_router_node_id() -> String {
    "mongos".to_string()
}

fn default_config_replica_set() -> String {
    "configReplSet".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./configs")
}

fn default_process_settle_timeout_ms() -> u64 {
    5000
}

fn default_config_election_timeout_ms() -> u64 {
    10000
}

fn default_router_ready_timeout_ms() -> u64 {
    5000
}

fn default_shard_settle_timeout_ms() -> u64 {
    3000
}

fn default_multi_member_settle_timeout_ms() -> u64 {
    10000
}

fn default_registration_pause_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_command_timeout_ms() -> u64 {
    10000
}

fn default_initialize_deadline_secs() -> u64 {
    300
}

fn default_shard_retry_interval_secs() -> u64 {
    60
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_port_release_ms() -> u64 {
    1000
}

fn default_restart_timeout_ms() -> u64 {
    5000
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}
