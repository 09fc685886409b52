//! Health judgments, failure events and recovery outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::NodeId;

/// Health classification of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Alive and answering administrative pings
    Healthy,
    /// Alive but not answering, or the probe itself failed
    Unhealthy,
    /// No tracked process and nothing listening on the port
    Dead,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Dead => write!(f, "dead"),
        }
    }
}

/// Kind of failure carried by a failure event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Dead,
    Unhealthy,
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Dead => write!(f, "dead"),
            FailureKind::Unhealthy => write!(f, "unhealthy"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Point-in-time health of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub node_id: NodeId,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed observations since the last healthy one
    pub consecutive_failures: u32,
    /// Set when the judgment is not healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl NodeHealth {
    pub fn healthy(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: HealthStatus::Healthy,
            last_check: Utc::now(),
            error: None,
            consecutive_failures: 0,
            failure_kind: None,
        }
    }

    /// Failed observation; `previous_failures` comes from the last judgment
    pub fn failed(
        node_id: NodeId,
        kind: FailureKind,
        error: String,
        previous_failures: u32,
    ) -> Self {
        let status = match kind {
            FailureKind::Dead => HealthStatus::Dead,
            FailureKind::Unhealthy | FailureKind::Timeout => HealthStatus::Unhealthy,
        };
        Self {
            node_id,
            status,
            last_check: Utc::now(),
            error: Some(error),
            consecutive_failures: previous_failures.saturating_add(1),
            failure_kind: Some(kind),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A detected or operator-reported node failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailureEvent {
    pub cluster_id: String,
    pub node_id: NodeId,
    pub kind: FailureKind,
    pub message: String,
    pub auto_restart: bool,
}

impl NodeFailureEvent {
    /// Build an event from a failed health judgment
    pub fn from_health(cluster_id: &str, health: &NodeHealth, auto_restart: bool) -> Option<Self> {
        let kind = health.failure_kind?;
        Some(Self {
            cluster_id: cluster_id.to_string(),
            node_id: health.node_id.clone(),
            kind,
            message: health.error.clone().unwrap_or_default(),
            auto_restart,
        })
    }
}

/// Result of one recovery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub cluster_id: String,
    pub node_id: NodeId,
    pub recovered: bool,
    /// Steps taken, in order
    pub steps: Vec<String>,
}

impl RecoveryOutcome {
    pub fn new(cluster_id: &str, node_id: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            node_id: node_id.to_string(),
            recovered: true,
            steps: Vec::new(),
        }
    }

    pub fn step(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn fail(&mut self, step: impl Into<String>) {
        self.recovered = false;
        self.steps.push(step.into());
    }
}
