// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node configuration: every knob in one explicit structure.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Role of a node in the statically configured cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Proposes new states and broadcasts decisions.
    Coordinator,
    /// Votes on prepares and applies decisions.
    Participant,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coordinator" => Ok(Role::Coordinator),
            "participant" => Ok(Role::Participant),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid role {0:?} (expected coordinator or participant)")]
    InvalidRole(String),

    #[error("invalid peer entry {0:?} (expected id=host:port)")]
    InvalidPeer(String),

    #[error("own node id {0:?} is not in the peer table")]
    UnknownSelf(String),

    #[error("invalid duration for {var}: {value:?}")]
    InvalidDuration { var: &'static str, value: String },

    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Full configuration for one node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Short opaque node id, e.g. `node-a`.
    pub node_id: String,
    pub role: Role,
    /// Full static peer table, own id included: id -> `host:port`.
    pub peers: BTreeMap<String, String>,
    /// Control-plane bind address.
    pub control_addr: String,
    /// Data-plane (HTTP) bind address.
    pub data_addr: String,
    /// Directory holding the per-node state log.
    pub log_dir: PathBuf,
    /// Model id of the bootstrap state.
    pub initial_model: String,
    /// How long the coordinator waits for votes before deciding ABORT.
    pub prepare_timeout: Duration,
    /// Pause between deployment attempts after an aborted round.
    pub retry_delay: Duration,
    /// Attempts per logical deployment.
    pub max_retries: u32,
    pub heartbeat_interval: Duration,
    pub health_interval: Duration,
    /// Health gate: vote COMMIT only when p95 is at or under this.
    pub gate_p95_ms: f64,
    /// Health gate: vote COMMIT only when the error rate is at or under this.
    pub gate_error_rate: f64,
}

impl NodeConfig {
    /// Configuration with default timings and thresholds.
    pub fn new(
        node_id: impl Into<String>,
        role: Role,
        peers: BTreeMap<String, String>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            peers,
            control_addr: "0.0.0.0:60001".to_string(),
            data_addr: "0.0.0.0:50051".to_string(),
            log_dir: log_dir.into(),
            initial_model: "v1".to_string(),
            prepare_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_secs(2),
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(2),
            health_interval: Duration::from_secs(5),
            gate_p95_ms: 200.0,
            gate_error_rate: 0.05,
        }
    }

    /// Peer ids this node sends to (everyone but itself).
    pub fn peer_ids(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str).filter(move |id| *id != self.node_id)
    }

    /// Number of votes a coordinator round expects.
    pub fn expected_votes(&self) -> usize {
        self.peers.keys().filter(|id| **id != self.node_id).count()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
