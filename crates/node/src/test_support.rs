// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and helpers shared by this crate's test modules.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use canary_core::RoutingState;
use canary_storage::StateLog;
use tokio_util::sync::CancellationToken;

use crate::config::{NodeConfig, Role};
use crate::engine::Node;
use crate::health::HealthProbe;
use crate::transport::Transport;

/// A config whose peer table contains only the node itself, with timings
/// shrunk to test scale. Sends to anyone else are dropped instantly.
pub fn solo_config(dir: &Path, node_id: &str, role: Role) -> NodeConfig {
    let mut peers = BTreeMap::new();
    peers.insert(node_id.to_string(), "127.0.0.1:1".to_string());
    let mut config = NodeConfig::new(node_id, role, peers, dir);
    config.prepare_timeout = Duration::from_millis(100);
    config.retry_delay = Duration::from_millis(10);
    config
}

/// Build a node without spawning any of its tasks.
pub fn build_node(config: NodeConfig, probe: Box<dyn HealthProbe>) -> Arc<Node> {
    let transport = Arc::new(Transport::new(config.node_id.clone(), config.peers.clone()));
    let log = StateLog::open(&config.log_dir, &config.node_id).unwrap();
    Node::new(config, transport, log, probe, CancellationToken::new()).unwrap()
}

/// Parse one node's durable log from disk.
pub fn read_log(dir: &Path, node_id: &str) -> Vec<RoutingState> {
    let raw = std::fs::read_to_string(dir.join(format!("{}.log", node_id))).unwrap();
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
