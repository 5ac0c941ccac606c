// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the node binary.
//!
//! All knobs use the `CANARYD_` prefix. The peer table is a comma list
//! of `id=host:port` entries, one per cluster member, own id included.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ConfigError, NodeConfig, Role};

/// Build a [`NodeConfig`] from the process environment.
pub fn config_from_env() -> Result<NodeConfig, ConfigError> {
    let node_id = require("CANARYD_NODE_ID")?;
    let role: Role = require("CANARYD_ROLE")?.parse()?;
    let peers = parse_peers(&require("CANARYD_PEERS")?)?;
    if !peers.contains_key(&node_id) {
        return Err(ConfigError::UnknownSelf(node_id));
    }

    let log_dir =
        PathBuf::from(std::env::var("CANARYD_LOG_DIR").unwrap_or_else(|_| "logs".to_string()));
    let mut config = NodeConfig::new(node_id, role, peers, log_dir);

    if let Ok(addr) = std::env::var("CANARYD_CONTROL_ADDR") {
        config.control_addr = addr;
    }
    if let Ok(addr) = std::env::var("CANARYD_DATA_ADDR") {
        config.data_addr = addr;
    }
    if let Ok(model) = std::env::var("CANARYD_INITIAL_MODEL") {
        config.initial_model = model;
    }
    if let Some(t) = duration_ms("CANARYD_PREPARE_TIMEOUT_MS")? {
        config.prepare_timeout = t;
    }
    if let Some(t) = duration_ms("CANARYD_RETRY_DELAY_MS")? {
        config.retry_delay = t;
    }
    if let Ok(n) = std::env::var("CANARYD_MAX_RETRIES") {
        config.max_retries = n
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var: "CANARYD_MAX_RETRIES", value: n })?;
    }
    if let Some(t) = duration_ms("CANARYD_HEARTBEAT_INTERVAL_MS")? {
        config.heartbeat_interval = t;
    }
    if let Some(t) = duration_ms("CANARYD_HEALTH_INTERVAL_MS")? {
        config.health_interval = t;
    }

    Ok(config)
}

/// Parse a `id=host:port,id=host:port` peer table.
pub fn parse_peers(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut peers = BTreeMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, addr) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidPeer(entry.to_string()))?;
        if id.is_empty() || !addr.contains(':') {
            return Err(ConfigError::InvalidPeer(entry.to_string()));
        }
        peers.insert(id.trim().to_string(), addr.trim().to_string());
    }
    if peers.is_empty() {
        return Err(ConfigError::InvalidPeer(raw.to_string()));
    }
    Ok(peers)
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).ok().filter(|s| !s.is_empty()).ok_or(ConfigError::MissingVar(var))
}

fn duration_ms(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => {
            let ms: u64 = value
                .parse()
                .map_err(|_| ConfigError::InvalidDuration { var, value })?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}
