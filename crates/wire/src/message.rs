// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed control-plane messages.
//!
//! On the wire every message is `{"msg_type": ..., "sender": ..., "payload": {...}}`.
//! Each message type is its own variant carrying a typed payload; serde's
//! adjacent tagging on `msg_type`/`payload` does the discrimination.

use canary_core::{DecisionKind, RoutingState, Vote};
use serde::{Deserialize, Serialize};

/// One control-plane message between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Node id of the sending peer.
    pub sender: String,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    pub fn new(sender: impl Into<String>, kind: MessageKind) -> Self {
        Self { sender: sender.into(), kind }
    }
}

/// Message body, discriminated on `msg_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    PrepareReq(PrepareReq),
    PrepareResp(PrepareResp),
    Decision(Decision),
    Heartbeat(Heartbeat),
    HealthSnapshot(HealthSnapshot),
}

/// Phase 1: coordinator asks every participant to prepare a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareReq {
    pub txid: String,
    pub state: RoutingState,
}

/// Phase 1 reply: the participant's vote, echoing the txid verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareResp {
    pub txid: String,
    pub vote: Vote,
    pub reason: String,
}

/// Phase 2: the coordinator's resolution, applied by every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub txid: String,
    pub kind: DecisionKind,
    pub state: RoutingState,
}

/// Periodic liveness broadcast. Observed for operator visibility only;
/// no protocol decision is taken from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub version: u64,
    pub model_id: String,
    pub timestamp: String,
    /// SHA-256 hex of the canonical JSON of the last committed state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Periodic publication of a node's local health observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub node_id: String,
    pub p95: f64,
    pub error_rate: f64,
    pub window_id: String,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
