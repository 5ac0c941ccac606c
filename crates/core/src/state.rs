// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The replicated routing state record and its protocol vocabulary.
//!
//! One `RoutingState` per version travels through the two-phase commit
//! round, lands in every node's durable log, and (once committed) is the
//! only thing the data plane serves.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Lifecycle status of a routing state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingStatus {
    Prepared,
    Committed,
    Aborted,
}

/// A participant's answer to a prepare request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Commit,
    Abort,
}

/// The coordinator's resolution of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Commit,
    Abort,
}

/// Validation errors for a routing state record.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("weight for {model} is negative ({weight})")]
    NegativeWeight { model: String, weight: f64 },

    #[error("weights sum to {sum}, expected 1.0")]
    WeightSum { sum: f64 },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One versioned routing state, agreed on cluster-wide.
///
/// The weight map splits traffic between the stable and canary models.
/// A full promotion is the degenerate split where both ids name the same
/// model and its weight is 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingState {
    pub version: u64,
    pub stable_model_id: String,
    pub canary_model_id: String,
    /// model id -> traffic share. BTreeMap so serialization order is
    /// canonical without any extra sorting.
    pub weights: BTreeMap<String, f64>,
    pub status: RoutingStatus,
    pub txid: String,
    /// ISO-8601 UTC, assigned at record creation. Informational only,
    /// never used for ordering.
    pub timestamp: String,
}

impl RoutingState {
    /// The state every node starts from when its log is empty:
    /// version 1, all traffic on the initial model, already committed.
    pub fn bootstrap(initial_model: &str) -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(initial_model.to_string(), 1.0);
        Self {
            version: 1,
            stable_model_id: initial_model.to_string(),
            canary_model_id: initial_model.to_string(),
            weights,
            status: RoutingStatus::Committed,
            txid: crate::BOOTSTRAP_TXID.to_string(),
            timestamp: now_utc(),
        }
    }

    /// The model id a heartbeat reports for this state.
    pub fn active_model(&self) -> &str {
        &self.canary_model_id
    }

    /// Check the weight invariants: non-negative shares summing to 1.
    pub fn validate_weights(&self) -> Result<(), StateError> {
        for (model, weight) in &self.weights {
            if *weight < 0.0 {
                return Err(StateError::NegativeWeight {
                    model: model.clone(),
                    weight: *weight,
                });
            }
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(StateError::WeightSum { sum });
        }
        Ok(())
    }

    /// Canonical JSON: every map sorted by key, no insignificant
    /// whitespace. Routing the record through `serde_json::Value` sorts
    /// object keys, so two equal records always render identically.
    pub fn canonical_json(&self) -> Result<String, StateError> {
        Ok(serde_json::to_value(self)?.to_string())
    }

    /// SHA-256 hex of the canonical JSON. Cheap cross-node visibility
    /// comparison carried in heartbeats.
    pub fn digest(&self) -> Result<String, StateError> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Current wall-clock time as an ISO-8601 UTC string.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
