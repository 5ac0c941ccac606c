// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator driver: one 2PC round per attempt, with bounded retries.

use std::collections::BTreeMap;
use std::time::Duration;

use canary_core::{now_utc, DecisionKind, RoutingState, RoutingStatus, Vote};
use canary_wire::{Decision, Message, MessageKind, PrepareReq};
use serde::Serialize;
use tracing::{info, warn};

use super::{Node, NodeError};
use crate::config::Role;

/// How often the driver re-checks the vote tally while waiting.
const VOTE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal result of a logical deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Committed,
    Aborted,
}

/// What the coordinator reports back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct DeployOutcome {
    pub status: DeployStatus,
    pub model_id: String,
    pub version: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The state a deployment drives the cluster toward.
#[derive(Debug, Clone)]
pub struct RolloutTarget {
    pub stable_model_id: String,
    pub canary_model_id: String,
    pub weights: BTreeMap<String, f64>,
}

impl RolloutTarget {
    /// Full promotion: all traffic on one model.
    pub fn full(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        let mut weights = BTreeMap::new();
        weights.insert(model_id.clone(), 1.0);
        Self { stable_model_id: model_id.clone(), canary_model_id: model_id, weights }
    }

    /// Staged rollout: split traffic between a stable and a canary model.
    pub fn split(
        stable_model_id: impl Into<String>,
        canary_model_id: impl Into<String>,
        canary_share: f64,
    ) -> Self {
        let stable = stable_model_id.into();
        let canary = canary_model_id.into();
        if stable == canary {
            return Self::full(stable);
        }
        let mut weights = BTreeMap::new();
        weights.insert(stable.clone(), 1.0 - canary_share);
        weights.insert(canary.clone(), canary_share);
        Self { stable_model_id: stable, canary_model_id: canary, weights }
    }

    fn candidate(&self, version: u64, txid: &str) -> RoutingState {
        RoutingState {
            version,
            stable_model_id: self.stable_model_id.clone(),
            canary_model_id: self.canary_model_id.clone(),
            weights: self.weights.clone(),
            status: RoutingStatus::Prepared,
            txid: txid.to_string(),
            timestamp: now_utc(),
        }
    }
}

/// Resolve a round from its votes. Missing votes count as ABORT.
pub fn decide(votes: &[Vote], expected: usize) -> DecisionKind {
    if votes.len() < expected {
        return DecisionKind::Abort;
    }
    if votes.iter().all(|v| *v == Vote::Commit) {
        DecisionKind::Commit
    } else {
        DecisionKind::Abort
    }
}

impl Node {
    /// Drive a logical deployment through 2PC rounds until it commits or
    /// the retry budget runs out.
    ///
    /// The target version is fixed on the first attempt; retries reuse it
    /// under a fresh txid. Only one logical deployment runs at a time.
    pub async fn deploy(&self, target: RolloutTarget) -> Result<DeployOutcome, NodeError> {
        if self.config().role != Role::Coordinator {
            return Err(NodeError::NotCoordinator);
        }
        target.candidate(0, "probe").validate_weights()?;

        let _round = self.deploy_gate.lock().await;
        let next_version = self.shared.lock().current.version + 1;
        let max_retries = self.config().max_retries.max(1);

        for attempt in 1..=max_retries {
            let txid = self.next_txid(next_version);
            info!(
                txid = %txid,
                version = next_version,
                model = %target.canary_model_id,
                attempt,
                max_retries,
                "starting deployment round"
            );

            // Phase 1: durable candidate, then PREPARE to every peer.
            let candidate = target.candidate(next_version, &txid);
            self.append_or_fail(&candidate)?;
            let prepare = Message::new(
                self.config().node_id.clone(),
                MessageKind::PrepareReq(PrepareReq {
                    txid: txid.clone(),
                    state: candidate.clone(),
                }),
            );
            self.broadcast(&prepare).await;

            let kind = self.collect_votes(&txid).await;

            // Phase 2: broadcast and apply. The candidate is copied before
            // its status is resolved so the PREPARED record is never
            // mutated in place.
            let mut resolved = candidate.clone();
            resolved.status = match kind {
                DecisionKind::Commit => RoutingStatus::Committed,
                DecisionKind::Abort => RoutingStatus::Aborted,
            };
            let decision = Message::new(
                self.config().node_id.clone(),
                MessageKind::Decision(Decision { txid: txid.clone(), kind, state: resolved.clone() }),
            );
            self.broadcast(&decision).await;
            self.apply_decision(resolved, kind)?;

            if kind == DecisionKind::Commit {
                return Ok(DeployOutcome {
                    status: DeployStatus::Committed,
                    model_id: target.canary_model_id.clone(),
                    version: next_version,
                    attempts: attempt,
                    error: None,
                });
            }

            if attempt < max_retries {
                warn!(
                    txid = %txid,
                    attempt,
                    retry_in_ms = self.config().retry_delay.as_millis() as u64,
                    "deployment aborted, retrying"
                );
                tokio::time::sleep(self.config().retry_delay).await;
            }
        }

        let current = self.shared.lock().current.clone();
        Ok(DeployOutcome {
            status: DeployStatus::Aborted,
            model_id: current.active_model().to_string(),
            version: current.version,
            attempts: max_retries,
            error: Some(format!(
                "deployment of {} failed after {} attempts",
                target.canary_model_id, max_retries
            )),
        })
    }

    /// Poll the vote tally for this round until every expected vote is in
    /// or the deadline expires, then drop the tally entry and decide.
    async fn collect_votes(&self, txid: &str) -> DecisionKind {
        let expected = self.config().expected_votes();
        let deadline = tokio::time::Instant::now() + self.config().prepare_timeout;

        while tokio::time::Instant::now() < deadline {
            let arrived = self.votes.lock().get(txid).map_or(0, Vec::len);
            if arrived >= expected {
                break;
            }
            tokio::time::sleep(VOTE_POLL_INTERVAL).await;
        }

        let votes = self.votes.lock().remove(txid).unwrap_or_default();
        if votes.len() < expected {
            warn!(txid, received = votes.len(), expected, "vote timeout");
        }
        decide(&votes, expected)
    }
}

#[cfg(test)]
#[path = "deploy_tests.rs"]
mod tests;
