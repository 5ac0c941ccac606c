// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node role engine: inbound dispatch, participant prepare handling,
//! decision application, and the periodic heartbeat/health tasks.
//!
//! One dispatch task drains the bounded inbound queue; the coordinator's
//! deploy driver (see `deploy.rs`) is the only other writer of the state
//! log, and it never runs concurrently with a dispatch step on the same
//! record because votes flow through the tally, not the log.

mod deploy;

pub use deploy::{decide, DeployOutcome, DeployStatus, RolloutTarget};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use canary_core::{
    now_utc, DecisionKind, HealthSample, RoutingState, RoutingStatus, Vote,
};
use canary_storage::{StateLog, StateLogError};
use canary_wire::{
    HealthSnapshot, Heartbeat, Message, MessageKind, PrepareReq, PrepareResp,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{NodeConfig, Role};
use crate::health::HealthProbe;
use crate::transport::Transport;

/// Capacity of the bounded inbound queue between the transport and the
/// dispatch task.
pub const INBOUND_QUEUE_DEPTH: usize = 256;

/// Errors from the role engine.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("state log error: {0}")]
    StateLog(#[from] StateLogError),

    #[error("only the coordinator can deploy")]
    NotCoordinator,

    #[error("invalid rollout target: {0}")]
    State(#[from] canary_core::StateError),
}

/// A model the cluster has committed at some point, kept for rollback
/// selection and the `/models` catalog.
#[derive(Debug, Clone, Serialize)]
pub struct DeployedModel {
    /// First time this node committed a state carrying the model.
    pub deployed_at: String,
    pub status: String,
}

/// Last observation of a peer, fed by heartbeats and health snapshots.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeerView {
    pub version: u64,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    pub last_seen: String,
}

/// Mutable node state behind one lock, never held across an await.
struct Shared {
    current: RoutingState,
    last_committed: RoutingState,
    models: IndexMap<String, DeployedModel>,
    peers_seen: BTreeMap<String, PeerView>,
}

/// One cluster member: role engine plus its periodic tasks.
pub struct Node {
    config: NodeConfig,
    transport: Arc<Transport>,
    log: Mutex<StateLog>,
    shared: Mutex<Shared>,
    /// txid -> votes received, one entry per in-flight round.
    votes: Mutex<HashMap<String, Vec<Vote>>>,
    probe: Mutex<Box<dyn HealthProbe>>,
    health: Mutex<HealthSample>,
    txid_seq: AtomicU64,
    window_seq: AtomicU64,
    /// Serializes logical deployments on the coordinator.
    deploy_gate: tokio::sync::Mutex<()>,
    fatal: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl Node {
    /// Build a node, recovering state from its log or bootstrapping a
    /// fresh one.
    pub fn new(
        config: NodeConfig,
        transport: Arc<Transport>,
        mut log: StateLog,
        probe: Box<dyn HealthProbe>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, NodeError> {
        let recovery = log.recover()?;
        let (current, last_committed) = match recovery.last {
            Some(last) => {
                let committed = recovery
                    .last_committed
                    .unwrap_or_else(|| RoutingState::bootstrap(&config.initial_model));
                // A PREPARED or ABORTED tail is history; the most recent
                // COMMITTED record is what this node serves.
                let current =
                    if last.status == RoutingStatus::Committed { last } else { committed.clone() };
                info!(
                    node_id = %config.node_id,
                    version = current.version,
                    model = %current.canary_model_id,
                    "recovered state from log"
                );
                (current, committed)
            }
            None => {
                let bootstrap = RoutingState::bootstrap(&config.initial_model);
                log.append(&bootstrap)?;
                info!(node_id = %config.node_id, model = %config.initial_model, "bootstrapped state");
                (bootstrap.clone(), bootstrap)
            }
        };

        let mut models = IndexMap::new();
        for model in [&last_committed.stable_model_id, &last_committed.canary_model_id] {
            models.entry(model.clone()).or_insert_with(|| DeployedModel {
                deployed_at: now_utc(),
                status: "active".to_string(),
            });
        }

        Ok(Arc::new(Self {
            config,
            transport,
            log: Mutex::new(log),
            shared: Mutex::new(Shared {
                current,
                last_committed,
                models,
                peers_seen: BTreeMap::new(),
            }),
            votes: Mutex::new(HashMap::new()),
            probe: Mutex::new(probe),
            health: Mutex::new(HealthSample::default()),
            txid_seq: AtomicU64::new(0),
            window_seq: AtomicU64::new(0),
            deploy_gate: tokio::sync::Mutex::new(()),
            fatal: Mutex::new(None),
            shutdown,
        }))
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn is_coordinator(&self) -> bool {
        self.config.role == Role::Coordinator
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The state the data plane serves: the last committed one.
    pub fn committed_state(&self) -> RoutingState {
        self.shared.lock().last_committed.clone()
    }

    pub fn current_state(&self) -> RoutingState {
        self.shared.lock().current.clone()
    }

    /// Latest local health observation.
    pub fn health_sample(&self) -> HealthSample {
        self.health.lock().clone()
    }

    /// Whether the latest observation passes the vote gate.
    pub fn gate_passes(&self) -> bool {
        let sample = self.health_sample();
        sample.p95 <= self.config.gate_p95_ms && sample.error_rate <= self.config.gate_error_rate
    }

    /// Deployed-model catalog in first-seen order.
    pub fn models(&self) -> IndexMap<String, DeployedModel> {
        self.shared.lock().models.clone()
    }

    /// Last heartbeat/health observation per peer.
    pub fn peers_seen(&self) -> BTreeMap<String, PeerView> {
        self.shared.lock().peers_seen.clone()
    }

    /// The catalog entry a rollback would redeploy, if any.
    pub fn rollback_model(&self) -> Option<String> {
        let shared = self.shared.lock();
        if shared.models.len() < 2 {
            return None;
        }
        let active = shared.current.active_model();
        let keys: Vec<&String> = shared.models.keys().collect();
        let last = keys[keys.len() - 1];
        let previous = if last == active { keys[keys.len() - 2] } else { last };
        Some(previous.clone())
    }

    /// Reason the node stopped, when a log write failed.
    pub fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().take()
    }

    /// Drop all cached outbound connections.
    pub async fn close_connections(&self) {
        self.transport.close().await;
    }

    /// Append a record, treating a write failure as fatal for the node:
    /// the shutdown token fires so the data plane stops serving, and the
    /// caller must not send any message that depends on the record.
    pub(crate) fn append_or_fail(&self, state: &RoutingState) -> Result<(), NodeError> {
        match self.log.lock().append(state) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "state log write failed, stopping node");
                *self.fatal.lock() = Some(e.to_string());
                self.shutdown.cancel();
                Err(e.into())
            }
        }
    }

    /// Drain the inbound queue until shutdown.
    pub async fn dispatch(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>) {
        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = inbound.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            };
            if let Err(e) = self.handle_message(message).await {
                match e {
                    // append_or_fail already cancelled the shutdown token.
                    NodeError::StateLog(_) => break,
                    other => warn!(error = %other, "failed to handle message"),
                }
            }
        }
    }

    async fn handle_message(&self, message: Message) -> Result<(), NodeError> {
        let sender = message.sender;
        match message.kind {
            MessageKind::PrepareReq(req) => {
                if self.config.role == Role::Participant {
                    self.handle_prepare(&sender, req).await?;
                }
            }
            MessageKind::PrepareResp(resp) => {
                if self.config.role == Role::Coordinator {
                    self.record_vote(&sender, resp);
                }
            }
            MessageKind::Decision(decision) => {
                self.apply_decision(decision.state, decision.kind)?;
            }
            MessageKind::Heartbeat(hb) => self.observe_heartbeat(&sender, hb),
            MessageKind::HealthSnapshot(snap) => self.observe_health(&sender, snap),
        }
        Ok(())
    }

    /// Participant side of phase 1: gate, durable PREPARED record, vote.
    async fn handle_prepare(&self, sender: &str, req: PrepareReq) -> Result<(), NodeError> {
        let (vote, reason) = self.evaluate_gate();

        let mut candidate = req.state;
        candidate.status = RoutingStatus::Prepared;
        // The promise must be durable before the vote leaves this node.
        self.append_or_fail(&candidate)?;

        info!(
            txid = %req.txid,
            model = %candidate.canary_model_id,
            version = candidate.version,
            vote = ?vote,
            "prepare request"
        );

        let response = Message::new(
            self.config.node_id.clone(),
            MessageKind::PrepareResp(PrepareResp { txid: req.txid, vote, reason }),
        );
        self.transport.send(sender, &response).await;
        Ok(())
    }

    fn evaluate_gate(&self) -> (Vote, String) {
        let sample = self.probe.lock().sample();
        *self.health.lock() = sample.clone();
        if sample.p95 <= self.config.gate_p95_ms
            && sample.error_rate <= self.config.gate_error_rate
        {
            (Vote::Commit, "ready to deploy".to_string())
        } else {
            (
                Vote::Abort,
                format!(
                    "health check failed: p95={:.1}ms error_rate={:.3}",
                    sample.p95, sample.error_rate
                ),
            )
        }
    }

    fn record_vote(&self, sender: &str, resp: PrepareResp) {
        debug!(txid = %resp.txid, sender, vote = ?resp.vote, reason = %resp.reason, "vote received");
        self.votes.lock().entry(resp.txid).or_default().push(resp.vote);
    }

    /// Apply a round's resolution. Safe to re-apply for the same txid:
    /// the second append is a harmless duplicate and the in-memory state
    /// ends in the same place.
    pub fn apply_decision(&self, state: RoutingState, kind: DecisionKind) -> Result<(), NodeError> {
        match kind {
            DecisionKind::Commit => {
                let mut committed = state;
                committed.status = RoutingStatus::Committed;
                self.append_or_fail(&committed)?;

                let mut shared = self.shared.lock();
                for model in [&committed.stable_model_id, &committed.canary_model_id] {
                    shared.models.entry(model.clone()).or_insert_with(|| DeployedModel {
                        deployed_at: now_utc(),
                        status: "active".to_string(),
                    });
                }
                info!(
                    txid = %committed.txid,
                    version = committed.version,
                    model = %committed.canary_model_id,
                    "committed"
                );
                shared.current = committed.clone();
                shared.last_committed = committed;
            }
            DecisionKind::Abort => {
                // The abort record carries the rejected version and txid
                // with the previously-committed payload, so the history
                // faithfully records the rollback.
                let fallback = self.shared.lock().last_committed.clone();
                let aborted = RoutingState {
                    version: state.version,
                    stable_model_id: fallback.stable_model_id,
                    canary_model_id: fallback.canary_model_id,
                    weights: fallback.weights,
                    status: RoutingStatus::Aborted,
                    txid: state.txid.clone(),
                    timestamp: now_utc(),
                };
                self.append_or_fail(&aborted)?;

                let mut shared = self.shared.lock();
                shared.current = shared.last_committed.clone();
                info!(
                    txid = %state.txid,
                    version = state.version,
                    staying_on = %shared.current.canary_model_id,
                    "aborted"
                );
            }
        }
        Ok(())
    }

    fn observe_heartbeat(&self, sender: &str, hb: Heartbeat) {
        debug!(sender, version = hb.version, model = %hb.model_id, "heartbeat");
        let mut shared = self.shared.lock();
        let view = shared.peers_seen.entry(sender.to_string()).or_default();
        view.version = hb.version;
        view.model_id = hb.model_id;
        view.digest = hb.digest;
        view.last_seen = hb.timestamp;
    }

    fn observe_health(&self, sender: &str, snap: HealthSnapshot) {
        debug!(sender, p95 = snap.p95, error_rate = snap.error_rate, window = %snap.window_id, "health snapshot");
        let mut shared = self.shared.lock();
        let view = shared.peers_seen.entry(sender.to_string()).or_default();
        view.p95 = Some(snap.p95);
        view.error_rate = Some(snap.error_rate);
        view.last_seen = now_utc();
    }

    /// Periodic liveness broadcast with the committed-state digest.
    pub async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {}
            }
            let (version, model_id, digest) = {
                let shared = self.shared.lock();
                (
                    shared.last_committed.version,
                    shared.last_committed.active_model().to_string(),
                    shared.last_committed.digest().ok(),
                )
            };
            let heartbeat = Message::new(
                self.config.node_id.clone(),
                MessageKind::Heartbeat(Heartbeat {
                    node_id: self.config.node_id.clone(),
                    version,
                    model_id,
                    timestamp: now_utc(),
                    digest,
                }),
            );
            self.broadcast(&heartbeat).await;
        }
    }

    /// Periodic health sampling and publication.
    pub async fn health_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.health_interval) => {}
            }
            let sample = {
                let sample = self.probe.lock().sample();
                *self.health.lock() = sample.clone();
                sample
            };
            let window = self.window_seq.fetch_add(1, Ordering::Relaxed);
            let snapshot = Message::new(
                self.config.node_id.clone(),
                MessageKind::HealthSnapshot(HealthSnapshot {
                    node_id: self.config.node_id.clone(),
                    p95: sample.p95,
                    error_rate: sample.error_rate,
                    window_id: format!("w-{}", window),
                }),
            );
            self.broadcast(&snapshot).await;
        }
    }

    /// Send a message to every peer but this node.
    pub(crate) async fn broadcast(&self, message: &Message) {
        for peer in self.config.peer_ids() {
            self.transport.send(peer, message).await;
        }
    }

    pub(crate) fn next_txid(&self, version: u64) -> String {
        let seed = self.txid_seq.fetch_add(1, Ordering::Relaxed);
        format!("deploy-{}-{}-{}", self.config.node_id, version, seed)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
