// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP data plane: thin JSON surface over the committed state.
//!
//! Read endpoints never touch protocol state; the coordinator mutations
//! (`/deploy`, `/rollout`, `/rollback`) go through the deploy driver and
//! come back with the round's outcome.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use canary_core::{HealthSample, RoutingState};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::engine::{DeployOutcome, DeployedModel, Node, NodeError, PeerView, RolloutTarget};

/// JSON error response with a 4xx/5xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn forbidden(message: impl Into<String>) -> Self {
        Self { status: StatusCode::FORBIDDEN, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::NotCoordinator => Self::forbidden(e.to_string()),
            NodeError::State(_) => Self::bad_request(e.to_string()),
            NodeError::StateLog(_) => Self::internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    node_id: String,
    version: u64,
    health: HealthSample,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ModelCatalog {
    current: String,
    models: indexmap::IndexMap<String, DeployedModel>,
}

#[derive(Debug, Deserialize)]
struct DeployRequest {
    model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RolloutRequest {
    model_id: Option<String>,
    weight: Option<f64>,
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    model_selected: String,
    version: u64,
    input: Value,
    prediction: String,
}

/// Build the data-plane router over a node handle.
pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/routing/state", get(get_state))
        .route("/health", get(get_health))
        .route("/health/snapshot", get(get_health))
        .route("/models", get(get_models))
        .route("/peers", get(get_peers))
        .route("/deploy", post(post_deploy))
        .route("/rollout", post(post_rollout))
        .route("/rollback", post(post_rollback))
        .route("/predict", post(post_predict))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serve the data plane until the shutdown token fires.
pub async fn serve(
    listener: TcpListener,
    node: Arc<Node>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn get_state(State(node): State<Arc<Node>>) -> Json<RoutingState> {
    Json(node.committed_state())
}

async fn get_health(State(node): State<Arc<Node>>) -> Json<HealthReport> {
    let state = node.committed_state();
    Json(HealthReport {
        node_id: node.node_id().to_string(),
        version: state.version,
        health: node.health_sample(),
        status: if node.gate_passes() { "healthy" } else { "unhealthy" },
    })
}

async fn get_models(State(node): State<Arc<Node>>) -> Json<ModelCatalog> {
    Json(ModelCatalog {
        current: node.committed_state().active_model().to_string(),
        models: node.models(),
    })
}

async fn get_peers(State(node): State<Arc<Node>>) -> Json<BTreeMap<String, PeerView>> {
    Json(node.peers_seen())
}

async fn post_deploy(
    State(node): State<Arc<Node>>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeployOutcome>, ApiError> {
    if !node.is_coordinator() {
        return Err(ApiError::forbidden("only coordinator can deploy"));
    }
    let model_id = req
        .model_id
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("model_id required"))?;

    let current = node.committed_state();
    if current.stable_model_id == model_id && current.canary_model_id == model_id {
        return Err(ApiError::bad_request(format!("already running {}", model_id)));
    }

    let outcome = node.deploy(RolloutTarget::full(model_id)).await?;
    Ok(Json(outcome))
}

async fn post_rollout(
    State(node): State<Arc<Node>>,
    Json(req): Json<RolloutRequest>,
) -> Result<Json<DeployOutcome>, ApiError> {
    if !node.is_coordinator() {
        return Err(ApiError::forbidden("only coordinator can roll out"));
    }
    let model_id = req
        .model_id
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ApiError::bad_request("model_id required"))?;
    let weight = req.weight.ok_or_else(|| ApiError::bad_request("weight required"))?;
    if !(0.0..=1.0).contains(&weight) {
        return Err(ApiError::bad_request(format!("weight {} outside 0.0..=1.0", weight)));
    }

    let stable = node.committed_state().stable_model_id;
    let outcome = node.deploy(RolloutTarget::split(stable, model_id, weight)).await?;
    Ok(Json(outcome))
}

async fn post_rollback(
    State(node): State<Arc<Node>>,
) -> Result<Json<DeployOutcome>, ApiError> {
    if !node.is_coordinator() {
        return Err(ApiError::forbidden("only coordinator can rollback"));
    }
    let previous = node
        .rollback_model()
        .ok_or_else(|| ApiError::bad_request("no previous version available"))?;

    let outcome = node.deploy(RolloutTarget::full(previous)).await?;
    Ok(Json(outcome))
}

async fn post_predict(
    State(node): State<Arc<Node>>,
    body: Option<Json<Value>>,
) -> Result<Json<PredictResponse>, ApiError> {
    let input = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    let state = node.committed_state();
    let model = sample_model(&state).ok_or_else(|| ApiError::internal("no routable model"))?;
    Ok(Json(PredictResponse {
        prediction: format!("result_from_{}", model),
        model_selected: model,
        version: state.version,
        input,
    }))
}

/// Pick a model for one request by cumulative-weight selection over the
/// committed weights.
pub fn sample_model(state: &RoutingState) -> Option<String> {
    let roll = rand::thread_rng().gen::<f64>();
    pick_weighted(&state.weights, roll).map(str::to_string)
}

/// Walk the cumulative weight distribution; `roll` is in `0.0..1.0`
/// relative to the total weight. Zero-weight entries are never picked.
pub fn pick_weighted(weights: &BTreeMap<String, f64>, roll: f64) -> Option<&str> {
    let total: f64 = weights.values().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return None;
    }
    let target = roll.clamp(0.0, 1.0) * total;
    let mut cumulative = 0.0;
    let mut last = None;
    for (model, weight) in weights {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last = Some(model.as_str());
        if target < cumulative {
            break;
        }
    }
    last
}

#[cfg(test)]
#[path = "data_plane_tests.rs"]
mod tests;
