//! Weighted rollout and traffic sampling specs.

use canary_node::data_plane::sample_model;
use canary_node::{DeployStatus, RolloutTarget};

use crate::prelude::*;

/// Scenario: a staged rollout targeting {v1: 0.8, v2: 0.2} lands the
/// exact weight vector on every node, and request sampling approximates
/// the split within ±2% at N=10_000.
#[tokio::test]
async fn weighted_rollout_lands_exact_weights_and_sampling_tracks_them() {
    let cluster = Cluster::start(ClusterSpec::default()).await;

    let outcome = cluster
        .coordinator()
        .node
        .deploy(RolloutTarget::split("v1", "v2", 0.2))
        .await
        .expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Committed);

    let converged = wait_until(CONVERGE_TIMEOUT, || {
        cluster.handles.iter().all(|h| h.node.committed_state().version == 2)
    })
    .await;
    assert!(converged, "every node should commit the rollout");

    for handle in &cluster.handles {
        let state = handle.node.committed_state();
        assert_eq!(state.stable_model_id, "v1");
        assert_eq!(state.canary_model_id, "v2");
        assert_eq!(state.weights.get("v1"), Some(&0.8));
        assert_eq!(state.weights.get("v2"), Some(&0.2));
    }

    // Sampling distribution matches the committed weights.
    let state = cluster.handles[1].node.committed_state();
    let n = 10_000;
    let mut canary_hits = 0u32;
    for _ in 0..n {
        match sample_model(&state).expect("sample").as_str() {
            "v2" => canary_hits += 1,
            "v1" => {}
            other => panic!("unexpected model: {}", other),
        }
    }
    let share = f64::from(canary_hits) / f64::from(n);
    assert!(
        (share - 0.2).abs() <= 0.02,
        "canary share {} outside 0.2 ± 0.02",
        share
    );

    cluster.shutdown().await;
}

/// A later full promotion replaces the split entirely.
#[tokio::test]
async fn full_promotion_after_rollout_collapses_weights() {
    let cluster = Cluster::start(ClusterSpec::default()).await;

    cluster
        .coordinator()
        .node
        .deploy(RolloutTarget::split("v1", "v2", 0.2))
        .await
        .expect("rollout");
    let outcome =
        cluster.coordinator().node.deploy(RolloutTarget::full("v2")).await.expect("promote");
    assert_eq!(outcome.status, DeployStatus::Committed);
    assert_eq!(outcome.version, 3);

    let converged = wait_until(CONVERGE_TIMEOUT, || {
        cluster.handles.iter().all(|h| {
            let state = h.node.committed_state();
            state.version == 3 && state.weights.get("v2") == Some(&1.0) && state.weights.len() == 1
        })
    })
    .await;
    assert!(converged, "every node should promote v2 fully");

    cluster.shutdown().await;
}
