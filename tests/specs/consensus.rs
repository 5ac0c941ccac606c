//! Two-phase commit specs: agreement, aborts, retries, silent peers.

use std::time::Duration;

use canary_core::{HealthSample, RoutingStatus};
use canary_node::{DeployStatus, Role, RolloutTarget, ScriptedProbe};
use tokio::net::TcpListener;

use crate::prelude::*;

/// Scenario: three nodes boot from empty logs, every health gate passes,
/// and the coordinator deploys v2. Every node must converge on the same
/// committed version with identical digests.
#[tokio::test]
async fn happy_path_commits_on_every_node() {
    let cluster = Cluster::start(ClusterSpec::default()).await;

    let outcome =
        cluster.coordinator().node.deploy(RolloutTarget::full("v2")).await.expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Committed);
    assert_eq!(outcome.version, 2);
    assert_eq!(outcome.attempts, 1);

    let converged = wait_until(CONVERGE_TIMEOUT, || {
        cluster.handles.iter().all(|h| {
            let state = h.node.committed_state();
            state.version == 2 && state.canary_model_id == "v2"
        })
    })
    .await;
    assert!(converged, "every node should commit v2");

    let digests: Vec<String> = cluster
        .handles
        .iter()
        .map(|h| h.node.committed_state().digest().expect("digest"))
        .collect();
    assert_eq!(digests[0], digests[1]);
    assert_eq!(digests[1], digests[2]);

    cluster.shutdown().await;
}

/// Scenario: participant B's gate fails, so the round aborts and every
/// node keeps serving v1 while its log records the rejected round.
#[tokio::test]
async fn health_gate_abort_leaves_state_unchanged() {
    let spec = ClusterSpec {
        probes: vec![healthy(), unhealthy(), healthy()],
        max_retries: 1,
        ..ClusterSpec::default()
    };
    let cluster = Cluster::start(spec).await;

    let outcome =
        cluster.coordinator().node.deploy(RolloutTarget::full("v2")).await.expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Aborted);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.error.is_some());

    // Every node still serves v1.
    for handle in &cluster.handles {
        let state = handle.node.committed_state();
        assert_eq!(state.version, 1);
        assert_eq!(state.canary_model_id, "v1");
    }

    // Every log ends with PREPARED v2 then ABORTED v2.
    let dir = cluster.dir.path().to_path_buf();
    let logged = wait_until(CONVERGE_TIMEOUT, || {
        NODE_IDS.iter().all(|id| {
            let statuses: Vec<(u64, RoutingStatus)> =
                read_log(&dir, id).into_iter().map(|r| (r.version, r.status)).collect();
            statuses.ends_with(&[(2, RoutingStatus::Prepared), (2, RoutingStatus::Aborted)])
        })
    })
    .await;
    assert!(logged, "every node should log the rejected round");

    cluster.shutdown().await;
}

/// Scenario: B's gate fails on the first attempt and passes on the
/// second; the deployment commits with attempts=2 at the same version.
#[tokio::test]
async fn coordinator_retry_recovers_from_transient_gate_failure() {
    let flaky = ScriptedProbe::new([
        HealthSample { p95: 500.0, error_rate: 0.12, n: 1 },
        HealthSample { p95: 110.0, error_rate: 0.01, n: 2 },
    ]);
    let spec = ClusterSpec {
        probes: vec![healthy(), Box::new(flaky), healthy()],
        ..ClusterSpec::default()
    };
    let cluster = Cluster::start(spec).await;

    let outcome =
        cluster.coordinator().node.deploy(RolloutTarget::full("v2")).await.expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Committed);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.version, 2);

    let converged = wait_until(CONVERGE_TIMEOUT, || {
        cluster.handles.iter().all(|h| h.node.committed_state().version == 2)
    })
    .await;
    assert!(converged, "every node should converge on v2 after the retry");

    cluster.shutdown().await;
}

/// Scenario: participant C is unreachable, so the coordinator times out
/// and aborts; once C comes up, a retry commits cluster-wide.
#[tokio::test]
async fn silent_peer_aborts_then_commits_once_reachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = ClusterSpec {
        max_retries: 1,
        prepare_timeout: Duration::from_millis(800),
        ..ClusterSpec::default()
    };

    // Bind all three control addresses, but drop C's listener: its port
    // refuses connections until the node actually starts.
    let listener_a = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let listener_b = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let listener_c = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr_c = listener_c.local_addr().expect("addr").to_string();
    drop(listener_c);

    let mut peers = std::collections::BTreeMap::new();
    peers.insert("node-a".to_string(), listener_a.local_addr().expect("addr").to_string());
    peers.insert("node-b".to_string(), listener_b.local_addr().expect("addr").to_string());
    peers.insert("node-c".to_string(), addr_c.clone());

    let node_a =
        start_node(dir.path(), &peers, "node-a", Role::Coordinator, healthy(), &spec, listener_a)
            .await;
    let node_b =
        start_node(dir.path(), &peers, "node-b", Role::Participant, healthy(), &spec, listener_b)
            .await;

    let outcome = node_a.node.deploy(RolloutTarget::full("v2")).await.expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Aborted, "missing vote must abort");
    assert_eq!(node_a.node.committed_state().version, 1);

    // C comes up on its advertised address; the retry commits.
    let listener_c = TcpListener::bind(&addr_c).await.expect("rebind");
    let node_c =
        start_node(dir.path(), &peers, "node-c", Role::Participant, healthy(), &spec, listener_c)
            .await;

    let outcome = node_a.node.deploy(RolloutTarget::full("v2")).await.expect("deploy");
    assert_eq!(outcome.status, DeployStatus::Committed);
    assert_eq!(outcome.version, 2);

    let converged = wait_until(CONVERGE_TIMEOUT, || {
        [&node_a, &node_b, &node_c].iter().all(|h| h.node.committed_state().version == 2)
    })
    .await;
    assert!(converged, "all three nodes should converge once C is reachable");

    for handle in [node_a, node_b, node_c] {
        handle.shutdown().await;
    }
}

/// Sequential deployments: committed versions in every log are strictly
/// increasing, and each txid has at most one terminal outcome.
#[tokio::test]
async fn sequential_deploys_keep_history_prefix() {
    let cluster = Cluster::start(ClusterSpec::default()).await;

    for model in ["v2", "v3"] {
        let outcome =
            cluster.coordinator().node.deploy(RolloutTarget::full(model)).await.expect("deploy");
        assert_eq!(outcome.status, DeployStatus::Committed);
    }

    let dir = cluster.dir.path().to_path_buf();
    let converged = wait_until(CONVERGE_TIMEOUT, || {
        NODE_IDS.iter().all(|id| {
            read_log(&dir, id).iter().filter(|r| r.status == RoutingStatus::Committed).count() == 3
        })
    })
    .await;
    assert!(converged, "every node should log all three commits");

    for id in NODE_IDS {
        let records = read_log(&dir, id);

        let committed: Vec<u64> = records
            .iter()
            .filter(|r| r.status == RoutingStatus::Committed)
            .map(|r| r.version)
            .collect();
        assert_eq!(committed, vec![1, 2, 3], "{} history: {:?}", id, committed);

        for record in &records {
            let terminals = records
                .iter()
                .filter(|r| r.txid == record.txid && r.status != RoutingStatus::Prepared)
                .count();
            assert!(terminals <= 1, "{} has {} terminal records for {}", id, terminals, record.txid);
        }
    }

    cluster.shutdown().await;
}

/// Heartbeats carry the committed-state digest; peers surface it in
/// their visibility map without taking any protocol action.
#[tokio::test]
async fn heartbeats_surface_peer_visibility() {
    let cluster = Cluster::start(ClusterSpec::default()).await;

    let expected = cluster.coordinator().node.committed_state().digest().expect("digest");
    let observer = &cluster.handles[1].node;

    let seen = wait_until(CONVERGE_TIMEOUT, || {
        observer
            .peers_seen()
            .get("node-a")
            .and_then(|view| view.digest.clone())
            .is_some_and(|digest| digest == expected)
    })
    .await;
    assert!(seen, "node-b should observe node-a's heartbeat digest");

    // Observation only: no log entry, no state change.
    assert_eq!(observer.committed_state().version, 1);

    cluster.shutdown().await;
}
