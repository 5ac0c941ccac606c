//! Shared cluster fixture for the specs.
//!
//! Control listeners are bound on port 0 first so the peer table can be
//! built from the observed addresses before any node starts.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use canary_core::RoutingState;
use canary_node::{
    startup_with_listeners, FixedProbe, HealthProbe, NodeConfig, NodeHandle, Role,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const NODE_IDS: [&str; 3] = ["node-a", "node-b", "node-c"];

/// Per-cluster knobs. Timings are shrunk from the production defaults so
/// abort rounds resolve in test time.
pub struct ClusterSpec {
    /// One probe per node, `NODE_IDS` order. Defaults to healthy gates.
    pub probes: Vec<Box<dyn HealthProbe>>,
    pub max_retries: u32,
    pub prepare_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            probes: Vec::new(),
            max_retries: 3,
            prepare_timeout: Duration::from_millis(1500),
            retry_delay: Duration::from_millis(200),
        }
    }
}

pub struct Cluster {
    pub dir: TempDir,
    pub peers: BTreeMap<String, String>,
    pub handles: Vec<NodeHandle>,
}

impl Cluster {
    /// Boot a three-node cluster (node-a coordinating) on fresh logs.
    pub async fn start(spec: ClusterSpec) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        Self::start_in(dir, spec).await
    }

    /// Boot the cluster over an existing log directory (restart path).
    pub async fn start_in(dir: TempDir, mut spec: ClusterSpec) -> Self {
        if spec.probes.is_empty() {
            spec.probes = NODE_IDS.iter().map(|_| healthy()).collect();
        }
        assert_eq!(spec.probes.len(), NODE_IDS.len(), "one probe per node");

        let mut listeners = Vec::new();
        let mut peers = BTreeMap::new();
        for id in NODE_IDS {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            peers.insert(id.to_string(), listener.local_addr().expect("addr").to_string());
            listeners.push(listener);
        }

        let probes = std::mem::take(&mut spec.probes);
        let mut handles = Vec::new();
        for ((i, listener), probe) in listeners.into_iter().enumerate().zip(probes) {
            let role = if i == 0 { Role::Coordinator } else { Role::Participant };
            handles
                .push(start_node(dir.path(), &peers, NODE_IDS[i], role, probe, &spec, listener).await);
        }

        Self { dir, peers, handles }
    }

    pub fn coordinator(&self) -> &NodeHandle {
        &self.handles[0]
    }

    pub async fn shutdown(self) -> TempDir {
        for handle in self.handles {
            handle.shutdown().await;
        }
        self.dir
    }
}

/// Start one node on a pre-bound control listener.
pub async fn start_node(
    dir: &Path,
    peers: &BTreeMap<String, String>,
    node_id: &str,
    role: Role,
    probe: Box<dyn HealthProbe>,
    spec: &ClusterSpec,
    control: TcpListener,
) -> NodeHandle {
    let mut config = NodeConfig::new(node_id, role, peers.clone(), dir);
    config.prepare_timeout = spec.prepare_timeout;
    config.retry_delay = spec.retry_delay;
    config.max_retries = spec.max_retries;
    config.heartbeat_interval = Duration::from_millis(500);
    // Keep the periodic sampler away from scripted gate probes.
    config.health_interval = Duration::from_secs(3600);

    let data = TcpListener::bind("127.0.0.1:0").await.expect("bind data");
    startup_with_listeners(config, control, data, probe).await.expect("startup")
}

pub fn healthy() -> Box<dyn HealthProbe> {
    Box::new(FixedProbe::healthy())
}

pub fn unhealthy() -> Box<dyn HealthProbe> {
    Box::new(FixedProbe::unhealthy())
}

/// Poll a condition until it holds or the timeout expires.
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Parse one node's durable log.
pub fn read_log(dir: &Path, node_id: &str) -> Vec<RoutingState> {
    let raw = std::fs::read_to_string(dir.join(format!("{}.log", node_id))).expect("read log");
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("parse log line"))
        .collect()
}

pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);
