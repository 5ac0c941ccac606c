// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node lifecycle: bind, recover, spawn tasks, tear down.
//!
//! Listeners are bound before the node starts so tests can bind port 0
//! first and build the peer table from the observed addresses. The
//! returned handle owns the shutdown token and every spawned task;
//! dropping into [`NodeHandle::shutdown`] releases them all.

use std::net::SocketAddr;
use std::sync::Arc;

use canary_storage::{StateLog, StateLogError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::NodeConfig;
use crate::data_plane;
use crate::engine::{Node, NodeError, INBOUND_QUEUE_DEPTH};
use crate::health::{HealthProbe, SimulatedProbe};
use crate::transport::{Listener, Transport};

/// Errors that stop a node from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {0}: {1}")]
    BindFailed(String, std::io::Error),

    #[error("state log error: {0}")]
    StateLog(#[from] StateLogError),

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running node and the means to stop it.
pub struct NodeHandle {
    pub node: Arc<Node>,
    pub control_addr: SocketAddr,
    pub data_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Completes when the node stops on its own (fatal log error).
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        self.node.close_connections().await;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// Bind the configured addresses and start the node with the simulated
/// health probe.
pub async fn startup(config: NodeConfig) -> Result<NodeHandle, StartupError> {
    let control_listener = TcpListener::bind(&config.control_addr)
        .await
        .map_err(|e| StartupError::BindFailed(config.control_addr.clone(), e))?;
    let data_listener = TcpListener::bind(&config.data_addr)
        .await
        .map_err(|e| StartupError::BindFailed(config.data_addr.clone(), e))?;
    startup_with_listeners(config, control_listener, data_listener, Box::new(SimulatedProbe::new()))
        .await
}

/// Start a node on pre-bound listeners with an explicit health probe.
pub async fn startup_with_listeners(
    config: NodeConfig,
    control_listener: TcpListener,
    data_listener: TcpListener,
    probe: Box<dyn HealthProbe>,
) -> Result<NodeHandle, StartupError> {
    let control_addr = control_listener.local_addr()?;
    let data_addr = data_listener.local_addr()?;

    let log = StateLog::open(&config.log_dir, &config.node_id)?;
    let transport = Arc::new(Transport::new(config.node_id.clone(), config.peers.clone()));
    let shutdown = CancellationToken::new();
    let node = Node::new(config, transport, log, probe, shutdown.clone())?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(
        Listener::new(control_listener, inbound_tx, shutdown.clone()).run(),
    ));
    tasks.push(tokio::spawn(Arc::clone(&node).dispatch(inbound_rx)));
    tasks.push(tokio::spawn(Arc::clone(&node).heartbeat_loop()));
    tasks.push(tokio::spawn(Arc::clone(&node).health_loop()));

    let data_node = Arc::clone(&node);
    let data_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = data_plane::serve(data_listener, data_node, data_shutdown).await {
            error!(error = %e, "data plane server failed");
        }
    }));

    info!(
        node_id = %node.node_id(),
        role = ?node.role(),
        control = %control_addr,
        data = %data_addr,
        "node ready"
    );

    Ok(NodeHandle { node, control_addr, data_addr, shutdown, tasks })
}
