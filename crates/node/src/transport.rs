// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed TCP mesh between the fixed peer set.
//!
//! Outbound connections are dialed lazily and cached per target; any
//! send error invalidates the cached writer so the next send re-dials.
//! Delivery is best effort: a message that cannot be sent after the dial
//! retries is dropped, which the coordinator observes as a vote timeout.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use canary_wire::{self as wire, Message, ProtocolError};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Dial attempts before a message is dropped.
const DIAL_ATTEMPTS: u32 = 3;
/// Base backoff between dial attempts; doubles per attempt.
const DIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Outbound half of the mesh: one cached connection per target.
pub struct Transport {
    node_id: String,
    /// Full static peer table, own id included: id -> `host:port`.
    peers: BTreeMap<String, String>,
    writers: tokio::sync::Mutex<HashMap<String, OwnedWriteHalf>>,
}

impl Transport {
    pub fn new(node_id: impl Into<String>, peers: BTreeMap<String, String>) -> Self {
        Self { node_id: node_id.into(), peers, writers: tokio::sync::Mutex::new(HashMap::new()) }
    }

    /// Send one message to a peer, dialing if needed.
    ///
    /// No-op for the node's own id and for unknown targets. On failure
    /// the message is dropped and the cached writer invalidated.
    pub async fn send(&self, target: &str, message: &Message) {
        if target == self.node_id {
            return;
        }
        let Some(addr) = self.peers.get(target) else {
            return;
        };

        let mut writers = self.writers.lock().await;
        if !writers.contains_key(target) {
            match self.dial(target, addr).await {
                Some(stream) => {
                    let (_, writer) = stream.into_split();
                    writers.insert(target.to_string(), writer);
                }
                None => return,
            }
        }

        if let Some(writer) = writers.get_mut(target) {
            if let Err(e) = wire::write_envelope(writer, message).await {
                warn!(target, error = %e, "send failed, dropping connection");
                writers.remove(target);
            }
        }
    }

    async fn dial(&self, target: &str, addr: &str) -> Option<TcpStream> {
        for attempt in 1..=DIAL_ATTEMPTS {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(target, addr, "connected to peer");
                    return Some(stream);
                }
                Err(e) => {
                    if attempt < DIAL_ATTEMPTS {
                        let backoff = DIAL_BACKOFF * 2u32.pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    } else {
                        warn!(target, addr, error = %e, "dial failed, dropping message");
                    }
                }
            }
        }
        None
    }

    /// Drop every cached writer, closing the outbound connections.
    pub async fn close(&self) {
        self.writers.lock().await.clear();
    }
}

/// Inbound half of the mesh: accept loop feeding the node's bounded
/// inbound queue. The listener is bound by the caller so tests can bind
/// port 0 first and build the peer table from the observed address.
pub struct Listener {
    listener: TcpListener,
    inbound: mpsc::Sender<Message>,
    shutdown: CancellationToken,
}

impl Listener {
    pub fn new(
        listener: TcpListener,
        inbound: mpsc::Sender<Message>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { listener, inbound, shutdown }
    }

    /// Accept connections until shutdown, spawning one reader task per peer.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "peer connection accepted");
                        let inbound = self.inbound.clone();
                        tokio::spawn(async move {
                            read_frames(stream, inbound).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }
    }
}

/// Read framed messages from one inbound connection until it ends.
///
/// A truncated frame or peer disconnect ends the connection cleanly;
/// anything else is logged and ends it too.
async fn read_frames(stream: TcpStream, inbound: mpsc::Sender<Message>) {
    let mut reader = BufReader::new(stream);
    loop {
        match wire::read_envelope(&mut reader).await {
            Ok(message) => {
                // Blocks when the inbound queue is full; back-pressure is
                // absorbed here, never in the accept loop.
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("peer disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "peer connection error");
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
