use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::error::ReplicationError;
use crate::message::types::Message;
use crate::network::peers::PeerDirectory;

/// Peer-addressed message bus.
///
/// `send` must return immediately after enqueueing; delivery happens on the
/// receiving node's inbound frame channel, drained by its message loop.
pub trait Transport: Send + Sync {
    fn send(&self, target: u32, message: &Message) -> Result<(), ReplicationError>;
}

/// Decorator that feeds send latency and failure counts into the peer
/// directory, where the policy engine reads them back as latency history
/// and packet loss.
pub struct RecordingTransport {
    inner: Arc<dyn Transport>,
    peers: Arc<PeerDirectory>,
}

impl RecordingTransport {
    pub fn new(inner: Arc<dyn Transport>, peers: Arc<PeerDirectory>) -> Arc<Self> {
        Arc::new(Self { inner, peers })
    }
}

impl Transport for RecordingTransport {
    fn send(&self, target: u32, message: &Message) -> Result<(), ReplicationError> {
        let started = std::time::Instant::now();
        let result = self.inner.send(target, message);
        self.peers.record_send(
            target,
            started.elapsed().as_micros() as u64,
            result.is_ok(),
        );
        result
    }
}

/// In-process bus connecting the nodes of a single-process cluster.
///
/// Frames still travel in wire form so the receive side exercises the same
/// decode path as a real transport. Used by tests and the demo topology.
pub struct LoopbackBus {
    inboxes: DashMap<u32, mpsc::UnboundedSender<String>>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inboxes: DashMap::new(),
        })
    }

    /// Registers a node and returns its inbound frame channel.
    pub fn register(&self, node_id: u32) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(node_id, tx);
        rx
    }

    pub fn unregister(&self, node_id: u32) {
        self.inboxes.remove(&node_id);
    }
}

impl Transport for LoopbackBus {
    fn send(&self, target: u32, message: &Message) -> Result<(), ReplicationError> {
        let inbox = self
            .inboxes
            .get(&target)
            .ok_or_else(|| ReplicationError::Transport {
                target,
                reason: "unknown node".to_string(),
            })?;

        inbox
            .send(message.serialize())
            .map_err(|_| ReplicationError::Transport {
                target,
                reason: "inbox closed".to_string(),
            })
    }
}

/// UDP datagram transport.
///
/// Outbound frames are queued on an unbounded channel and drained by a
/// sender task, so `send` never blocks the caller. A receive task pushes
/// raw frames into the node's inbound channel; decoding (and dropping of
/// malformed frames) happens in the message loop.
pub struct UdpTransport {
    node_id: u32,
    peers: Arc<PeerDirectory>,
    outbound: mpsc::UnboundedSender<(SocketAddr, String)>,
    outbound_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<(SocketAddr, String)>>>,
}

impl UdpTransport {
    pub fn new(node_id: u32, peers: Arc<PeerDirectory>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            node_id,
            peers,
            outbound: tx,
            outbound_rx: std::sync::Mutex::new(Some(rx)),
        })
    }

    /// Binds the socket and spawns the sender and receiver loops. Received
    /// frames are forwarded into `inbound`.
    pub async fn start(
        &self,
        bind_addr: SocketAddr,
        inbound: mpsc::UnboundedSender<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        tracing::info!("Node {} transport listening on {}", self.node_id, bind_addr);

        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .expect("transport mutex poisoned")
            .take()
            .expect("transport already started");

        let send_socket = socket.clone();
        let mut send_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_frame = outbound_rx.recv() => {
                        let Some((addr, frame)) = maybe_frame else { break };
                        if let Err(e) = send_socket.send_to(frame.as_bytes(), addr).await {
                            tracing::warn!("UDP send to {} failed: {}", addr, e);
                        }
                    }
                    _ = send_shutdown.changed() => break,
                }
            }
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, _src)) => {
                                match std::str::from_utf8(&buf[..len]) {
                                    Ok(frame) => {
                                        if inbound.send(frame.to_string()).is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => {
                                        tracing::warn!("Dropping non-UTF-8 datagram ({} bytes)", len);
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("UDP receive failed: {}", e);
                                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send(&self, target: u32, message: &Message) -> Result<(), ReplicationError> {
        let (hostname, port) =
            self.peers
                .endpoint(target)
                .ok_or_else(|| ReplicationError::Transport {
                    target,
                    reason: "unknown peer".to_string(),
                })?;

        let addr: SocketAddr =
            format!("{}:{}", hostname, port)
                .parse()
                .map_err(|_| ReplicationError::Transport {
                    target,
                    reason: format!("bad endpoint {}:{}", hostname, port),
                })?;

        self.outbound
            .send((addr, message.serialize()))
            .map_err(|_| ReplicationError::Transport {
                target,
                reason: "sender task stopped".to_string(),
            })
    }
}
