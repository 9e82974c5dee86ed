use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::message::types::{now_micros, Message, MessageKind};
use crate::network::peers::PeerDirectory;
use crate::network::transport::Transport;

/// Default liveness broadcast period.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A peer with no heartbeat for this long is declared failed.
const FAILURE_TIMEOUT: Duration = Duration::from_secs(90);

type StatusListener = Box<dyn Fn(u32, bool) + Send + Sync>;

/// Periodic liveness broadcast plus the failure detector sweep.
///
/// Status transitions are pushed to registered listeners; the node wires
/// these to `handle_node_failure` / `handle_node_recovery` on both
/// coordinators.
pub struct HeartbeatService {
    node_id: u32,
    peers: Arc<PeerDirectory>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    failure_timeout: Duration,
    listeners: Mutex<Vec<StatusListener>>,
}

impl HeartbeatService {
    pub fn new(
        node_id: u32,
        peers: Arc<PeerDirectory>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::with_timing(node_id, peers, transport, HEARTBEAT_INTERVAL, FAILURE_TIMEOUT)
    }

    pub fn with_timing(
        node_id: u32,
        peers: Arc<PeerDirectory>,
        transport: Arc<dyn Transport>,
        interval: Duration,
        failure_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            peers,
            transport,
            interval,
            failure_timeout,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Registers a callback invoked with `(peer_id, active)` on every
    /// liveness transition observed by this service.
    pub fn on_status_change(&self, listener: impl Fn(u32, bool) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .expect("listener mutex poisoned")
            .push(Box::new(listener));
    }

    /// Spawns the emitter and failure-detector loops.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let emitter = self.clone();
        let mut emitter_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(emitter.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => emitter.broadcast_heartbeat(),
                    _ = emitter_shutdown.changed() => break,
                }
            }
            tracing::info!("Heartbeat emitter stopped");
        });

        let detector = self;
        let mut detector_shutdown = shutdown;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => detector.sweep(),
                    _ = detector_shutdown.changed() => break,
                }
            }
        });
    }

    /// Called by the message loop on every inbound `HEARTBEAT`.
    pub fn handle_heartbeat(&self, sender: u32) {
        if !self.peers.contains(sender) {
            tracing::debug!("Heartbeat from unknown node {}", sender);
            return;
        }

        let was_active = self.peers.is_reachable(sender);
        self.peers.update_status(sender, true);
        tracing::debug!("Received heartbeat from node {}", sender);

        if !was_active {
            tracing::info!("Node {} recovered", sender);
            self.notify(sender, true);
        }
    }

    fn broadcast_heartbeat(&self) {
        let heartbeat = Message {
            kind: MessageKind::Heartbeat,
            sender: self.node_id,
            timestamp: now_micros(),
            ..Message::default()
        };

        for peer in self.peers.active_ids() {
            if peer == self.node_id {
                continue;
            }
            if let Err(e) = self.transport.send(peer, &heartbeat) {
                tracing::warn!("Failed to send heartbeat to node {}: {}", peer, e);
            }
        }
    }

    fn sweep(&self) {
        let now = now_micros();
        let timeout_us = self.failure_timeout.as_micros() as u64;

        for peer in self.peers.active_ids() {
            if peer == self.node_id {
                continue;
            }
            let Some(last) = self.peers.last_heartbeat_us(peer) else {
                continue;
            };
            if now.saturating_sub(last) > timeout_us {
                tracing::warn!(
                    "Node {} declared failed (no heartbeat for {}ms)",
                    peer,
                    now.saturating_sub(last) / 1000
                );
                self.peers.update_status(peer, false);
                self.notify(peer, false);
            }
        }
    }

    fn notify(&self, peer: u32, active: bool) {
        let listeners = self.listeners.lock().expect("listener mutex poisoned");
        for listener in listeners.iter() {
            listener(peer, active);
        }
    }
}
