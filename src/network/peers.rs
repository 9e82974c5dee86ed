use dashmap::DashMap;
use std::collections::VecDeque;

use crate::message::types::now_micros;

/// Number of latency samples retained per peer.
const LATENCY_WINDOW: usize = 100;

/// A single known peer as seen by the local failure detector and send path.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub hostname: String,
    pub port: u16,
    pub active: bool,
    pub last_heartbeat_us: u64,
    latency_samples: VecDeque<u64>,
    messages_sent: u64,
    send_failures: u64,
}

impl PeerEntry {
    fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            active: true,
            last_heartbeat_us: now_micros(),
            latency_samples: VecDeque::with_capacity(LATENCY_WINDOW),
            messages_sent: 0,
            send_failures: 0,
        }
    }

    fn record_send(&mut self, latency_us: u64, ok: bool) {
        if self.latency_samples.len() == LATENCY_WINDOW {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
        self.messages_sent += 1;
        if !ok {
            self.send_failures += 1;
        }
    }

    fn average_latency_ms(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        let total: u64 = self.latency_samples.iter().sum();
        total as f64 / self.latency_samples.len() as f64 / 1000.0
    }

    fn packet_loss_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            return 0.0;
        }
        self.send_failures as f64 / self.messages_sent as f64
    }
}

/// Directory of known peers, shared by the send path, the heartbeat service
/// and both coordinators.
pub struct PeerDirectory {
    peers: DashMap<u32, PeerEntry>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    pub fn add(&self, id: u32, hostname: &str, port: u16) {
        self.peers.insert(id, PeerEntry::new(hostname, port));
        tracing::info!("Added peer {} at {}:{}", id, hostname, port);
    }

    pub fn remove(&self, id: u32) {
        if self.peers.remove(&id).is_some() {
            tracing::info!("Removed peer {}", id);
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn is_reachable(&self, id: u32) -> bool {
        self.peers.get(&id).map(|entry| entry.active).unwrap_or(false)
    }

    /// Flips a peer's liveness. Activating also stamps the heartbeat clock.
    pub fn update_status(&self, id: u32, active: bool) {
        if let Some(mut entry) = self.peers.get_mut(&id) {
            entry.active = active;
            if active {
                entry.last_heartbeat_us = now_micros();
            }
            tracing::debug!(
                "Peer {} status updated: {}",
                id,
                if active { "active" } else { "inactive" }
            );
        }
    }

    pub fn endpoint(&self, id: u32) -> Option<(String, u16)> {
        self.peers
            .get(&id)
            .map(|entry| (entry.hostname.clone(), entry.port))
    }

    pub fn last_heartbeat_us(&self, id: u32) -> Option<u64> {
        self.peers.get(&id).map(|entry| entry.last_heartbeat_us)
    }

    /// Appended by the send path on every outbound message.
    pub fn record_send(&self, id: u32, latency_us: u64, ok: bool) {
        if let Some(mut entry) = self.peers.get_mut(&id) {
            entry.record_send(latency_us, ok);
        }
    }

    /// Mean of the retained latency ring, in milliseconds.
    pub fn average_latency_ms(&self, id: u32) -> f64 {
        self.peers
            .get(&id)
            .map(|entry| entry.average_latency_ms())
            .unwrap_or(0.0)
    }

    pub fn packet_loss_rate(&self, id: u32) -> f64 {
        self.peers
            .get(&id)
            .map(|entry| entry.packet_loss_rate())
            .unwrap_or(0.0)
    }

    /// Mean packet loss across all peers; the dispatcher reads this as the
    /// partition probability signal.
    pub fn average_packet_loss(&self) -> f64 {
        if self.peers.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .peers
            .iter()
            .map(|entry| entry.value().packet_loss_rate())
            .sum();
        total / self.peers.len() as f64
    }

    pub fn active_ids(&self) -> Vec<u32> {
        self.peers
            .iter()
            .filter(|entry| entry.value().active)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<u32> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.peers.iter().filter(|entry| entry.value().active).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
