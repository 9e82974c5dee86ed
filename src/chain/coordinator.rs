use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::message::types::{Message, MessageKind};
use crate::network::transport::Transport;
use crate::storage::store::LocalStore;

/// Default number of writes collected before the head flushes a batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Pending-write accumulation used for the utilization gauge.
const PENDING_CAPACITY: usize = 100;

struct ChainState {
    /// Ordered node ids forming the chain, head first.
    order: Vec<u32>,
    /// Index of self in `order`, or `order.len()` when absent.
    my_position: usize,
    /// Forwarded writes awaiting a `CHAIN_ACK`, keyed by sequence.
    pending: HashMap<u32, Message>,
    /// Head-side write batch.
    batch: Vec<Message>,
}

impl ChainState {
    fn is_head(&self) -> bool {
        self.my_position == 0 && !self.order.is_empty()
    }

    fn is_tail(&self) -> bool {
        !self.order.is_empty() && self.my_position == self.order.len() - 1
    }

    fn successor(&self) -> Option<u32> {
        self.order.get(self.my_position + 1).copied()
    }

    fn predecessor(&self) -> Option<u32> {
        if self.my_position == 0 {
            return None;
        }
        self.order.get(self.my_position - 1).copied()
    }
}

/// Coordinator for the chain replication path.
pub struct ChainCoordinator {
    node_id: u32,
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    state: Mutex<ChainState>,
    batching_enabled: AtomicBool,
    batch_size: AtomicUsize,
    fast_path_enabled: AtomicBool,
}

impl ChainCoordinator {
    pub fn new(
        node_id: u32,
        store: Arc<LocalStore>,
        transport: Arc<dyn Transport>,
        chain_order: Vec<u32>,
    ) -> Arc<Self> {
        let my_position = find_position(node_id, &chain_order);
        tracing::info!(
            "Chain coordinator for node {} at position {} in chain of {}",
            node_id,
            my_position,
            chain_order.len()
        );

        Arc::new(Self {
            node_id,
            store,
            transport,
            state: Mutex::new(ChainState {
                order: chain_order,
                my_position,
                pending: HashMap::new(),
                batch: Vec::new(),
            }),
            batching_enabled: AtomicBool::new(false),
            batch_size: AtomicUsize::new(DEFAULT_BATCH_SIZE),
            fast_path_enabled: AtomicBool::new(true),
        })
    }

    pub fn set_batching(&self, enabled: bool) {
        self.batching_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_batch_size(&self, size: usize) {
        self.batch_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn set_fast_path(&self, enabled: bool) {
        self.fast_path_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_head(&self) -> bool {
        self.state.lock().expect("chain mutex poisoned").is_head()
    }

    pub fn is_tail(&self) -> bool {
        self.state.lock().expect("chain mutex poisoned").is_tail()
    }

    pub fn chain_length(&self) -> usize {
        self.state.lock().expect("chain mutex poisoned").order.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("chain mutex poisoned").pending.len()
    }

    /// Pending-write pressure in `[0, 1]`.
    pub fn chain_utilization(&self) -> f64 {
        let pending = self.pending_count() as f64;
        (pending / PENDING_CAPACITY as f64).min(1.0)
    }

    /// Serves a read at the tail; anywhere else the request is forwarded to
    /// the tail and the local response reports `success = false` (the real
    /// response arrives out-of-band).
    pub fn process_read(&self, request: &Message) -> Message {
        let state = self.state.lock().expect("chain mutex poisoned");
        let mut response = Message::respond(request, MessageKind::ReadResponse, self.node_id);

        if state.order.is_empty() {
            tracing::error!("Chain is empty, cannot serve read for key {:?}", request.key);
            return response;
        }

        if !state.is_tail() {
            let tail = *state.order.last().expect("non-empty chain");
            if let Err(e) = self.transport.send(tail, request) {
                tracing::warn!("Failed to forward read to tail node {}: {}", tail, e);
            } else {
                tracing::debug!("Forwarded read for key {:?} to tail node {}", request.key, tail);
            }
            return response;
        }

        if self.should_use_fast_path(request) {
            tracing::debug!("Fast path read for key {:?}", request.key);
        }

        match self.store.read(&request.key) {
            Some(value) => {
                response.value = value;
                response.success = true;
            }
            None => {
                tracing::debug!("Chain read miss for key {:?}", request.key);
            }
        }

        response
    }

    /// Runs a write through the chain. Non-head nodes forward to the head
    /// and report the forward as success; the head applies (or batches) and
    /// pushes a `CHAIN_FORWARD` to its successor.
    pub fn process_write(&self, request: &Message) -> Message {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        let mut response = Message::respond(request, MessageKind::WriteResponse, self.node_id);

        if state.order.is_empty() {
            tracing::error!("Chain is empty, cannot serve write for key {:?}", request.key);
            return response;
        }

        if !state.is_head() {
            let head = state.order[0];
            if let Err(e) = self.transport.send(head, request) {
                tracing::warn!("Failed to forward write to head node {}: {}", head, e);
                return response;
            }
            tracing::debug!("Forwarded write for key {:?} to head node {}", request.key, head);
            response.success = true;
            return response;
        }

        let batch_size = self.batch_size.load(Ordering::Relaxed);
        if self.batching_enabled.load(Ordering::Relaxed) && state.batch.len() < batch_size {
            state.batch.push(request.clone());
            if state.batch.len() >= batch_size {
                self.flush_locked(&mut state);
            }
            response.success = true;
            return response;
        }

        self.store.write(&request.key, &request.value);

        let mut success = true;
        if state.order.len() > 1 {
            success = self.forward_locked(&mut state, request);
        }

        response.success = success;
        response
    }

    /// Applies a forwarded write and pushes it onward; the tail answers
    /// with a `CHAIN_ACK` instead.
    pub fn handle_forward(&self, message: &Message) {
        let mut state = self.state.lock().expect("chain mutex poisoned");

        self.store.write(&message.key, &message.value);
        tracing::debug!(
            "Applied forwarded write for key {:?} (sequence {})",
            message.key,
            message.sequence
        );

        self.forward_locked(&mut state, message);
    }

    /// Clears the matching pending entry and pushes the acknowledgement
    /// upstream; the head answers the original sender when it was remote.
    pub fn handle_ack(&self, message: &Message) {
        let mut state = self.state.lock().expect("chain mutex poisoned");

        let Some(original) = state.pending.remove(&message.sequence) else {
            tracing::debug!("Ack for unknown sequence {}", message.sequence);
            return;
        };

        if let Some(predecessor) = state.predecessor() {
            let mut ack = message.clone();
            ack.sender = self.node_id;
            ack.receiver = predecessor;
            if let Err(e) = self.transport.send(predecessor, &ack) {
                tracing::warn!("Failed to propagate ack to node {}: {}", predecessor, e);
            }
        } else if original.sender != self.node_id {
            let mut ack = message.clone();
            ack.sender = self.node_id;
            ack.receiver = original.sender;
            if let Err(e) = self.transport.send(original.sender, &ack) {
                tracing::warn!("Failed to ack originator node {}: {}", original.sender, e);
            }
        }
    }

    /// Drains a partially-filled batch; driven by the periodic flusher.
    pub fn flush_batch(&self) {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        if !state.batch.is_empty() {
            self.flush_locked(&mut state);
        }
    }

    pub fn update_chain_order(&self, new_order: Vec<u32>) {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        state.order = new_order;
        state.my_position = find_position(self.node_id, &state.order);
        self.validate_integrity(&state);
        tracing::info!(
            "Chain order updated, new position {} of {}",
            state.my_position,
            state.order.len()
        );
    }

    pub fn handle_node_failure(&self, failed_node: u32) {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        let before = state.order.len();
        state.order.retain(|&id| id != failed_node);

        if state.order.len() != before {
            state.my_position = find_position(self.node_id, &state.order);
            tracing::warn!("Node {} failed, removed from chain", failed_node);
            self.validate_integrity(&state);
        }
    }

    pub fn handle_node_recovery(&self, recovered_node: u32) {
        let mut state = self.state.lock().expect("chain mutex poisoned");
        if !state.order.contains(&recovered_node) {
            state.order.push(recovered_node);
            state.my_position = find_position(self.node_id, &state.order);
            tracing::info!("Node {} recovered, appended to chain", recovered_node);
        }
    }

    /// Forwards `message` to the successor as a `CHAIN_FORWARD`, recording
    /// it as pending; at the tail, emits the `CHAIN_ACK` instead.
    fn forward_locked(&self, state: &mut ChainState, message: &Message) -> bool {
        let Some(successor) = state.successor() else {
            return self.send_ack_locked(state, message);
        };

        let mut forward = message.clone();
        forward.kind = MessageKind::ChainForward;
        forward.sender = self.node_id;
        forward.receiver = successor;

        if let Err(e) = self.transport.send(successor, &forward) {
            tracing::warn!("Failed to forward write to node {}: {}", successor, e);
            return false;
        }

        state.pending.insert(message.sequence, message.clone());
        tracing::debug!(
            "Forwarded write (sequence {}) to successor node {}",
            message.sequence,
            successor
        );
        true
    }

    fn send_ack_locked(&self, state: &ChainState, original: &Message) -> bool {
        let mut ack = Message::respond(original, MessageKind::ChainAck, self.node_id);
        ack.success = true;

        let target = match state.predecessor() {
            Some(predecessor) => predecessor,
            None => {
                if original.sender == self.node_id {
                    return true;
                }
                original.sender
            }
        };

        ack.receiver = target;
        if let Err(e) = self.transport.send(target, &ack) {
            tracing::warn!("Failed to send ack to node {}: {}", target, e);
            return false;
        }
        tracing::debug!("Sent ack for sequence {} to node {}", original.sequence, target);
        true
    }

    fn flush_locked(&self, state: &mut ChainState) {
        let batch = std::mem::take(&mut state.batch);
        tracing::debug!("Flushing write batch of {}", batch.len());

        for message in &batch {
            self.store.write(&message.key, &message.value);
        }

        if let Some(successor) = state.successor() {
            for message in &batch {
                let mut forward = message.clone();
                forward.kind = MessageKind::ChainForward;
                forward.sender = self.node_id;
                forward.receiver = successor;
                if let Err(e) = self.transport.send(successor, &forward) {
                    tracing::warn!("Failed to forward batched write to node {}: {}", successor, e);
                }
            }
        }
    }

    fn should_use_fast_path(&self, request: &Message) -> bool {
        self.fast_path_enabled.load(Ordering::Relaxed)
            && request.kind.is_read()
            && !request.key.is_empty()
    }

    fn validate_integrity(&self, state: &ChainState) {
        if state.order.is_empty() {
            tracing::error!("Chain integrity violated: chain is empty");
        }
    }
}

fn find_position(node_id: u32, order: &[u32]) -> usize {
    match order.iter().position(|&id| id == node_id) {
        Some(position) => position,
        None => {
            if !order.is_empty() {
                tracing::warn!("Node {} not found in chain order", node_id);
            }
            order.len()
        }
    }
}
