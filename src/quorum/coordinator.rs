use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::message::types::{now_micros, Message, MessageKind};
use crate::network::transport::Transport;
use crate::storage::store::LocalStore;

/// Default proposal deadline.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Consensus timing samples retained for the average.
const TIMING_WINDOW: usize = 1000;

/// Interval of the expired-proposal sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumPhase {
    Prepare,
    Accept,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProposalOp {
    Read,
    Write,
}

struct ProposalState {
    phase: QuorumPhase,
    op: ProposalOp,
    key: String,
    value: String,
    promised: HashSet<u32>,
    accepted: HashSet<u32>,
    start_us: u64,
    notify: Arc<Notify>,
}

struct QuorumInner {
    members: Vec<u32>,
    quorum_size: usize,
    proposals: HashMap<u64, ProposalState>,
}

fn natural_majority(member_count: usize) -> usize {
    member_count / 2 + 1
}

/// Coordinator for the majority-quorum replication path.
pub struct QuorumCoordinator {
    node_id: u32,
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    inner: Mutex<QuorumInner>,
    next_proposal: AtomicU64,
    adaptive_quorum: AtomicBool,
    read_optimization: AtomicBool,
    operation_timeout_ms: AtomicU64,
    successful_consensus: AtomicU64,
    failed_consensus: AtomicU64,
    consensus_times_us: Mutex<VecDeque<u64>>,
}

impl QuorumCoordinator {
    pub fn new(
        node_id: u32,
        store: Arc<LocalStore>,
        transport: Arc<dyn Transport>,
        members: Vec<u32>,
    ) -> Arc<Self> {
        let quorum_size = natural_majority(members.len());
        tracing::info!(
            "Quorum coordinator for node {} with {} members, quorum size {}",
            node_id,
            members.len(),
            quorum_size
        );

        Arc::new(Self {
            node_id,
            store,
            transport,
            inner: Mutex::new(QuorumInner {
                members,
                quorum_size,
                proposals: HashMap::new(),
            }),
            next_proposal: AtomicU64::new(0),
            adaptive_quorum: AtomicBool::new(false),
            read_optimization: AtomicBool::new(true),
            operation_timeout_ms: AtomicU64::new(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64),
            successful_consensus: AtomicU64::new(0),
            failed_consensus: AtomicU64::new(0),
            consensus_times_us: Mutex::new(VecDeque::with_capacity(TIMING_WINDOW)),
        })
    }

    pub fn set_adaptive_quorum(&self, enabled: bool) {
        self.adaptive_quorum.store(enabled, Ordering::Relaxed);
    }

    pub fn set_read_optimization(&self, enabled: bool) {
        self.read_optimization.store(enabled, Ordering::Relaxed);
    }

    pub fn set_operation_timeout(&self, timeout: Duration) {
        self.operation_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn quorum_size(&self) -> usize {
        self.inner.lock().expect("quorum mutex poisoned").quorum_size
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().expect("quorum mutex poisoned").members.len()
    }

    pub fn is_in_quorum(&self, node_id: u32) -> bool {
        self.inner
            .lock()
            .expect("quorum mutex poisoned")
            .members
            .contains(&node_id)
    }

    pub fn active_proposal_count(&self) -> usize {
        self.inner.lock().expect("quorum mutex poisoned").proposals.len()
    }

    pub fn failed_consensus_count(&self) -> u64 {
        self.failed_consensus.load(Ordering::Relaxed)
    }

    pub fn consensus_success_rate(&self) -> f64 {
        let successes = self.successful_consensus.load(Ordering::Relaxed);
        let failures = self.failed_consensus.load(Ordering::Relaxed);
        let total = successes + failures;
        if total == 0 {
            return 0.0;
        }
        successes as f64 / total as f64
    }

    pub fn average_consensus_time_ms(&self) -> f64 {
        let times = self.consensus_times_us.lock().expect("timing mutex poisoned");
        if times.is_empty() {
            return 0.0;
        }
        let total: u64 = times.iter().sum();
        total as f64 / times.len() as f64 / 1000.0
    }

    /// Serves a read. Single-member quorums and the read-optimisation fast
    /// path answer from the local store; otherwise a prepare round must
    /// reach a majority before the store is consulted.
    pub async fn process_read(&self, request: &Message) -> Message {
        let mut response = Message::respond(request, MessageKind::ReadResponse, self.node_id);

        if self.member_count() <= 1 {
            match self.store.read(&request.key) {
                Some(value) => {
                    response.value = value;
                    response.success = true;
                    self.successful_consensus.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.failed_consensus.fetch_add(1, Ordering::Relaxed);
                }
            }
            return response;
        }

        if self.read_optimization.load(Ordering::Relaxed) && !request.key.is_empty() {
            if let Some(value) = self.store.read(&request.key) {
                tracing::debug!("Fast path read for key {:?}", request.key);
                response.value = value;
                response.success = true;
                return response;
            }
        }

        let start_us = now_micros();
        let (proposal, notify) = self.open_proposal(ProposalOp::Read, &request.key, "");
        self.broadcast_prepare(proposal, &request.key);

        if self.await_proposal(proposal, &notify, |state, quorum_size| {
            state.promised.len() >= quorum_size
        })
        .await
        {
            self.erase_proposal(proposal);
            match self.store.read(&request.key) {
                Some(value) => {
                    response.value = value;
                    response.success = true;
                    self.record_success(start_us);
                    tracing::debug!("Quorum read successful for key {:?}", request.key);
                }
                None => {
                    self.failed_consensus.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Quorum read miss for key {:?}", request.key);
                }
            }
            return response;
        }

        self.erase_proposal(proposal);
        self.failed_consensus.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Quorum read failed for key {:?}", request.key);
        response
    }

    /// Runs a write through prepare and accept rounds; the value is applied
    /// locally only once a majority has accepted.
    pub async fn process_write(&self, request: &Message) -> Message {
        let mut response = Message::respond(request, MessageKind::WriteResponse, self.node_id);

        if self.member_count() <= 1 {
            self.store.write(&request.key, &request.value);
            response.success = true;
            self.successful_consensus.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Single-node quorum write for key {:?}", request.key);
            return response;
        }

        let start_us = now_micros();
        let (proposal, notify) =
            self.open_proposal(ProposalOp::Write, &request.key, &request.value);
        self.broadcast_prepare(proposal, &request.key);

        if self.await_proposal(proposal, &notify, |state, quorum_size| {
            state.phase == QuorumPhase::Commit && state.accepted.len() >= quorum_size
        })
        .await
        {
            self.erase_proposal(proposal);
            self.store.write(&request.key, &request.value);
            self.record_success(start_us);
            response.success = true;
            tracing::debug!("Quorum write successful for key {:?}", request.key);
            return response;
        }

        self.erase_proposal(proposal);
        self.failed_consensus.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Quorum write failed for key {:?}", request.key);
        response
    }

    /// Acceptor, phase 1: always answers with a positive promise. A
    /// stricter variant would reject proposal numbers below the highest
    /// already promised; the lenient reply is the contract here.
    pub fn handle_prepare(&self, message: &Message) {
        let mut promise = Message::respond(message, MessageKind::QuorumPromise, self.node_id);
        promise.success = true;

        if let Err(e) = self.transport.send(message.sender, &promise) {
            tracing::warn!("Failed to send promise to node {}: {}", message.sender, e);
        } else {
            tracing::debug!("Promised proposal {} to node {}", message.sequence, message.sender);
        }
    }

    /// Proposer: records a promise; a majority moves write proposals into
    /// the accept phase and wakes read proposers.
    pub fn handle_promise(&self, message: &Message) {
        let proposal = u64::from(message.sequence);
        let mut accept_broadcast: Option<(String, String)> = None;

        {
            let mut inner = self.inner.lock().expect("quorum mutex poisoned");
            let quorum_size = inner.quorum_size;
            let node_id = self.node_id;

            let Some(state) = inner.proposals.get_mut(&proposal) else {
                tracing::debug!("Promise for unknown proposal {}", proposal);
                return;
            };

            state.promised.insert(message.sender);
            if state.promised.len() < quorum_size {
                return;
            }

            match state.op {
                ProposalOp::Write if state.phase == QuorumPhase::Prepare => {
                    state.phase = QuorumPhase::Accept;
                    // The proposer itself will apply the value at commit.
                    state.accepted.insert(node_id);
                    accept_broadcast = Some((state.key.clone(), state.value.clone()));
                }
                _ => {}
            }
            state.notify.notify_one();
        }

        if let Some((key, value)) = accept_broadcast {
            self.broadcast_accept(proposal, &key, &value);
        }
    }

    /// Acceptor, phase 2: applies the value and confirms.
    pub fn handle_accept(&self, message: &Message) {
        self.store.write(&message.key, &message.value);

        let mut accepted = Message::respond(message, MessageKind::QuorumAccepted, self.node_id);
        accepted.success = true;

        if let Err(e) = self.transport.send(message.sender, &accepted) {
            tracing::warn!("Failed to send accepted to node {}: {}", message.sender, e);
        } else {
            tracing::debug!("Accepted proposal {} from node {}", message.sequence, message.sender);
        }
    }

    /// Proposer: records an acceptance; a majority commits the proposal.
    pub fn handle_accepted(&self, message: &Message) {
        let proposal = u64::from(message.sequence);
        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        let quorum_size = inner.quorum_size;

        let Some(state) = inner.proposals.get_mut(&proposal) else {
            tracing::debug!("Accepted for unknown proposal {}", proposal);
            return;
        };

        state.accepted.insert(message.sender);
        if state.accepted.len() >= quorum_size {
            if state.phase != QuorumPhase::Commit {
                state.phase = QuorumPhase::Commit;
                tracing::debug!("Consensus reached for proposal {}", proposal);
            }
            state.notify.notify_one();
        }
    }

    pub fn update_quorum_members(&self, new_members: Vec<u32>) {
        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        inner.quorum_size = natural_majority(new_members.len());
        inner.members = new_members;
        tracing::info!(
            "Quorum members updated: {} members, quorum size {}",
            inner.members.len(),
            inner.quorum_size
        );
    }

    /// Removes a failed member and recomputes the natural majority. Active
    /// proposals are left to finish under the new size or age out.
    pub fn handle_node_failure(&self, failed_node: u32) {
        {
            let mut inner = self.inner.lock().expect("quorum mutex poisoned");
            let before = inner.members.len();
            inner.members.retain(|&id| id != failed_node);
            if inner.members.len() == before {
                return;
            }
            inner.quorum_size = natural_majority(inner.members.len());
            tracing::warn!(
                "Node {} failed, removed from quorum (size now {})",
                failed_node,
                inner.quorum_size
            );
        }

        if self.adaptive_quorum.load(Ordering::Relaxed) {
            self.adjust_quorum_size_based_on_load();
        }
    }

    pub fn handle_node_recovery(&self, recovered_node: u32) {
        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        if !inner.members.contains(&recovered_node) {
            inner.members.push(recovered_node);
            inner.quorum_size = natural_majority(inner.members.len());
            tracing::info!(
                "Node {} recovered, added to quorum (size now {})",
                recovered_node,
                inner.quorum_size
            );
        }
    }

    /// Resizes the majority threshold from the measured success rate: a
    /// struggling quorum grows (up to N), a comfortable one shrinks (never
    /// below 3). Clusters under three members keep the natural rule.
    pub fn adjust_quorum_size_based_on_load(&self) {
        let rate = self.consensus_success_rate();
        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        let member_count = inner.members.len();
        if member_count < 3 {
            return;
        }

        let natural = natural_majority(member_count);
        let optimal = if rate < 0.80 {
            (natural + 1).min(member_count)
        } else if rate > 0.95 {
            (natural - 1).max(3)
        } else {
            natural
        };

        if optimal != inner.quorum_size {
            inner.quorum_size = optimal;
            tracing::info!("Adaptive quorum size adjusted to {}", optimal);
        }
    }

    /// Discards proposals older than the operation timeout, waking any
    /// proposer still parked on them.
    pub fn cleanup_expired_proposals(&self) {
        let timeout_us = self.operation_timeout_ms.load(Ordering::Relaxed) * 1000;
        let now = now_micros();

        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        inner.proposals.retain(|proposal, state| {
            let expired = now.saturating_sub(state.start_us) > timeout_us;
            if expired {
                tracing::debug!("Cleaning up expired proposal {}", proposal);
                state.notify.notify_one();
            }
            !expired
        });
    }

    /// Spawns the periodic expired-proposal sweep.
    pub fn start_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let coordinator = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => coordinator.cleanup_expired_proposals(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn open_proposal(&self, op: ProposalOp, key: &str, value: &str) -> (u64, Arc<Notify>) {
        let proposal = self.next_proposal.fetch_add(1, Ordering::Relaxed) + 1;
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().expect("quorum mutex poisoned");
        let mut promised = HashSet::new();
        // The proposer promises its own proposal.
        promised.insert(self.node_id);

        inner.proposals.insert(
            proposal,
            ProposalState {
                phase: QuorumPhase::Prepare,
                op,
                key: key.to_string(),
                value: value.to_string(),
                promised,
                accepted: HashSet::new(),
                start_us: now_micros(),
                notify: notify.clone(),
            },
        );

        (proposal, notify)
    }

    fn erase_proposal(&self, proposal: u64) {
        self.inner
            .lock()
            .expect("quorum mutex poisoned")
            .proposals
            .remove(&proposal);
    }

    /// Waits until `done` holds for the proposal or its deadline passes.
    /// Wakeups come from the message handlers through the proposal's
    /// `Notify`; the sweep also wakes parked proposers.
    async fn await_proposal<F>(&self, proposal: u64, notify: &Arc<Notify>, done: F) -> bool
    where
        F: Fn(&ProposalState, usize) -> bool,
    {
        let timeout = Duration::from_millis(self.operation_timeout_ms.load(Ordering::Relaxed));
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            {
                let inner = self.inner.lock().expect("quorum mutex poisoned");
                match inner.proposals.get(&proposal) {
                    Some(state) => {
                        if done(state, inner.quorum_size) {
                            return true;
                        }
                    }
                    // Swept away under us.
                    None => return false,
                }
            }

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return false;
            }
        }
    }

    fn broadcast_prepare(&self, proposal: u64, key: &str) {
        let targets = {
            let inner = self.inner.lock().expect("quorum mutex poisoned");
            if self.adaptive_quorum.load(Ordering::Relaxed) {
                // Optimal subset: the first quorum_size members.
                inner
                    .members
                    .iter()
                    .take(inner.quorum_size)
                    .copied()
                    .collect::<Vec<_>>()
            } else {
                inner.members.clone()
            }
        };

        let mut prepare = Message::request(MessageKind::QuorumPrepare, self.node_id, key, "");
        prepare.sequence = proposal as u32;

        for target in targets {
            if target == self.node_id {
                continue;
            }
            prepare.receiver = target;
            if let Err(e) = self.transport.send(target, &prepare) {
                tracing::warn!("Failed to send prepare to node {}: {}", target, e);
            }
        }
        tracing::debug!("Sent prepare messages for proposal {}", proposal);
    }

    fn broadcast_accept(&self, proposal: u64, key: &str, value: &str) {
        let targets = {
            let inner = self.inner.lock().expect("quorum mutex poisoned");
            inner.members.clone()
        };

        let mut accept = Message::request(MessageKind::QuorumAccept, self.node_id, key, value);
        accept.sequence = proposal as u32;

        for target in targets {
            if target == self.node_id {
                continue;
            }
            accept.receiver = target;
            if let Err(e) = self.transport.send(target, &accept) {
                tracing::warn!("Failed to send accept to node {}: {}", target, e);
            }
        }
        tracing::debug!("Sent accept messages for proposal {}", proposal);
    }

    fn record_success(&self, start_us: u64) {
        self.successful_consensus.fetch_add(1, Ordering::Relaxed);
        let mut times = self.consensus_times_us.lock().expect("timing mutex poisoned");
        if times.len() == TIMING_WINDOW {
            times.pop_front();
        }
        times.push_back(now_micros().saturating_sub(start_us));
    }

    #[cfg(test)]
    pub(crate) fn seed_consensus_counters(&self, successes: u64, failures: u64) {
        self.successful_consensus.store(successes, Ordering::Relaxed);
        self.failed_consensus.store(failures, Ordering::Relaxed);
    }
}
