use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chain::coordinator::ChainCoordinator;
use crate::hybrid::dispatcher::HybridDispatcher;
use crate::hybrid::types::AdaptiveMetrics;
use crate::message::types::{Message, MessageKind, ReplicationMode};
use crate::metrics::monitor::PerformanceMonitor;
use crate::network::heartbeat::HeartbeatService;
use crate::network::peers::PeerDirectory;
use crate::network::transport::{RecordingTransport, Transport};
use crate::quorum::coordinator::QuorumCoordinator;
use crate::storage::store::LocalStore;

/// Period of the head-side batch flusher.
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Period of the system-stats refresh feeding the policy engine.
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// One replicated-store node: ownership root of every subsystem.
pub struct Node {
    pub id: u32,
    store: Arc<LocalStore>,
    peers: Arc<PeerDirectory>,
    transport: Arc<dyn Transport>,
    chain: Arc<ChainCoordinator>,
    quorum: Arc<QuorumCoordinator>,
    dispatcher: Arc<HybridDispatcher>,
    monitor: Arc<PerformanceMonitor>,
    heartbeat: Arc<HeartbeatService>,

    next_sequence: AtomicU32,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Wires a node over an already-populated peer directory and a raw
    /// transport. The transport is wrapped so every send feeds the peer
    /// latency history.
    pub fn new(
        id: u32,
        cluster_nodes: Vec<u32>,
        raw_transport: Arc<dyn Transport>,
        inbound: mpsc::UnboundedReceiver<String>,
        peers: Arc<PeerDirectory>,
    ) -> Arc<Self> {
        let transport: Arc<dyn Transport> =
            RecordingTransport::new(raw_transport, peers.clone());
        let store = Arc::new(LocalStore::new());
        let monitor = Arc::new(PerformanceMonitor::new());

        let chain = ChainCoordinator::new(id, store.clone(), transport.clone(), cluster_nodes.clone());
        let quorum = QuorumCoordinator::new(id, store.clone(), transport.clone(), cluster_nodes);
        let dispatcher = HybridDispatcher::new(id, chain.clone(), quorum.clone(), monitor.clone());

        let heartbeat = HeartbeatService::new(id, peers.clone(), transport.clone());
        let failure_dispatcher = dispatcher.clone();
        heartbeat.on_status_change(move |peer, active| {
            if active {
                failure_dispatcher.handle_node_recovery(peer);
            } else {
                failure_dispatcher.handle_node_failure(peer);
            }
        });

        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            id,
            store,
            peers,
            transport,
            chain,
            quorum,
            dispatcher,
            monitor,
            heartbeat,
            next_sequence: AtomicU32::new(0),
            inbound: Mutex::new(Some(inbound)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the inbound message loop and all periodic tasks.
    pub fn start(self: Arc<Self>) {
        let shutdown = self.shutdown_tx.subscribe();

        let inbound = self
            .inbound
            .lock()
            .expect("node mutex poisoned")
            .take()
            .expect("node already started");
        let mut handles = Vec::new();

        // Single consumer draining the inbound frame queue.
        let node = self.clone();
        let mut loop_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut inbound = inbound;
            loop {
                tokio::select! {
                    maybe_frame = inbound.recv() => {
                        let Some(frame) = maybe_frame else { break };
                        match Message::deserialize(&frame) {
                            Ok(message) => node.dispatch_message(message).await,
                            Err(e) => tracing::warn!("Dropping malformed message: {}", e),
                        }
                    }
                    _ = loop_shutdown.changed() => break,
                }
            }
            tracing::info!("Message loop for node {} drained", node.id);
        }));

        // Head-side batch flusher.
        let chain = self.chain.clone();
        let mut flush_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BATCH_FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => chain.flush_batch(),
                    _ = flush_shutdown.changed() => break,
                }
            }
        }));

        // Metrics refresh feeding the policy engine.
        let node = self.clone();
        let mut metrics_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => node.refresh_metrics(),
                    _ = metrics_shutdown.changed() => break,
                }
            }
        }));

        self.quorum.clone().start_sweeper(shutdown.clone());
        self.heartbeat.clone().start(shutdown);

        self.tasks.lock().expect("node mutex poisoned").extend(handles);
        tracing::info!("Node {} started", self.id);
    }

    /// Stops heartbeats, drains the message loop and joins the workers.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> =
            self.tasks.lock().expect("node mutex poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Node {} stopped", self.id);
    }

    /// Client read through the dispatcher.
    pub async fn read(&self, key: &str) -> Message {
        let request = self.next_request(MessageKind::ReadRequest, key, "");
        self.dispatcher.process_read(&request).await
    }

    /// Client write through the dispatcher.
    pub async fn write(&self, key: &str, value: &str) -> Message {
        let request = self.next_request(MessageKind::WriteRequest, key, value);
        self.dispatcher.process_write(&request).await
    }

    /// Deletes are local-store only; neither replication path carries them.
    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    pub fn chain(&self) -> &Arc<ChainCoordinator> {
        &self.chain
    }

    pub fn quorum(&self) -> &Arc<QuorumCoordinator> {
        &self.quorum
    }

    pub fn dispatcher(&self) -> &Arc<HybridDispatcher> {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatService> {
        &self.heartbeat
    }

    fn next_request(&self, kind: MessageKind, key: &str, value: &str) -> Message {
        let mut request = Message::request(kind, self.id, key, value);
        request.sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        request
    }

    /// Routes one decoded inbound message to its handler.
    async fn dispatch_message(&self, message: Message) {
        tracing::debug!(
            "Node {} handling {:?} from node {}",
            self.id,
            message.kind,
            message.sender
        );

        match message.kind {
            MessageKind::Heartbeat => self.heartbeat.handle_heartbeat(message.sender),

            // Requests arriving over the wire are chain routing hops: reads
            // travel to the tail, writes to the head.
            MessageKind::ReadRequest => {
                let response = self.chain.process_read(&message);
                if self.chain.is_tail() && message.sender != self.id {
                    self.send_response(message.sender, response);
                }
            }
            MessageKind::WriteRequest => {
                // The eventual CHAIN_ACK confirms the write upstream.
                let _ = self.chain.process_write(&message);
            }
            MessageKind::ChainForward => self.chain.handle_forward(&message),
            MessageKind::ChainAck => self.chain.handle_ack(&message),
            MessageKind::ChainUpdate => self.chain.update_chain_order(message.targets.clone()),

            MessageKind::QuorumPrepare => self.quorum.handle_prepare(&message),
            MessageKind::QuorumPromise => self.quorum.handle_promise(&message),
            MessageKind::QuorumAccept => self.quorum.handle_accept(&message),
            MessageKind::QuorumAccepted => self.quorum.handle_accepted(&message),
            MessageKind::QuorumCommit | MessageKind::QuorumAbort => {
                tracing::debug!("Ignoring reserved quorum message {:?}", message.kind);
            }

            MessageKind::NodeFailure => {
                if let Some(&failed) = message.targets.first() {
                    self.peers.update_status(failed, false);
                    self.dispatcher.handle_node_failure(failed);
                }
            }
            MessageKind::NodeRecovery => {
                if let Some(&recovered) = message.targets.first() {
                    self.peers.update_status(recovered, true);
                    self.dispatcher.handle_node_recovery(recovered);
                }
            }

            MessageKind::ModeSwitch => {
                match message.value.parse::<u8>().ok().and_then(ReplicationMode::from_u8) {
                    Some(mode) => self.dispatcher.force_mode(mode),
                    None => tracing::warn!("Ignoring mode switch with value {:?}", message.value),
                }
            }
            MessageKind::CacheUpdate => {
                self.dispatcher.cache_update(&message.key, &message.value);
            }

            MessageKind::ReadResponse | MessageKind::WriteResponse => {
                tracing::debug!(
                    "Response for sequence {} from node {}: success={}",
                    message.sequence,
                    message.sender,
                    message.success
                );
            }
            MessageKind::BatchRequest | MessageKind::BatchResponse => {
                tracing::debug!("Ignoring reserved batch message {:?}", message.kind);
            }
        }
    }

    fn send_response(&self, target: u32, mut response: Message) {
        response.receiver = target;
        if let Err(e) = self.transport.send(target, &response) {
            tracing::warn!("Failed to send response to node {}: {}", target, e);
        }
    }

    /// Builds the adaptive snapshot and hands it to the policy engine.
    fn refresh_metrics(&self) {
        self.monitor.update_system_stats();

        let current = self.dispatcher.current_metrics();
        let snapshot = AdaptiveMetrics {
            read_write_ratio: current.read_write_ratio,
            average_latency_ms: current.average_latency_ms,
            throughput_ops_per_sec: self.monitor.throughput(),
            partition_probability: self.peers.average_packet_loss(),
            active_nodes: self.peers.active_count() + 1,
            pattern: current.pattern,
        };
        self.dispatcher.update_workload_metrics(snapshot);
    }
}
