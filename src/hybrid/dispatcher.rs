use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::chain::coordinator::ChainCoordinator;
use crate::hybrid::cache::ReadCache;
use crate::hybrid::config::{DispatcherConfig, PolicyTuning};
use crate::hybrid::types::{AdaptiveMetrics, WorkloadPattern};
use crate::message::types::{Message, MessageKind, ReplicationMode};
use crate::metrics::monitor::PerformanceMonitor;
use crate::quorum::coordinator::QuorumCoordinator;

/// EWMA smoothing applied to the observed request latency.
const LATENCY_SMOOTHING: f64 = 0.9;

/// Per-request dispatcher over the chain and quorum coordinators.
///
/// Owns the read cache and the policy state; everything else is shared
/// with the owning node through `Arc` handles.
pub struct HybridDispatcher {
    node_id: u32,
    chain: Arc<ChainCoordinator>,
    quorum: Arc<QuorumCoordinator>,
    monitor: Arc<PerformanceMonitor>,
    cache: Arc<ReadCache>,
    config: Mutex<DispatcherConfig>,
    current_mode: Mutex<ReplicationMode>,
    metrics: Mutex<AdaptiveMetrics>,

    reads: AtomicU64,
    writes: AtomicU64,
    chain_operations: AtomicU64,
    quorum_operations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    next_operation_id: AtomicU64,
    mode_switch_times_ms: Mutex<Vec<f64>>,
}

impl HybridDispatcher {
    pub fn new(
        node_id: u32,
        chain: Arc<ChainCoordinator>,
        quorum: Arc<QuorumCoordinator>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Arc<Self> {
        Self::with_config(node_id, chain, quorum, monitor, DispatcherConfig::default())
    }

    pub fn with_config(
        node_id: u32,
        chain: Arc<ChainCoordinator>,
        quorum: Arc<QuorumCoordinator>,
        monitor: Arc<PerformanceMonitor>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        chain.set_batching(config.request_batching);
        chain.set_fast_path(true);
        quorum.set_read_optimization(true);
        quorum.set_adaptive_quorum(true);

        let cache = Arc::new(ReadCache::new(config.cache_ttl));
        tracing::info!(
            "Hybrid dispatcher for node {} (chain of {}, quorum of {})",
            node_id,
            chain.chain_length(),
            quorum.member_count()
        );

        Arc::new(Self {
            node_id,
            chain,
            quorum,
            monitor,
            cache,
            config: Mutex::new(config),
            current_mode: Mutex::new(ReplicationMode::Hybrid),
            metrics: Mutex::new(AdaptiveMetrics::default()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            chain_operations: AtomicU64::new(0),
            quorum_operations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            next_operation_id: AtomicU64::new(0),
            mode_switch_times_ms: Mutex::new(Vec::new()),
        })
    }

    /// Serves a read: cache first, then the discipline the policy picks.
    pub async fn process_read(&self, request: &Message) -> Message {
        let started = Instant::now();
        let operation_id = self.next_operation_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.monitor
            .start_operation(operation_id, request.kind, &request.key, request.value.len());

        let caching = self.config.lock().expect("config mutex poisoned").caching;

        if caching {
            if let Some(value) = self.cache.try_read(&request.key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cache hit for key {:?}", request.key);

                let mut response =
                    Message::respond(request, MessageKind::ReadResponse, self.node_id);
                response.value = value;
                response.success = true;

                self.monitor
                    .end_operation(operation_id, true, ReplicationMode::Hybrid, 0);
                self.update_request_metrics(request.kind, started.elapsed());
                return response;
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let mode = self.decide_read_mode();
        let (response, executed, hops) = self.execute_read(mode, request).await;

        if response.success && caching {
            self.cache.update(&request.key, &response.value);
        }

        self.monitor
            .end_operation(operation_id, response.success, executed, hops);
        self.update_request_metrics(request.kind, started.elapsed());

        if self.config.lock().expect("config mutex poisoned").speculative_execution {
            self.start_speculative_read(request);
        }

        response
    }

    /// Serves a write: the cache entry dies before anything is dispatched.
    pub async fn process_write(&self, request: &Message) -> Message {
        let started = Instant::now();
        let operation_id = self.next_operation_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.monitor
            .start_operation(operation_id, request.kind, &request.key, request.value.len());

        self.cache.invalidate(&request.key);

        let mode = self.decide_write_mode();
        let (response, executed, hops) = self.execute_write(mode, request).await;

        self.monitor
            .end_operation(operation_id, response.success, executed, hops);
        self.update_request_metrics(request.kind, started.elapsed());

        response
    }

    async fn execute_read(
        &self,
        mode: ReplicationMode,
        request: &Message,
    ) -> (Message, ReplicationMode, u32) {
        let resolved = match mode {
            ReplicationMode::Hybrid => {
                let ratio = self
                    .metrics
                    .lock()
                    .expect("metrics mutex poisoned")
                    .read_write_ratio;
                if ratio > 2.0 {
                    ReplicationMode::ChainOnly
                } else {
                    ReplicationMode::QuorumOnly
                }
            }
            other => other,
        };

        match resolved {
            ReplicationMode::ChainOnly => {
                self.chain_operations.fetch_add(1, Ordering::Relaxed);
                let response = self.chain.process_read(request);
                let hops = self.chain.chain_length() as u32;
                (response, ReplicationMode::ChainOnly, hops)
            }
            _ => {
                self.quorum_operations.fetch_add(1, Ordering::Relaxed);
                let response = self.quorum.process_read(request).await;
                let hops = self.quorum.member_count() as u32;
                (response, ReplicationMode::QuorumOnly, hops)
            }
        }
    }

    async fn execute_write(
        &self,
        mode: ReplicationMode,
        request: &Message,
    ) -> (Message, ReplicationMode, u32) {
        let resolved = match mode {
            ReplicationMode::Hybrid => {
                let partition = self
                    .metrics
                    .lock()
                    .expect("metrics mutex poisoned")
                    .partition_probability;
                if partition > 0.3 {
                    ReplicationMode::ChainOnly
                } else {
                    ReplicationMode::QuorumOnly
                }
            }
            other => other,
        };

        match resolved {
            ReplicationMode::ChainOnly => {
                self.chain_operations.fetch_add(1, Ordering::Relaxed);
                let response = self.chain.process_write(request);
                let hops = self.chain.chain_length() as u32;
                (response, ReplicationMode::ChainOnly, hops)
            }
            _ => {
                self.quorum_operations.fetch_add(1, Ordering::Relaxed);
                let response = self.quorum.process_write(request).await;
                let hops = self.quorum.member_count() as u32;
                (response, ReplicationMode::QuorumOnly, hops)
            }
        }
    }

    /// Mode for a single read request.
    pub(crate) fn decide_read_mode(&self) -> ReplicationMode {
        let config = self.config.lock().expect("config mutex poisoned");
        if !config.adaptive_switching {
            return config.read_preference;
        }

        if config.intelligent_routing {
            let metrics = self.metrics.lock().expect("metrics mutex poisoned");
            if metrics.partition_probability > config.tuning.partition_risk {
                return ReplicationMode::ChainOnly;
            }
            if metrics.pattern == WorkloadPattern::ReadHeavy {
                return ReplicationMode::ChainOnly;
            }
        }

        config.read_preference
    }

    /// Mode for a single write request.
    pub(crate) fn decide_write_mode(&self) -> ReplicationMode {
        let config = self.config.lock().expect("config mutex poisoned");
        if !config.adaptive_switching {
            return config.write_preference;
        }

        if config.intelligent_routing {
            let pattern = self.metrics.lock().expect("metrics mutex poisoned").pattern;
            match pattern {
                WorkloadPattern::WriteHeavy => return ReplicationMode::QuorumOnly,
                WorkloadPattern::Bursty => return ReplicationMode::ChainOnly,
                _ => {}
            }
        }

        config.write_preference
    }

    /// Folds a full metrics snapshot into the policy state, reclassifies
    /// the workload pattern and switches the current mode when the scores
    /// separate beyond the switching threshold.
    pub fn update_workload_metrics(&self, metrics: AdaptiveMetrics) {
        let (adaptive, threshold) = {
            let config = self.config.lock().expect("config mutex poisoned");
            (config.adaptive_switching, config.switching_threshold)
        };

        let snapshot = {
            let mut current = self.metrics.lock().expect("metrics mutex poisoned");
            *current = metrics;
            current.pattern = analyze_workload_pattern(&current);
            current.clone()
        };

        if !adaptive {
            return;
        }

        let optimal = self.select_optimal_mode(&snapshot, threshold);
        let mut current_mode = self.current_mode.lock().expect("mode mutex poisoned");
        if optimal != *current_mode {
            let switch_started = Instant::now();
            *current_mode = optimal;
            let elapsed_ms = switch_started.elapsed().as_secs_f64() * 1000.0;

            self.mode_switch_times_ms
                .lock()
                .expect("switch mutex poisoned")
                .push(elapsed_ms);
            tracing::info!("Switched replication mode to {}", optimal);
        }
    }

    /// Scores both disciplines against the snapshot and keeps the current
    /// mode unless one side wins by more than the threshold.
    pub fn select_optimal_mode(&self, metrics: &AdaptiveMetrics, threshold: f64) -> ReplicationMode {
        let tuning = self
            .config
            .lock()
            .expect("config mutex poisoned")
            .tuning
            .clone();

        let (chain_score, quorum_score) = score_modes(metrics, &tuning, self.hybrid_efficiency());

        if chain_score > quorum_score + threshold {
            ReplicationMode::ChainOnly
        } else if quorum_score > chain_score + threshold {
            ReplicationMode::QuorumOnly
        } else {
            ReplicationMode::Hybrid
        }
    }

    fn update_request_metrics(&self, kind: MessageKind, elapsed: Duration) {
        if kind.is_read() {
            self.reads.fetch_add(1, Ordering::Relaxed);
        } else if kind.is_write() {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }

        let reads = self.reads.load(Ordering::Relaxed) as f64;
        let writes = self.writes.load(Ordering::Relaxed).max(1) as f64;
        let observed_ms = elapsed.as_secs_f64() * 1000.0;

        let mut metrics = self.metrics.lock().expect("metrics mutex poisoned");
        metrics.average_latency_ms =
            metrics.average_latency_ms * LATENCY_SMOOTHING + observed_ms * (1.0 - LATENCY_SMOOTHING);
        metrics.read_write_ratio = reads / writes;
    }

    fn start_speculative_read(&self, request: &Message) {
        // Hint only: warm the cache through the chain path off the hot path.
        let chain = self.chain.clone();
        let cache = self.cache.clone();
        let speculative = request.clone();
        tokio::spawn(async move {
            tracing::debug!("Speculative read for key {:?}", speculative.key);
            let response = chain.process_read(&speculative);
            if response.success {
                cache.update(&speculative.key, &response.value);
            }
        });
    }

    /// Composite of cache effectiveness and chain/quorum balance.
    pub fn hybrid_efficiency(&self) -> f64 {
        let chain_ops = self.chain_operations.load(Ordering::Relaxed);
        let quorum_ops = self.quorum_operations.load(Ordering::Relaxed);
        let total = chain_ops + quorum_ops;
        if total == 0 {
            return 0.0;
        }

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        let balance = chain_ops.min(quorum_ops) as f64 / total as f64;
        hit_rate * 0.4 + balance * 0.6
    }

    pub fn mode_switching_overhead_ms(&self) -> f64 {
        let times = self
            .mode_switch_times_ms
            .lock()
            .expect("switch mutex poisoned");
        if times.is_empty() {
            return 0.0;
        }
        times.iter().sum::<f64>() / times.len() as f64
    }

    /// Forces the chain discipline while a partition is suspected.
    pub fn handle_network_partition(&self) {
        let adaptive = self.config.lock().expect("config mutex poisoned").adaptive_switching;
        if adaptive {
            *self.current_mode.lock().expect("mode mutex poisoned") = ReplicationMode::ChainOnly;
            tracing::warn!("Network partition suspected, forcing chain replication");
        }
    }

    pub fn handle_node_failure(&self, failed_node: u32) {
        self.chain.handle_node_failure(failed_node);
        self.quorum.handle_node_failure(failed_node);

        let mut metrics = self.metrics.lock().expect("metrics mutex poisoned");
        metrics.active_nodes = metrics.active_nodes.saturating_sub(1).max(1);
        tracing::warn!("Node {} failed, coordinators updated", failed_node);
    }

    pub fn handle_node_recovery(&self, recovered_node: u32) {
        self.chain.handle_node_recovery(recovered_node);
        self.quorum.handle_node_recovery(recovered_node);

        let mut metrics = self.metrics.lock().expect("metrics mutex poisoned");
        metrics.active_nodes += 1;
        tracing::info!("Node {} recovered, coordinators updated", recovered_node);
    }

    pub fn current_mode(&self) -> ReplicationMode {
        *self.current_mode.lock().expect("mode mutex poisoned")
    }

    pub fn force_mode(&self, mode: ReplicationMode) {
        *self.current_mode.lock().expect("mode mutex poisoned") = mode;
    }

    pub fn current_metrics(&self) -> AdaptiveMetrics {
        self.metrics.lock().expect("metrics mutex poisoned").clone()
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn cache_update(&self, key: &str, value: &str) {
        self.cache.update(key, value);
    }

    pub fn set_adaptive_switching(&self, enabled: bool) {
        self.config.lock().expect("config mutex poisoned").adaptive_switching = enabled;
    }

    pub fn set_intelligent_routing(&self, enabled: bool) {
        self.config.lock().expect("config mutex poisoned").intelligent_routing = enabled;
    }

    pub fn set_load_balancing(&self, enabled: bool) {
        self.config.lock().expect("config mutex poisoned").load_balancing = enabled;
    }

    pub fn set_caching(&self, enabled: bool) {
        self.config.lock().expect("config mutex poisoned").caching = enabled;
    }

    pub fn set_speculative_execution(&self, enabled: bool) {
        self.config
            .lock()
            .expect("config mutex poisoned")
            .speculative_execution = enabled;
    }

    pub fn set_request_batching(&self, enabled: bool) {
        self.config.lock().expect("config mutex poisoned").request_batching = enabled;
        self.chain.set_batching(enabled);
    }

    pub fn set_switching_threshold(&self, threshold: f64) {
        self.config
            .lock()
            .expect("config mutex poisoned")
            .switching_threshold = threshold;
    }

    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.config.lock().expect("config mutex poisoned").cache_ttl = ttl;
        self.cache.set_ttl(ttl);
    }

    pub fn set_read_preference(&self, mode: ReplicationMode) {
        self.config.lock().expect("config mutex poisoned").read_preference = mode;
    }

    pub fn set_write_preference(&self, mode: ReplicationMode) {
        self.config.lock().expect("config mutex poisoned").write_preference = mode;
    }

    pub fn set_policy_tuning(&self, tuning: PolicyTuning) {
        self.config.lock().expect("config mutex poisoned").tuning = tuning;
    }
}

fn analyze_workload_pattern(metrics: &AdaptiveMetrics) -> WorkloadPattern {
    if metrics.read_write_ratio > 3.0 {
        WorkloadPattern::ReadHeavy
    } else if metrics.read_write_ratio < 0.5 {
        WorkloadPattern::WriteHeavy
    } else if metrics.throughput_ops_per_sec > metrics.average_latency_ms * 10.0 {
        WorkloadPattern::Bursty
    } else {
        WorkloadPattern::Balanced
    }
}

fn score_modes(metrics: &AdaptiveMetrics, tuning: &PolicyTuning, efficiency: f64) -> (f64, f64) {
    let mut chain_score = 0.0;
    let mut quorum_score = 0.0;

    if metrics.read_write_ratio > tuning.read_heavy_ratio {
        chain_score += tuning.ratio_weight;
    } else if metrics.read_write_ratio < tuning.write_heavy_ratio {
        quorum_score += tuning.ratio_weight;
    }

    if metrics.partition_probability > tuning.partition_risk {
        chain_score += tuning.partition_chain_weight;
    } else {
        quorum_score += tuning.partition_quorum_weight;
    }

    if metrics.average_latency_ms > tuning.latency_threshold_ms {
        if efficiency > 0.8 {
            chain_score += tuning.latency_weight;
        } else {
            quorum_score += tuning.latency_weight;
        }
    }

    if metrics.active_nodes < tuning.small_cluster {
        chain_score += tuning.cluster_chain_weight;
    } else {
        quorum_score += tuning.cluster_quorum_weight;
    }

    match metrics.pattern {
        WorkloadPattern::ReadHeavy => chain_score += tuning.pattern_weight,
        WorkloadPattern::WriteHeavy => quorum_score += tuning.pattern_weight,
        WorkloadPattern::Bursty => chain_score += tuning.bursty_weight,
        _ => {}
    }

    (chain_score, quorum_score)
}
