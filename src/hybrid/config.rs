use std::time::Duration;

use crate::hybrid::cache::DEFAULT_CACHE_TTL;
use crate::message::types::ReplicationMode;

/// Weights and thresholds of the mode-scoring policy.
///
/// The defaults reproduce the tuned values the policy shipped with; they
/// are exposed so deployments can reweigh the factors without code changes.
#[derive(Debug, Clone)]
pub struct PolicyTuning {
    /// Read/write ratio above which a workload counts as read-heavy.
    pub read_heavy_ratio: f64,
    /// Read/write ratio below which a workload counts as write-heavy.
    pub write_heavy_ratio: f64,
    /// Partition probability above which the chain is favoured.
    pub partition_risk: f64,
    /// Average latency (ms) above which historical efficiency decides.
    pub latency_threshold_ms: f64,
    /// Cluster size below which the chain is favoured.
    pub small_cluster: usize,
    /// Score for a decisive read/write ratio.
    pub ratio_weight: f64,
    /// Chain score under partition risk.
    pub partition_chain_weight: f64,
    /// Quorum score when the network looks healthy.
    pub partition_quorum_weight: f64,
    /// Score granted by the latency factor.
    pub latency_weight: f64,
    /// Chain score for small clusters.
    pub cluster_chain_weight: f64,
    /// Quorum score for larger clusters.
    pub cluster_quorum_weight: f64,
    /// Score for a read-heavy or write-heavy pattern.
    pub pattern_weight: f64,
    /// Chain score for a bursty pattern.
    pub bursty_weight: f64,
}

impl Default for PolicyTuning {
    fn default() -> Self {
        Self {
            read_heavy_ratio: 3.0,
            write_heavy_ratio: 0.5,
            partition_risk: 0.2,
            latency_threshold_ms: 100.0,
            small_cluster: 5,
            ratio_weight: 0.30,
            partition_chain_weight: 0.25,
            partition_quorum_weight: 0.15,
            latency_weight: 0.20,
            cluster_chain_weight: 0.15,
            cluster_quorum_weight: 0.10,
            pattern_weight: 0.20,
            bursty_weight: 0.10,
        }
    }
}

/// Dispatcher configuration surface.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub adaptive_switching: bool,
    pub intelligent_routing: bool,
    pub load_balancing: bool,
    pub caching: bool,
    pub speculative_execution: bool,
    pub request_batching: bool,
    /// Minimum score margin required to leave the current mode.
    pub switching_threshold: f64,
    pub cache_ttl: Duration,
    pub read_preference: ReplicationMode,
    pub write_preference: ReplicationMode,
    pub tuning: PolicyTuning,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            adaptive_switching: true,
            intelligent_routing: true,
            load_balancing: true,
            caching: true,
            speculative_execution: false,
            request_batching: true,
            switching_threshold: 0.15,
            cache_ttl: DEFAULT_CACHE_TTL,
            read_preference: ReplicationMode::ChainOnly,
            write_preference: ReplicationMode::QuorumOnly,
            tuning: PolicyTuning::default(),
        }
    }
}
