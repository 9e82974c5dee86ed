use serde::Serialize;

/// Workload classification derived from current metrics, used to steer
/// per-request mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkloadPattern {
    ReadHeavy,
    WriteHeavy,
    Balanced,
    Bursty,
    Unknown,
}

/// Snapshot of the measured workload the policy engine scores against.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveMetrics {
    /// Completed reads divided by completed writes (at least one).
    pub read_write_ratio: f64,
    pub average_latency_ms: f64,
    pub throughput_ops_per_sec: f64,
    /// Estimated partition risk in `[0, 1]`, fed by send-path packet loss.
    pub partition_probability: f64,
    pub active_nodes: usize,
    pub pattern: WorkloadPattern,
}

impl Default for AdaptiveMetrics {
    fn default() -> Self {
        Self {
            read_write_ratio: 1.0,
            average_latency_ms: 0.0,
            throughput_ops_per_sec: 0.0,
            partition_probability: 0.0,
            active_nodes: 0,
            pattern: WorkloadPattern::Unknown,
        }
    }
}
