use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use sysinfo::System;

use crate::message::types::{now_micros, MessageKind, ReplicationMode};

/// Completed operations retained for percentile analysis.
const COMPLETED_RING_CAPACITY: usize = 10_000;

/// Completed records older than this are culled on every stats refresh.
const RETENTION_US: u64 = 3600 * 1_000_000;

/// Default alert thresholds.
const DEFAULT_LATENCY_THRESHOLD_MS: f64 = 100.0;
const DEFAULT_THROUGHPUT_THRESHOLD: f64 = 1000.0;
const CPU_ALERT_PERCENT: f64 = 90.0;
const MEMORY_ALERT_MB: f64 = 2048.0;

/// One tracked operation, from `start_operation` to `end_operation`.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub start_us: u64,
    pub end_us: u64,
    pub kind: MessageKind,
    pub success: bool,
    pub key: String,
    pub value_size: usize,
    pub hops: u32,
    pub mode: ReplicationMode,
}

impl OperationRecord {
    pub fn latency_ms(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us) / 1000
    }
}

/// Snapshot of the derived performance numbers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    pub throughput_ops_per_sec: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub success_rate: f64,
    pub cpu_utilization: f64,
    pub memory_usage_mb: f64,
}

struct SystemSample {
    system: System,
    cpu_percent: f64,
    memory_mb: f64,
}

/// Tracks every operation's lifetime and derives the rolling statistics
/// the policy engine and the alerting surface consume.
pub struct PerformanceMonitor {
    active: DashMap<u64, OperationRecord>,
    completed: Mutex<VecDeque<OperationRecord>>,

    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cumulative_latency_us: AtomicU64,

    chain_ops: AtomicU64,
    quorum_ops: AtomicU64,
    hybrid_ops: AtomicU64,
    chain_latency_us: AtomicU64,
    quorum_latency_us: AtomicU64,
    hybrid_latency_us: AtomicU64,

    latency_threshold_bits: AtomicU64,
    throughput_threshold_bits: AtomicU64,
    detailed_logging: AtomicBool,

    start_us: AtomicU64,
    system: Mutex<SystemSample>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            completed: Mutex::new(VecDeque::with_capacity(COMPLETED_RING_CAPACITY)),
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cumulative_latency_us: AtomicU64::new(0),
            chain_ops: AtomicU64::new(0),
            quorum_ops: AtomicU64::new(0),
            hybrid_ops: AtomicU64::new(0),
            chain_latency_us: AtomicU64::new(0),
            quorum_latency_us: AtomicU64::new(0),
            hybrid_latency_us: AtomicU64::new(0),
            latency_threshold_bits: AtomicU64::new(DEFAULT_LATENCY_THRESHOLD_MS.to_bits()),
            throughput_threshold_bits: AtomicU64::new(DEFAULT_THROUGHPUT_THRESHOLD.to_bits()),
            detailed_logging: AtomicBool::new(false),
            start_us: AtomicU64::new(now_micros()),
            system: Mutex::new(SystemSample {
                system: System::new_all(),
                cpu_percent: 0.0,
                memory_mb: 0.0,
            }),
        }
    }

    pub fn set_latency_threshold(&self, threshold_ms: f64) {
        self.latency_threshold_bits
            .store(threshold_ms.to_bits(), Ordering::Relaxed);
    }

    pub fn set_throughput_threshold(&self, threshold_ops: f64) {
        self.throughput_threshold_bits
            .store(threshold_ops.to_bits(), Ordering::Relaxed);
    }

    pub fn enable_detailed_logging(&self, enabled: bool) {
        self.detailed_logging.store(enabled, Ordering::Relaxed);
    }

    /// Opens a tracking record for an operation.
    pub fn start_operation(&self, operation_id: u64, kind: MessageKind, key: &str, value_size: usize) {
        self.active.insert(
            operation_id,
            OperationRecord {
                start_us: now_micros(),
                end_us: 0,
                kind,
                success: false,
                key: key.to_string(),
                value_size,
                hops: 0,
                mode: ReplicationMode::Hybrid,
            },
        );
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Completes a tracking record and folds it into the aggregates.
    pub fn end_operation(&self, operation_id: u64, success: bool, mode: ReplicationMode, hops: u32) {
        let Some((_, mut record)) = self.active.remove(&operation_id) else {
            return;
        };

        record.end_us = now_micros();
        record.success = success;
        record.mode = mode;
        record.hops = hops;

        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let latency_us = record.end_us.saturating_sub(record.start_us);
        self.cumulative_latency_us.fetch_add(latency_us, Ordering::Relaxed);

        match mode {
            ReplicationMode::ChainOnly => {
                self.chain_ops.fetch_add(1, Ordering::Relaxed);
                self.chain_latency_us.fetch_add(latency_us, Ordering::Relaxed);
            }
            ReplicationMode::QuorumOnly => {
                self.quorum_ops.fetch_add(1, Ordering::Relaxed);
                self.quorum_latency_us.fetch_add(latency_us, Ordering::Relaxed);
            }
            ReplicationMode::Hybrid => {
                self.hybrid_ops.fetch_add(1, Ordering::Relaxed);
                self.hybrid_latency_us.fetch_add(latency_us, Ordering::Relaxed);
            }
        }

        if self.detailed_logging.load(Ordering::Relaxed) {
            tracing::debug!(
                "Operation {} completed: {} in {}ms",
                operation_id,
                if success { "SUCCESS" } else { "FAILED" },
                latency_us / 1000
            );
        }

        let mut completed = self.completed.lock().expect("metrics mutex poisoned");
        if completed.len() == COMPLETED_RING_CAPACITY {
            completed.pop_front();
        }
        completed.push_back(record);
    }

    pub fn total_operations(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn successful_operations(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failed_operations(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn active_operation_count(&self) -> usize {
        self.active.len()
    }

    pub fn throughput(&self) -> f64 {
        let elapsed_s =
            now_micros().saturating_sub(self.start_us.load(Ordering::Relaxed)) as f64 / 1e6;
        if elapsed_s <= 0.0 {
            return 0.0;
        }
        self.total.load(Ordering::Relaxed) as f64 / elapsed_s
    }

    pub fn average_latency_ms(&self) -> f64 {
        let successes = self.successes.load(Ordering::Relaxed);
        if successes == 0 {
            return 0.0;
        }
        self.cumulative_latency_us.load(Ordering::Relaxed) as f64 / successes as f64 / 1000.0
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.successes.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Latency percentile over the completed ring, linearly interpolated
    /// between the two nearest ranks.
    pub fn percentile_latency_ms(&self, percentile: f64) -> f64 {
        let completed = self.completed.lock().expect("metrics mutex poisoned");
        let mut latencies: Vec<u64> = completed
            .iter()
            .filter(|record| record.success)
            .map(|record| record.latency_ms())
            .collect();
        drop(completed);

        latencies.sort_unstable();
        interpolate_percentile(&latencies, percentile)
    }

    pub fn current_stats(&self) -> PerformanceStats {
        let (cpu, memory) = {
            let sample = self.system.lock().expect("metrics mutex poisoned");
            (sample.cpu_percent, sample.memory_mb)
        };

        PerformanceStats {
            throughput_ops_per_sec: self.throughput(),
            average_latency_ms: self.average_latency_ms(),
            p95_latency_ms: self.percentile_latency_ms(0.95),
            p99_latency_ms: self.percentile_latency_ms(0.99),
            success_rate: self.success_rate(),
            cpu_utilization: cpu,
            memory_usage_mb: memory,
        }
    }

    /// Stats over the trailing `window_ms` of completed operations.
    pub fn historical_stats(&self, window_ms: u64) -> PerformanceStats {
        let cutoff = now_micros().saturating_sub(window_ms * 1000);
        let completed = self.completed.lock().expect("metrics mutex poisoned");

        let mut in_window = 0u64;
        let mut successful = 0u64;
        let mut total_latency_ms = 0.0;
        let mut latencies = Vec::new();

        for record in completed.iter() {
            if record.start_us < cutoff {
                continue;
            }
            in_window += 1;
            if record.success {
                successful += 1;
                let latency = record.latency_ms();
                total_latency_ms += latency as f64;
                latencies.push(latency);
            }
        }
        drop(completed);

        let mut stats = PerformanceStats::default();
        if in_window == 0 {
            return stats;
        }

        stats.throughput_ops_per_sec = in_window as f64 / (window_ms as f64 / 1000.0);
        stats.success_rate = successful as f64 / in_window as f64;
        if successful > 0 {
            stats.average_latency_ms = total_latency_ms / successful as f64;
            latencies.sort_unstable();
            stats.p95_latency_ms = interpolate_percentile(&latencies, 0.95);
            stats.p99_latency_ms = interpolate_percentile(&latencies, 0.99);
        }
        stats
    }

    fn mode_stats(&self, ops: &AtomicU64, latency_us: &AtomicU64) -> PerformanceStats {
        let count = ops.load(Ordering::Relaxed);
        let mut stats = PerformanceStats::default();
        if count == 0 {
            return stats;
        }

        stats.average_latency_ms = latency_us.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0;
        let elapsed_s =
            now_micros().saturating_sub(self.start_us.load(Ordering::Relaxed)) as f64 / 1e6;
        if elapsed_s > 0.0 {
            stats.throughput_ops_per_sec = count as f64 / elapsed_s;
        }
        stats
    }

    pub fn chain_stats(&self) -> PerformanceStats {
        self.mode_stats(&self.chain_ops, &self.chain_latency_us)
    }

    pub fn quorum_stats(&self) -> PerformanceStats {
        self.mode_stats(&self.quorum_ops, &self.quorum_latency_us)
    }

    pub fn hybrid_stats(&self) -> PerformanceStats {
        self.mode_stats(&self.hybrid_ops, &self.hybrid_latency_us)
    }

    /// Refreshes CPU and memory readings and culls stale completed records.
    pub fn update_system_stats(&self) {
        {
            let mut sample = self.system.lock().expect("metrics mutex poisoned");
            sample.system.refresh_cpu();
            sample.system.refresh_memory();
            sample.cpu_percent = sample.system.global_cpu_info().cpu_usage() as f64;
            // sysinfo reports bytes.
            sample.memory_mb = sample.system.used_memory() as f64 / (1024.0 * 1024.0);
        }

        let cutoff = now_micros().saturating_sub(RETENTION_US);
        let mut completed = self.completed.lock().expect("metrics mutex poisoned");
        completed.retain(|record| record.start_us >= cutoff);
    }

    /// Picks the mode with the better latency/throughput profile.
    pub fn recommended_mode(&self) -> ReplicationMode {
        let chain = self.chain_stats();
        let quorum = self.quorum_stats();

        if chain.average_latency_ms < quorum.average_latency_ms
            && chain.throughput_ops_per_sec > quorum.throughput_ops_per_sec
        {
            ReplicationMode::ChainOnly
        } else if quorum.average_latency_ms < chain.average_latency_ms
            && quorum.throughput_ops_per_sec > chain.throughput_ops_per_sec
        {
            ReplicationMode::QuorumOnly
        } else {
            ReplicationMode::Hybrid
        }
    }

    pub fn recommendations(&self) -> Vec<String> {
        let stats = self.current_stats();
        let latency_threshold = f64::from_bits(self.latency_threshold_bits.load(Ordering::Relaxed));
        let throughput_threshold =
            f64::from_bits(self.throughput_threshold_bits.load(Ordering::Relaxed));
        let mut recommendations = Vec::new();

        if stats.average_latency_ms > latency_threshold {
            recommendations.push(format!(
                "High latency detected ({:.1}ms). Consider enabling caching or optimizing network.",
                stats.average_latency_ms
            ));
        }
        if stats.throughput_ops_per_sec < throughput_threshold {
            recommendations.push(format!(
                "Low throughput detected ({:.1} ops/sec). Consider enabling batching or scaling up.",
                stats.throughput_ops_per_sec
            ));
        }
        if stats.success_rate < 0.95 {
            recommendations.push(format!(
                "Low success rate ({:.1}%). Check network reliability and node health.",
                stats.success_rate * 100.0
            ));
        }
        recommendations.push(format!(
            "Recommended replication mode: {}",
            self.recommended_mode()
        ));

        recommendations
    }

    pub fn has_alerts(&self) -> bool {
        !self.active_alerts().is_empty()
    }

    pub fn active_alerts(&self) -> Vec<String> {
        let stats = self.current_stats();
        let latency_threshold = f64::from_bits(self.latency_threshold_bits.load(Ordering::Relaxed));
        let throughput_threshold =
            f64::from_bits(self.throughput_threshold_bits.load(Ordering::Relaxed));
        let mut alerts = Vec::new();

        if stats.average_latency_ms > latency_threshold {
            alerts.push(format!("HIGH_LATENCY: {:.1}ms", stats.average_latency_ms));
        }
        if stats.throughput_ops_per_sec < throughput_threshold {
            alerts.push(format!(
                "LOW_THROUGHPUT: {:.1} ops/sec",
                stats.throughput_ops_per_sec
            ));
        }
        if stats.success_rate < 0.95 {
            alerts.push(format!("LOW_SUCCESS_RATE: {:.1}%", stats.success_rate * 100.0));
        }
        if stats.cpu_utilization > CPU_ALERT_PERCENT {
            alerts.push(format!("HIGH_CPU_USAGE: {:.1}%", stats.cpu_utilization));
        }
        if stats.memory_usage_mb > MEMORY_ALERT_MB {
            alerts.push(format!("HIGH_MEMORY_USAGE: {:.1}MB", stats.memory_usage_mb));
        }

        alerts
    }

    pub fn should_scale_up(&self) -> bool {
        let stats = self.current_stats();
        let latency_threshold = f64::from_bits(self.latency_threshold_bits.load(Ordering::Relaxed));

        stats.cpu_utilization > 80.0
            || stats.memory_usage_mb > 1024.0
            || stats.average_latency_ms > latency_threshold * 2.0
    }

    pub fn should_scale_down(&self) -> bool {
        let stats = self.current_stats();
        let latency_threshold = f64::from_bits(self.latency_threshold_bits.load(Ordering::Relaxed));

        stats.cpu_utilization < 20.0
            && stats.memory_usage_mb < 256.0
            && stats.average_latency_ms < latency_threshold / 2.0
    }

    /// Dumps the completed ring as CSV, one row per operation.
    pub fn export_csv(&self, path: &Path) -> anyhow::Result<()> {
        let completed = self.completed.lock().expect("metrics mutex poisoned");
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);

        writeln!(file, "timestamp,operation_type,success,latency_ms,mode,hops,key")?;
        for record in completed.iter() {
            writeln!(
                file,
                "{},{},{},{},{},{},{}",
                record.start_us,
                record.kind as u8,
                if record.success { 1 } else { 0 },
                record.latency_ms(),
                record.mode as u8,
                record.hops,
                record.key
            )?;
        }

        file.flush()?;
        tracing::info!("Metrics exported to {}", path.display());
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn inject_completed(&self, record: OperationRecord) {
        let mut completed = self.completed.lock().expect("metrics mutex poisoned");
        if completed.len() == COMPLETED_RING_CAPACITY {
            completed.pop_front();
        }
        completed.push_back(record);
    }

    #[cfg(test)]
    pub(crate) fn completed_count(&self) -> usize {
        self.completed.lock().expect("metrics mutex poisoned").len()
    }

    pub fn reset(&self) {
        self.active.clear();
        self.completed.lock().expect("metrics mutex poisoned").clear();

        self.total.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.cumulative_latency_us.store(0, Ordering::Relaxed);
        self.chain_ops.store(0, Ordering::Relaxed);
        self.quorum_ops.store(0, Ordering::Relaxed);
        self.hybrid_ops.store(0, Ordering::Relaxed);
        self.chain_latency_us.store(0, Ordering::Relaxed);
        self.quorum_latency_us.store(0, Ordering::Relaxed);
        self.hybrid_latency_us.store(0, Ordering::Relaxed);
        self.start_us.store(now_micros(), Ordering::Relaxed);

        tracing::info!("Performance metrics reset");
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn interpolate_percentile(sorted: &[u64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let index = percentile * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        return sorted[lower] as f64;
    }

    let weight = index - lower as f64;
    sorted[lower] as f64 * (1.0 - weight) + sorted[upper] as f64 * weight
}
