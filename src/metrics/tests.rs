use super::monitor::{OperationRecord, PerformanceMonitor};
use crate::message::types::{now_micros, MessageKind, ReplicationMode};

fn completed_record(latency_ms: u64, success: bool, mode: ReplicationMode) -> OperationRecord {
    let start = now_micros();
    OperationRecord {
        start_us: start,
        end_us: start + latency_ms * 1000,
        kind: MessageKind::ReadRequest,
        success,
        key: "k".to_string(),
        value_size: 0,
        hops: 1,
        mode,
    }
}

#[test]
fn test_operation_lifecycle_updates_counters() {
    let monitor = PerformanceMonitor::new();

    monitor.start_operation(1, MessageKind::ReadRequest, "a", 0);
    monitor.start_operation(2, MessageKind::WriteRequest, "b", 5);
    assert_eq!(monitor.active_operation_count(), 2);
    assert_eq!(monitor.total_operations(), 2);

    monitor.end_operation(1, true, ReplicationMode::ChainOnly, 3);
    monitor.end_operation(2, false, ReplicationMode::QuorumOnly, 1);

    assert_eq!(monitor.active_operation_count(), 0);
    assert_eq!(monitor.successful_operations(), 1);
    assert_eq!(monitor.failed_operations(), 1);
    // success + failure == total
    assert_eq!(
        monitor.successful_operations() + monitor.failed_operations(),
        monitor.total_operations()
    );
    assert_eq!(monitor.completed_count(), 2);
}

#[test]
fn test_end_of_unknown_operation_is_ignored() {
    let monitor = PerformanceMonitor::new();
    monitor.end_operation(42, true, ReplicationMode::Hybrid, 1);

    assert_eq!(monitor.total_operations(), 0);
    assert_eq!(monitor.successful_operations(), 0);
}

#[test]
fn test_success_rate_stays_in_unit_interval() {
    let monitor = PerformanceMonitor::new();
    assert_eq!(monitor.success_rate(), 0.0);

    for id in 0..10 {
        monitor.start_operation(id, MessageKind::ReadRequest, "k", 0);
        monitor.end_operation(id, id % 4 != 0, ReplicationMode::ChainOnly, 1);
    }

    let rate = monitor.success_rate();
    assert!((0.0..=1.0).contains(&rate));
    assert!((rate - 0.7).abs() < 1e-9);
}

#[test]
fn test_per_mode_aggregates() {
    let monitor = PerformanceMonitor::new();

    for id in 0..6 {
        let mode = if id < 4 {
            ReplicationMode::ChainOnly
        } else {
            ReplicationMode::QuorumOnly
        };
        monitor.start_operation(id, MessageKind::WriteRequest, "k", 1);
        monitor.end_operation(id, true, mode, 1);
    }

    assert!(monitor.chain_stats().throughput_ops_per_sec > 0.0);
    assert!(monitor.quorum_stats().throughput_ops_per_sec > 0.0);
    // No hybrid-mode completions recorded.
    assert_eq!(monitor.hybrid_stats().average_latency_ms, 0.0);
}

#[test]
fn test_percentiles_interpolate_between_ranks() {
    let monitor = PerformanceMonitor::new();
    for latency in 1..=100u64 {
        monitor.inject_completed(completed_record(latency, true, ReplicationMode::ChainOnly));
    }

    // index = 0.95 * 99 = 94.05 -> between samples 95 and 96.
    let p95 = monitor.percentile_latency_ms(0.95);
    assert!((p95 - 95.05).abs() < 1e-9);

    let p99 = monitor.percentile_latency_ms(0.99);
    assert!(p99 >= p95);
    assert!((monitor.percentile_latency_ms(1.0) - 100.0).abs() < 1e-9);
}

#[test]
fn test_percentiles_ignore_failures() {
    let monitor = PerformanceMonitor::new();
    monitor.inject_completed(completed_record(10, true, ReplicationMode::ChainOnly));
    monitor.inject_completed(completed_record(9999, false, ReplicationMode::ChainOnly));

    assert!((monitor.percentile_latency_ms(0.99) - 10.0).abs() < 1e-9);
}

#[test]
fn test_completed_ring_is_bounded() {
    let monitor = PerformanceMonitor::new();
    for _ in 0..10_050 {
        monitor.inject_completed(completed_record(1, true, ReplicationMode::ChainOnly));
    }
    assert_eq!(monitor.completed_count(), 10_000);
}

#[test]
fn test_csv_export_layout() {
    let monitor = PerformanceMonitor::new();
    monitor.start_operation(1, MessageKind::WriteRequest, "user:1", 4);
    monitor.end_operation(1, true, ReplicationMode::QuorumOnly, 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.csv");
    monitor.export_csv(&path).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "timestamp,operation_type,success,latency_ms,mode,hops,key"
    );

    let row = lines.next().unwrap();
    let fields: Vec<&str> = row.split(',').collect();
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[1], "2"); // WriteRequest
    assert_eq!(fields[2], "1"); // success
    assert_eq!(fields[4], "1"); // QuorumOnly
    assert_eq!(fields[5], "2"); // hops
    assert_eq!(fields[6], "user:1");
    assert!(lines.next().is_none());
}

#[test]
fn test_recommendations_always_name_a_mode() {
    let monitor = PerformanceMonitor::new();
    let recommendations = monitor.recommendations();
    assert!(recommendations
        .iter()
        .any(|line| line.starts_with("Recommended replication mode:")));
}

#[test]
fn test_low_throughput_raises_alert() {
    let monitor = PerformanceMonitor::new();
    // A fresh monitor with one slow failure trips throughput and success alerts.
    monitor.start_operation(1, MessageKind::ReadRequest, "k", 0);
    monitor.end_operation(1, false, ReplicationMode::ChainOnly, 1);

    let alerts = monitor.active_alerts();
    assert!(alerts.iter().any(|alert| alert.starts_with("LOW_THROUGHPUT")));
    assert!(alerts.iter().any(|alert| alert.starts_with("LOW_SUCCESS_RATE")));
    assert!(monitor.has_alerts());
}

#[test]
fn test_alert_thresholds_are_tunable() {
    let monitor = PerformanceMonitor::new();
    monitor.set_throughput_threshold(0.0);

    monitor.start_operation(1, MessageKind::ReadRequest, "k", 0);
    monitor.end_operation(1, true, ReplicationMode::ChainOnly, 1);

    let alerts = monitor.active_alerts();
    assert!(!alerts.iter().any(|alert| alert.starts_with("LOW_THROUGHPUT")));
}

#[test]
fn test_reset_clears_everything() {
    let monitor = PerformanceMonitor::new();
    monitor.start_operation(1, MessageKind::ReadRequest, "k", 0);
    monitor.end_operation(1, true, ReplicationMode::ChainOnly, 1);
    assert_eq!(monitor.total_operations(), 1);

    monitor.reset();

    assert_eq!(monitor.total_operations(), 0);
    assert_eq!(monitor.successful_operations(), 0);
    assert_eq!(monitor.completed_count(), 0);
    assert_eq!(monitor.average_latency_ms(), 0.0);
}

#[test]
fn test_historical_stats_respect_window() {
    let monitor = PerformanceMonitor::new();

    // One record well outside a 1-second window.
    let mut old = completed_record(5, true, ReplicationMode::ChainOnly);
    old.start_us = now_micros().saturating_sub(10_000_000);
    old.end_us = old.start_us + 5_000;
    monitor.inject_completed(old);

    monitor.inject_completed(completed_record(7, true, ReplicationMode::ChainOnly));

    let stats = monitor.historical_stats(1_000);
    assert!((stats.average_latency_ms - 7.0).abs() < 1e-9);
    assert!((stats.success_rate - 1.0).abs() < 1e-9);
}

#[test]
fn test_update_system_stats_populates_resources() {
    let monitor = PerformanceMonitor::new();
    monitor.update_system_stats();

    let stats = monitor.current_stats();
    assert!(stats.memory_usage_mb >= 0.0);
    assert!(stats.cpu_utilization >= 0.0);
}
