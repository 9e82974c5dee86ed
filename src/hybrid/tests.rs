use std::sync::Arc;
use std::time::Duration;

use super::cache::ReadCache;
use super::dispatcher::HybridDispatcher;
use super::types::{AdaptiveMetrics, WorkloadPattern};
use crate::chain::coordinator::ChainCoordinator;
use crate::message::types::{Message, MessageKind, ReplicationMode};
use crate::metrics::monitor::PerformanceMonitor;
use crate::network::transport::LoopbackBus;
use crate::quorum::coordinator::QuorumCoordinator;
use crate::storage::store::LocalStore;

fn single_node_dispatcher() -> (Arc<HybridDispatcher>, Arc<LocalStore>) {
    let bus = LoopbackBus::new();
    let store = Arc::new(LocalStore::new());
    let chain = ChainCoordinator::new(1, store.clone(), bus.clone(), vec![1]);
    let quorum = QuorumCoordinator::new(1, store.clone(), bus, vec![1]);
    let monitor = Arc::new(PerformanceMonitor::new());
    let dispatcher = HybridDispatcher::new(1, chain, quorum, monitor);
    (dispatcher, store)
}

// ------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------

#[test]
fn test_cache_roundtrip_within_ttl() {
    let cache = ReadCache::new(Duration::from_secs(30));

    cache.update("k", "v");
    assert_eq!(cache.try_read("k"), Some("v".to_string()));

    cache.invalidate("k");
    assert_eq!(cache.try_read("k"), None);
}

#[test]
fn test_cache_expires_stale_entries() {
    let cache = ReadCache::new(Duration::from_millis(20));

    cache.update("k", "v");
    std::thread::sleep(Duration::from_millis(40));

    // The stale entry is erased by the failed read.
    assert_eq!(cache.try_read("k"), None);
    assert!(cache.is_empty());
}

#[test]
fn test_cache_overflow_evicts_oldest() {
    let cache = ReadCache::new(Duration::from_secs(30));

    cache.update("first", "v");
    std::thread::sleep(Duration::from_millis(2));
    for i in 0..1000 {
        cache.update(&format!("k{}", i), "v");
    }

    // 1001 inserts against a bound of 1000: the oldest entry is gone.
    assert_eq!(cache.len(), 1000);
    assert_eq!(cache.try_read("first"), None);
    assert_eq!(cache.try_read("k999"), Some("v".to_string()));
}

#[test]
fn test_cache_update_replaces_in_place() {
    let cache = ReadCache::new(Duration::from_secs(30));
    cache.update("k", "old");
    cache.update("k", "new");
    assert_eq!(cache.try_read("k"), Some("new".to_string()));
    assert_eq!(cache.len(), 1);
}

// ------------------------------------------------------------------
// Dispatcher request flow
// ------------------------------------------------------------------

#[tokio::test]
async fn test_read_populates_cache_then_hits() {
    let (dispatcher, store) = single_node_dispatcher();
    store.write("k", "v");

    let read = Message::request(MessageKind::ReadRequest, 1, "k", "");

    let first = dispatcher.process_read(&read).await;
    assert!(first.success);
    assert_eq!(first.value, "v");
    assert_eq!(dispatcher.cache_miss_count(), 1);
    assert_eq!(dispatcher.cache_hit_count(), 0);

    let second = dispatcher.process_read(&read).await;
    assert!(second.success);
    assert_eq!(second.value, "v");
    assert_eq!(dispatcher.cache_hit_count(), 1);
}

#[tokio::test]
async fn test_write_invalidates_cache() {
    let (dispatcher, store) = single_node_dispatcher();
    store.write("k", "v");

    let read = Message::request(MessageKind::ReadRequest, 1, "k", "");
    dispatcher.process_read(&read).await;
    dispatcher.process_read(&read).await;
    assert_eq!(dispatcher.cache_hit_count(), 1);

    let write = Message::request(MessageKind::WriteRequest, 1, "k", "v2");
    let response = dispatcher.process_write(&write).await;
    assert!(response.success);

    // The invalidated key misses and re-reads the new value.
    let third = dispatcher.process_read(&read).await;
    assert!(third.success);
    assert_eq!(third.value, "v2");
    assert_eq!(dispatcher.cache_miss_count(), 2);
}

#[tokio::test]
async fn test_disabled_cache_never_counts() {
    let (dispatcher, store) = single_node_dispatcher();
    dispatcher.set_caching(false);
    store.write("k", "v");

    let read = Message::request(MessageKind::ReadRequest, 1, "k", "");
    dispatcher.process_read(&read).await;
    dispatcher.process_read(&read).await;

    assert_eq!(dispatcher.cache_hit_count(), 0);
    assert_eq!(dispatcher.cache_miss_count(), 0);
}

#[tokio::test]
async fn test_failed_read_is_not_cached() {
    let (dispatcher, _store) = single_node_dispatcher();

    let read = Message::request(MessageKind::ReadRequest, 1, "missing", "");
    let response = dispatcher.process_read(&read).await;
    assert!(!response.success);

    // Both attempts miss; nothing was cached.
    dispatcher.process_read(&read).await;
    assert_eq!(dispatcher.cache_hit_count(), 0);
    assert_eq!(dispatcher.cache_miss_count(), 2);
}

// ------------------------------------------------------------------
// Mode selection
// ------------------------------------------------------------------

#[tokio::test]
async fn test_preferences_rule_without_adaptive_switching() {
    let (dispatcher, _store) = single_node_dispatcher();
    dispatcher.set_adaptive_switching(false);
    dispatcher.set_read_preference(ReplicationMode::QuorumOnly);
    dispatcher.set_write_preference(ReplicationMode::ChainOnly);

    assert_eq!(dispatcher.decide_read_mode(), ReplicationMode::QuorumOnly);
    assert_eq!(dispatcher.decide_write_mode(), ReplicationMode::ChainOnly);
}

#[tokio::test]
async fn test_partition_risk_steers_reads_to_chain() {
    let (dispatcher, _store) = single_node_dispatcher();
    dispatcher.set_adaptive_switching(false);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        partition_probability: 0.5,
        ..AdaptiveMetrics::default()
    });
    dispatcher.set_adaptive_switching(true);
    dispatcher.set_read_preference(ReplicationMode::QuorumOnly);

    assert_eq!(dispatcher.decide_read_mode(), ReplicationMode::ChainOnly);
}

#[tokio::test]
async fn test_write_pattern_steering() {
    let (dispatcher, _store) = single_node_dispatcher();
    dispatcher.set_adaptive_switching(false);
    dispatcher.set_write_preference(ReplicationMode::ChainOnly);

    // Write-heavy workloads go to quorum regardless of preference.
    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 0.2,
        ..AdaptiveMetrics::default()
    });
    dispatcher.set_adaptive_switching(true);
    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::WriteHeavy);
    assert_eq!(dispatcher.decide_write_mode(), ReplicationMode::QuorumOnly);
}

#[tokio::test]
async fn test_workload_pattern_inference() {
    let (dispatcher, _store) = single_node_dispatcher();
    dispatcher.set_adaptive_switching(false);

    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::Unknown);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 5.0,
        ..AdaptiveMetrics::default()
    });
    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::ReadHeavy);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 0.3,
        ..AdaptiveMetrics::default()
    });
    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::WriteHeavy);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 1.0,
        throughput_ops_per_sec: 5000.0,
        average_latency_ms: 10.0,
        ..AdaptiveMetrics::default()
    });
    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::Bursty);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 1.0,
        throughput_ops_per_sec: 100.0,
        average_latency_ms: 50.0,
        ..AdaptiveMetrics::default()
    });
    assert_eq!(dispatcher.current_metrics().pattern, WorkloadPattern::Balanced);
}

#[tokio::test]
async fn test_scoring_picks_chain_for_read_heavy_partition_prone_clusters() {
    let (dispatcher, _store) = single_node_dispatcher();

    let metrics = AdaptiveMetrics {
        read_write_ratio: 5.0,
        partition_probability: 0.5,
        active_nodes: 3,
        pattern: WorkloadPattern::ReadHeavy,
        ..AdaptiveMetrics::default()
    };
    assert_eq!(
        dispatcher.select_optimal_mode(&metrics, 0.15),
        ReplicationMode::ChainOnly
    );
}

#[tokio::test]
async fn test_scoring_picks_quorum_for_write_heavy_large_clusters() {
    let (dispatcher, _store) = single_node_dispatcher();

    let metrics = AdaptiveMetrics {
        read_write_ratio: 0.2,
        partition_probability: 0.0,
        active_nodes: 10,
        pattern: WorkloadPattern::WriteHeavy,
        ..AdaptiveMetrics::default()
    };
    assert_eq!(
        dispatcher.select_optimal_mode(&metrics, 0.15),
        ReplicationMode::QuorumOnly
    );
}

#[tokio::test]
async fn test_scoring_stays_hybrid_when_contested() {
    let (dispatcher, _store) = single_node_dispatcher();

    // Chain gets the small-cluster points, quorum the healthy-network
    // points; neither clears the threshold.
    let metrics = AdaptiveMetrics {
        read_write_ratio: 1.0,
        partition_probability: 0.0,
        active_nodes: 3,
        pattern: WorkloadPattern::Balanced,
        ..AdaptiveMetrics::default()
    };
    assert_eq!(
        dispatcher.select_optimal_mode(&metrics, 0.15),
        ReplicationMode::Hybrid
    );
}

#[tokio::test]
async fn test_metric_update_switches_mode() {
    let (dispatcher, _store) = single_node_dispatcher();
    assert_eq!(dispatcher.current_mode(), ReplicationMode::Hybrid);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        read_write_ratio: 5.0,
        partition_probability: 0.5,
        active_nodes: 3,
        ..AdaptiveMetrics::default()
    });

    assert_eq!(dispatcher.current_mode(), ReplicationMode::ChainOnly);
    assert!(dispatcher.mode_switching_overhead_ms() >= 0.0);
}

#[tokio::test]
async fn test_network_partition_forces_chain() {
    let (dispatcher, _store) = single_node_dispatcher();
    dispatcher.handle_network_partition();
    assert_eq!(dispatcher.current_mode(), ReplicationMode::ChainOnly);
}

// ------------------------------------------------------------------
// Derived metrics
// ------------------------------------------------------------------

#[tokio::test]
async fn test_request_metrics_feed_ratio_and_latency() {
    let (dispatcher, store) = single_node_dispatcher();
    store.write("k", "v");

    let read = Message::request(MessageKind::ReadRequest, 1, "k", "");
    for _ in 0..6 {
        dispatcher.process_read(&read).await;
    }
    let write = Message::request(MessageKind::WriteRequest, 1, "k", "v");
    dispatcher.process_write(&write).await;

    let metrics = dispatcher.current_metrics();
    assert!((metrics.read_write_ratio - 6.0).abs() < 1e-9);
    assert!(metrics.average_latency_ms >= 0.0);
}

#[tokio::test]
async fn test_hybrid_efficiency_combines_hits_and_balance() {
    let (dispatcher, store) = single_node_dispatcher();
    store.write("k", "v");

    // Reads resolve via chain (default preference), writes via quorum.
    let read = Message::request(MessageKind::ReadRequest, 1, "k", "");
    let write = Message::request(MessageKind::WriteRequest, 1, "k", "v");
    dispatcher.process_read(&read).await; // miss + chain op
    dispatcher.process_write(&write).await; // quorum op
    dispatcher.process_read(&read).await; // miss (invalidated) + chain op

    // 0 hits, 2 misses -> hit rate 0; balance = 1 quorum / 3 ops.
    let expected = 0.0 * 0.4 + (1.0 / 3.0) * 0.6;
    assert!((dispatcher.hybrid_efficiency() - expected).abs() < 1e-9);
}

#[tokio::test]
async fn test_failure_and_recovery_propagate_to_coordinators() {
    let bus = LoopbackBus::new();
    let store = Arc::new(LocalStore::new());
    let chain = ChainCoordinator::new(1, store.clone(), bus.clone(), vec![1, 2, 3]);
    let quorum = QuorumCoordinator::new(1, store.clone(), bus, vec![1, 2, 3]);
    let monitor = Arc::new(PerformanceMonitor::new());
    let dispatcher = HybridDispatcher::new(1, chain.clone(), quorum.clone(), monitor);

    dispatcher.update_workload_metrics(AdaptiveMetrics {
        active_nodes: 3,
        ..AdaptiveMetrics::default()
    });

    dispatcher.handle_node_failure(3);
    assert_eq!(chain.chain_length(), 2);
    assert_eq!(quorum.member_count(), 2);
    assert_eq!(dispatcher.current_metrics().active_nodes, 2);

    dispatcher.handle_node_recovery(3);
    assert_eq!(chain.chain_length(), 3);
    assert_eq!(quorum.member_count(), 3);
    assert_eq!(dispatcher.current_metrics().active_nodes, 3);
}
