use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::heartbeat::HeartbeatService;
use super::peers::PeerDirectory;
use super::transport::{LoopbackBus, Transport};
use crate::message::types::{Message, MessageKind};

#[test]
fn test_peer_lifecycle() {
    let peers = PeerDirectory::new();

    peers.add(2, "127.0.0.1", 8082);
    assert!(peers.is_reachable(2));
    assert_eq!(peers.endpoint(2), Some(("127.0.0.1".to_string(), 8082)));

    peers.update_status(2, false);
    assert!(!peers.is_reachable(2));
    assert_eq!(peers.active_count(), 0);

    peers.remove(2);
    assert!(!peers.is_reachable(2));
    assert!(peers.is_empty());
}

#[test]
fn test_activation_stamps_heartbeat_clock() {
    let peers = PeerDirectory::new();
    peers.add(3, "127.0.0.1", 8083);

    let stamped_at_add = peers.last_heartbeat_us(3).unwrap();
    peers.update_status(3, false);
    peers.update_status(3, true);
    assert!(peers.last_heartbeat_us(3).unwrap() >= stamped_at_add);
}

#[test]
fn test_latency_ring_is_bounded() {
    let peers = PeerDirectory::new();
    peers.add(5, "127.0.0.1", 8085);

    // 150 samples of 2ms, then the window should only hold the last 100.
    for _ in 0..150 {
        peers.record_send(5, 2_000, true);
    }
    assert!((peers.average_latency_ms(5) - 2.0).abs() < 1e-9);

    // Push 100 samples of 4ms; the 2ms samples must all be evicted.
    for _ in 0..100 {
        peers.record_send(5, 4_000, true);
    }
    assert!((peers.average_latency_ms(5) - 4.0).abs() < 1e-9);
}

#[test]
fn test_packet_loss_rate() {
    let peers = PeerDirectory::new();
    peers.add(6, "127.0.0.1", 8086);

    for i in 0..10 {
        peers.record_send(6, 1_000, i % 5 != 0);
    }
    assert!((peers.packet_loss_rate(6) - 0.2).abs() < 1e-9);
    assert!((peers.average_packet_loss() - 0.2).abs() < 1e-9);
}

#[test]
fn test_unknown_peer_defaults() {
    let peers = PeerDirectory::new();
    assert!(!peers.is_reachable(99));
    assert_eq!(peers.average_latency_ms(99), 0.0);
    assert_eq!(peers.packet_loss_rate(99), 0.0);
    assert_eq!(peers.average_packet_loss(), 0.0);
}

#[tokio::test]
async fn test_loopback_bus_delivers_wire_frames() {
    let bus = LoopbackBus::new();
    let mut inbox = bus.register(2);

    let msg = Message::request(MessageKind::WriteRequest, 1, "k", "v");
    bus.send(2, &msg).unwrap();

    let frame = inbox.recv().await.unwrap();
    let decoded = Message::deserialize(&frame).unwrap();
    assert_eq!(decoded, msg);
}

#[tokio::test]
async fn test_loopback_bus_rejects_unknown_target() {
    let bus = LoopbackBus::new();
    let msg = Message::request(MessageKind::ReadRequest, 1, "k", "");
    assert!(bus.send(42, &msg).is_err());
}

#[tokio::test]
async fn test_heartbeat_marks_recovery() {
    let peers = Arc::new(PeerDirectory::new());
    peers.add(2, "127.0.0.1", 8082);
    peers.update_status(2, false);

    let bus = LoopbackBus::new();
    let service = HeartbeatService::new(1, peers.clone(), bus);

    let recoveries = Arc::new(AtomicUsize::new(0));
    let counter = recoveries.clone();
    service.on_status_change(move |peer, active| {
        if active {
            assert_eq!(peer, 2);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    service.handle_heartbeat(2);
    assert!(peers.is_reachable(2));
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);

    // A heartbeat from an already-active peer is not a transition.
    service.handle_heartbeat(2);
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failure_detector_declares_silent_peer_dead() {
    let peers = Arc::new(PeerDirectory::new());
    peers.add(2, "127.0.0.1", 8082);

    let bus = LoopbackBus::new();
    let service = HeartbeatService::with_timing(
        1,
        peers.clone(),
        bus,
        Duration::from_millis(20),
        Duration::from_millis(50),
    );

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    service.on_status_change(move |_, active| {
        if !active {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    service.start(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!peers.is_reachable(2));
    assert!(failures.load(Ordering::SeqCst) >= 1);
}
