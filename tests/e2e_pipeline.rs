//! E2E tests for a running node
//!
//! Starts the full node (timer driver, interrupt handler, deferred worker,
//! calibration engine, transmit task) and checks what reaches the wire, both
//! through an in-memory link and through a real UDP socket on loopback.

use sensornode::protocol::packet::{Payload, WirePacket};
use sensornode::storage::MemoryStore;
use sensornode::testing::{MockTimer, RecordingLink, ScriptedInput};
use sensornode::{ConfigKey, ConfigStore, Node, NodeConfig, SimulatedTimer};
use sensornode_core::net::link::{UdpLink, KEEPALIVE_PAYLOAD};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_config() -> NodeConfig {
    NodeConfig {
        sample_rate_hz: 200,
        engine_timeout: Duration::from_millis(50),
        transmit_timeout: Duration::from_millis(20),
        deferred_timeout: Duration::from_millis(50),
        ..NodeConfig::default()
    }
}

fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

fn decode_all(link: &RecordingLink) -> Vec<sensornode::protocol::packet::DecodedPacket> {
    link.sent()
        .iter()
        .filter(|p| p.as_slice() != KEEPALIVE_PAYLOAD)
        .map(|p| WirePacket::parse(p).expect("node sent an invalid packet"))
        .collect()
}

#[test]
fn test_calibrate_then_threshold_over_the_wire() {
    // Channels 0 and 1 step between 300 and 100 in blocks of eight ticks,
    // channels 2 and 3 hold 200. Then channel 0 goes high and channel 1 low.
    let mut script = Vec::new();
    for block in 0..25 {
        let level = if block % 2 == 0 { 300 } else { 100 };
        for _ in 0..8 {
            script.push([level, level, 200, 200]);
        }
    }
    script.push([3000, 0, 200, 200]);

    let link = RecordingLink::new();
    let store = Arc::new(MemoryStore::new());
    let node = Node::start(
        fast_config(),
        Arc::new(SimulatedTimer::new()),
        Box::new(ScriptedInput::new(script)),
        Box::new(link.clone()),
        store.clone(),
    )
    .unwrap();

    // Let the zero-filled filter windows flush before collecting extremes
    assert!(wait_until(Duration::from_secs(3), || {
        node.stats().samples_captured >= 10
    }));
    let started_at = node.stats().samples_captured;
    node.start_calibration();
    assert!(wait_until(Duration::from_secs(3), || {
        node.stats().samples_captured >= started_at + 40
    }));
    node.stop_calibration();

    assert!(wait_until(Duration::from_secs(5), || {
        decode_all(&link)
            .iter()
            .any(|p| p.payload == Payload::Threshold(0b0001))
    }));

    assert_eq!(store.get(ConfigKey::CalibrationMax(0)), Some(300));
    assert_eq!(store.get(ConfigKey::CalibrationMin(0)), Some(100));
    assert_eq!(store.get(ConfigKey::Threshold(0)), Some(200));
    assert_eq!(store.get(ConfigKey::Threshold(2)), Some(200));
}

#[test]
fn test_raw_mode_and_node_id_change() {
    let link = RecordingLink::new();
    let store = Arc::new(MemoryStore::with_entries(&[(ConfigKey::NodeId, 4)]));
    let node = Node::start(
        fast_config(),
        Arc::new(SimulatedTimer::new()),
        Box::new(ScriptedInput::constant(2048)),
        Box::new(link.clone()),
        store.clone(),
    )
    .unwrap();
    assert_eq!(node.node_id(), 4);

    node.set_raw_mode(true);
    node.set_node_id(21).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        decode_all(&link)
            .iter()
            .any(|p| p.node_id == 21 && p.payload == Payload::Raw([2048; 4]))
    }));
    assert_eq!(store.get(ConfigKey::NodeId), Some(21));
}

#[test]
fn test_counter_is_sequential_without_drops() {
    // Fires are delivered by hand and the queues outsize them, so nothing
    // can be dropped and every counter value must reach the wire in order.
    let link = RecordingLink::new();
    let timer = Arc::new(MockTimer::new());
    let mut node = Node::start(
        NodeConfig {
            sample_queue_capacity: 512,
            packet_queue_capacity: 512,
            ..fast_config()
        },
        Arc::clone(&timer),
        Box::new(ScriptedInput::constant(10)),
        Box::new(link.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    for _ in 0..300 {
        timer.fire();
    }
    assert!(wait_until(Duration::from_secs(5), || decode_all(&link).len() >= 300));
    node.stop();

    let stats = node.stats();
    assert_eq!(stats.samples_captured, 300);
    assert_eq!(stats.samples_dropped, 0);
    assert_eq!(stats.packets_dropped, 0);

    let counters: Vec<u8> = decode_all(&link).iter().map(|p| p.counter).collect();
    assert_eq!(counters.len(), 300);
    let expected: Vec<u8> = (0..300u32).map(|c| c as u8).collect();
    assert_eq!(counters, expected);
}

#[test]
fn test_keepalive_when_idle() {
    let link = RecordingLink::new();
    let node = Node::start(
        NodeConfig {
            keepalive_after: 3,
            ..fast_config()
        },
        Arc::new(SimulatedTimer::new()),
        Box::new(ScriptedInput::constant(10)),
        Box::new(link.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    node.pause_sampling();
    assert!(wait_until(Duration::from_secs(3), || node.stats().keepalives_sent >= 1));
    assert!(link.sent().iter().any(|p| p.as_slice() == KEEPALIVE_PAYLOAD));
}

#[test]
fn test_network_disabled_skips_packets() {
    let link = RecordingLink::new();
    let node = Node::start(
        NodeConfig {
            network_enabled: false,
            ..fast_config()
        },
        Arc::new(SimulatedTimer::new()),
        Box::new(ScriptedInput::constant(10)),
        Box::new(link.clone()),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(3), || node.stats().packets_skipped >= 5));
    assert!(link.sent().is_empty());

    node.set_network_enabled(true);
    assert!(wait_until(Duration::from_secs(3), || !link.sent().is_empty()));
}

#[test]
fn test_udp_loopback() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    let link = UdpLink::bind(
        "127.0.0.1:0".parse().unwrap(),
        receiver.local_addr().unwrap(),
    )
    .unwrap();

    let _node = Node::start(
        fast_config(),
        Arc::new(SimulatedTimer::new()),
        Box::new(ScriptedInput::constant(500)),
        Box::new(link),
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = receiver.recv_from(&mut buf).unwrap();
    let packet = WirePacket::parse(&buf[..len]).unwrap();
    assert_eq!(packet.node_id, sensornode_core::DEFAULT_NODE_ID);
    assert_eq!(packet.payload, Payload::Threshold(0));
}
