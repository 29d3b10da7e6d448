//! E2E tests for the wire format
//!
//! Drives a sample frame through the calibration engine and the framer and
//! checks the exact bytes, with the checksum recomputed independently of the
//! `crc` crate.

use sensornode::processing::calibration::CalibrationEngine;
use sensornode::processing::frame::{OutputFrame, SampleFrame};
use sensornode::protocol::checksum;
use sensornode::protocol::packet::{Payload, WirePacket};
use sensornode::storage::MemoryStore;
use sensornode::{ConfigKey, ConfigStore, NodeState, CHANNEL_COUNT};
use std::sync::Arc;

/// Plain shift-register CRC-8, polynomial 0x07, init 0
fn reference_crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn engine_with_thresholds(threshold: u16) -> CalibrationEngine {
    let store = Arc::new(MemoryStore::new());
    for c in 0..CHANNEL_COUNT {
        store.set(ConfigKey::Threshold(c), threshold).unwrap();
    }
    CalibrationEngine::new(Arc::new(NodeState::new(5, 50)), store)
}

#[test]
fn test_threshold_packet_bytes() {
    let mut engine = engine_with_thresholds(100);
    let frame = SampleFrame {
        node_id: 5,
        counter: 7,
        data: [50, 4095, 0, 2048],
    };

    let output = engine.process(&frame).expect("thresholding emits a frame");
    let packet = output.to_packet();
    let bytes = packet.as_bytes();

    // Channels 1 and 3 are above 100, channels 0 and 2 are not
    assert_eq!(bytes.len(), 6);
    assert_eq!(&bytes[..5], &[0x53, 0x02, 0x05, 0x07, 0x0A]);
    assert_eq!(bytes[5], reference_crc8(&bytes[1..=4]));
    assert!(checksum::verify(bytes));
}

#[test]
fn test_threshold_packet_counter_is_low_byte() {
    let mut engine = engine_with_thresholds(100);
    let frame = SampleFrame {
        node_id: 9,
        counter: 0x0001_0203,
        data: [0; CHANNEL_COUNT],
    };
    let packet = engine.process(&frame).unwrap().to_packet();
    assert_eq!(packet.as_bytes()[3], 0x03);
    assert_eq!(packet.as_bytes()[4], 0x00);
}

#[test]
fn test_raw_packet_bytes() {
    let frame = SampleFrame {
        node_id: 10,
        counter: 300,
        data: [0x0123, 0x0FFF, 0x0000, 0x0800],
    };
    let packet = OutputFrame::Raw(frame).to_packet();
    let bytes = packet.as_bytes();

    assert_eq!(bytes.len(), 13);
    assert_eq!(
        &bytes[..12],
        &[0x53, 0x09, 0x0A, 0x2C, 0x23, 0x01, 0xFF, 0x0F, 0x00, 0x00, 0x00, 0x08]
    );
    assert_eq!(bytes[12], reference_crc8(&bytes[1..=11]));
}

#[test]
fn test_receiver_accepts_node_output() {
    let frame = SampleFrame {
        node_id: 10,
        counter: 42,
        data: [1, 2, 3, 4],
    };
    let decoded = WirePacket::parse(OutputFrame::Raw(frame).to_packet().as_bytes()).unwrap();
    assert_eq!(decoded.node_id, 10);
    assert_eq!(decoded.counter, 42);
    assert_eq!(decoded.payload, Payload::Raw([1, 2, 3, 4]));
}

#[test]
fn test_receiver_rejects_flipped_bit() {
    let mut engine = engine_with_thresholds(100);
    let frame = SampleFrame {
        node_id: 5,
        counter: 7,
        data: [50, 4095, 0, 2048],
    };
    let mut bytes = engine.process(&frame).unwrap().to_packet().into_bytes();
    bytes[4] ^= 0x01;
    assert!(WirePacket::parse(&bytes).is_err());
}
