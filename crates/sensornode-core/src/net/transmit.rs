//! Transmit task
//!
//! Pulls framed packets off the transmit queue and hands them to the link.
//! Nothing is retried: reconnection belongs to the network layer, so a
//! failed send is logged, counted and forgotten.

use super::link::{DatagramLink, KEEPALIVE_PAYLOAD};
use crate::protocol::packet::WirePacket;
use crate::state::{Flag, NodeState};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receive timeouts without traffic before a keep-alive goes out
pub const DEFAULT_KEEPALIVE_AFTER: u32 = 24;

/// Result of one transmit-loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Packet sent; carries the byte count
    Sent(usize),
    /// Network not enabled, packet discarded
    Skipped,
    /// Link reported an error
    Failed,
    /// Idle threshold reached, keep-alive sent
    KeepAlive,
    /// Timed out, still below the idle threshold
    Idle,
}

pub struct Transmitter {
    link: Box<dyn DatagramLink>,
    state: Arc<NodeState>,
    keepalive_after: u32,
    idle_cycles: u32,
}

impl Transmitter {
    pub fn new(link: Box<dyn DatagramLink>, state: Arc<NodeState>, keepalive_after: u32) -> Self {
        Self {
            link,
            state,
            keepalive_after: keepalive_after.max(1),
            idle_cycles: 0,
        }
    }

    /// Consecutive receive timeouts since the last send attempt
    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    fn network_enabled(&self) -> bool {
        self.state.flags.contains(Flag::NETWORK_ENABLED)
    }

    /// Send one framed packet
    pub fn handle_packet(&mut self, packet: &WirePacket) -> TxOutcome {
        if !self.network_enabled() {
            self.state.stats.record_packet_skipped();
            tracing::trace!("Network not enabled, skipping packet");
            return TxOutcome::Skipped;
        }

        self.idle_cycles = 0;
        match self.link.send(packet.as_bytes()) {
            Ok(len) => {
                self.state.stats.record_packet_sent();
                TxOutcome::Sent(len)
            }
            Err(e) => {
                self.state.stats.record_send_failure();
                tracing::warn!(error = %e, link = %self.link.describe(), "Packet send failed");
                TxOutcome::Failed
            }
        }
    }

    /// Account for a receive timeout, sending a keep-alive when due
    pub fn handle_idle(&mut self) -> TxOutcome {
        self.idle_cycles += 1;
        if self.idle_cycles < self.keepalive_after {
            return TxOutcome::Idle;
        }

        self.idle_cycles = 0;
        if !self.network_enabled() {
            return TxOutcome::Idle;
        }

        tracing::info!(link = %self.link.describe(), "Sending keep-alive");
        match self.link.send(&KEEPALIVE_PAYLOAD) {
            Ok(_) => {
                self.state.stats.record_keepalive();
                TxOutcome::KeepAlive
            }
            Err(e) => {
                self.state.stats.record_send_failure();
                tracing::warn!(error = %e, "Keep-alive send failed");
                TxOutcome::Failed
            }
        }
    }

    /// Transmit loop; returns when `running` goes false or the queue closes
    pub fn run(mut self, packets: Receiver<WirePacket>, running: Arc<AtomicBool>, timeout: Duration) {
        tracing::info!(link = %self.link.describe(), "Transmit task running");
        while running.load(Ordering::Acquire) {
            match packets.recv_timeout(timeout) {
                Ok(packet) => {
                    self.handle_packet(&packet);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.handle_idle();
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::info!("Transmit task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::frame::ThresholdFrame;
    use crate::protocol::packet::frame_threshold;
    use crate::testing::RecordingLink;

    fn packet() -> WirePacket {
        frame_threshold(&ThresholdFrame {
            node_id: 5,
            counter: 7,
            bitmask: 0x0A,
        })
    }

    fn transmitter(link: &RecordingLink, enabled: bool) -> (Transmitter, Arc<NodeState>) {
        let state = Arc::new(NodeState::new(5, 50));
        state.flags.assign(Flag::NETWORK_ENABLED, enabled);
        let tx = Transmitter::new(Box::new(link.clone()), Arc::clone(&state), 3);
        (tx, state)
    }

    #[test]
    fn test_sends_when_enabled() {
        let link = RecordingLink::new();
        let (mut tx, state) = transmitter(&link, true);
        assert_eq!(tx.handle_packet(&packet()), TxOutcome::Sent(6));
        assert_eq!(link.sent(), vec![packet().into_bytes()]);
        assert_eq!(state.stats.snapshot().packets_sent, 1);
    }

    #[test]
    fn test_skips_when_disabled() {
        let link = RecordingLink::new();
        let (mut tx, state) = transmitter(&link, false);
        assert_eq!(tx.handle_packet(&packet()), TxOutcome::Skipped);
        assert!(link.sent().is_empty());
        assert_eq!(state.stats.snapshot().packets_skipped, 1);
    }

    #[test]
    fn test_failure_counted_not_retried() {
        let link = RecordingLink::new();
        link.fail_sends(true);
        let (mut tx, state) = transmitter(&link, true);
        assert_eq!(tx.handle_packet(&packet()), TxOutcome::Failed);
        assert_eq!(link.attempts(), 1);
        assert_eq!(state.stats.snapshot().send_failures, 1);
    }

    #[test]
    fn test_keepalive_after_idle_threshold() {
        let link = RecordingLink::new();
        let (mut tx, state) = transmitter(&link, true);
        assert_eq!(tx.handle_idle(), TxOutcome::Idle);
        assert_eq!(tx.handle_idle(), TxOutcome::Idle);
        assert_eq!(tx.handle_idle(), TxOutcome::KeepAlive);
        assert_eq!(tx.idle_cycles(), 0);
        assert_eq!(link.sent(), vec![KEEPALIVE_PAYLOAD.to_vec()]);
        assert_eq!(state.stats.snapshot().keepalives_sent, 1);
    }

    #[test]
    fn test_traffic_resets_idle_counter() {
        let link = RecordingLink::new();
        let (mut tx, _) = transmitter(&link, true);
        tx.handle_idle();
        tx.handle_idle();
        tx.handle_packet(&packet());
        assert_eq!(tx.idle_cycles(), 0);
        assert_eq!(tx.handle_idle(), TxOutcome::Idle);
    }

    #[test]
    fn test_no_keepalive_when_disabled() {
        let link = RecordingLink::new();
        let (mut tx, _) = transmitter(&link, false);
        for _ in 0..3 {
            assert_eq!(tx.handle_idle(), TxOutcome::Idle);
        }
        assert_eq!(link.attempts(), 0);
        assert_eq!(tx.idle_cycles(), 0);
    }

    #[test]
    fn test_run_drains_until_disconnect() {
        let link = RecordingLink::new();
        let (tx, state) = transmitter(&link, true);
        let (packet_tx, packet_rx) = crossbeam_channel::bounded(10);
        packet_tx.send(packet()).unwrap();
        packet_tx.send(packet()).unwrap();
        drop(packet_tx);

        tx.run(packet_rx, Arc::new(AtomicBool::new(true)), Duration::from_millis(10));
        assert_eq!(link.sent().len(), 2);
        assert_eq!(state.stats.snapshot().packets_sent, 2);
    }
}
