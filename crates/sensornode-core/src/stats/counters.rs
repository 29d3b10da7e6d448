//! Atomic pipeline counters
//!
//! Every stage that absorbs a failure (full queue, failed send) counts it here
//! instead of propagating it. The interrupt handler only touches relaxed
//! atomics, so recording never blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by all pipeline stages
#[derive(Debug, Default)]
pub struct NodeStats {
    samples_captured: AtomicU64,
    samples_dropped: AtomicU64,
    frames_processed: AtomicU64,
    packets_queued: AtomicU64,
    packets_dropped: AtomicU64,
    packets_sent: AtomicU64,
    packets_skipped: AtomicU64,
    send_failures: AtomicU64,
    keepalives_sent: AtomicU64,
}

/// Point-in-time copy of [`NodeStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Sample frames the interrupt handler built
    pub samples_captured: u64,
    /// Sample frames discarded because the sample queue was full
    pub samples_dropped: u64,
    /// Sample frames the calibration engine consumed
    pub frames_processed: u64,
    /// Packets placed on the transmit queue
    pub packets_queued: u64,
    /// Packets discarded because the transmit queue was full
    pub packets_dropped: u64,
    /// Packets handed to the socket successfully
    pub packets_sent: u64,
    /// Packets discarded because the network was not enabled
    pub packets_skipped: u64,
    /// Socket sends that reported an error
    pub send_failures: u64,
    /// Keep-alive datagrams sent while idle
    pub keepalives_sent: u64,
}

impl StatsSnapshot {
    /// Share of captured samples lost at the sample queue, in percent
    pub fn sample_drop_percent(&self) -> f64 {
        if self.samples_captured == 0 {
            return 0.0;
        }
        self.samples_dropped as f64 * 100.0 / self.samples_captured as f64
    }
}

impl NodeStats {
    pub fn record_sample_captured(&self) {
        self.samples_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_processed(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_queued(&self) {
        self.packets_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_skipped(&self) {
        self.packets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keepalive(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            taken_at: Utc::now(),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            packets_queued: self.packets_queued.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_skipped: self.packets_skipped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snap = NodeStats::default().snapshot();
        assert_eq!(snap.samples_captured, 0);
        assert_eq!(snap.packets_sent, 0);
        assert_eq!(snap.sample_drop_percent(), 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = NodeStats::default();
        for _ in 0..4 {
            stats.record_sample_captured();
        }
        stats.record_sample_dropped();
        stats.record_keepalive();
        stats.record_send_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.samples_captured, 4);
        assert_eq!(snap.samples_dropped, 1);
        assert_eq!(snap.keepalives_sent, 1);
        assert_eq!(snap.send_failures, 1);
        assert!((snap.sample_drop_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = NodeStats::default();
        stats.record_packet_sent();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["packets_sent"], 1);
        assert!(json["taken_at"].is_string());
    }
}
