//! Shared node state: sticky event flags and the few atomics every task reads
//!
//! Flags are level-triggered: a component sets a bit and whoever polls it
//! reacts on its next pass. Nothing here grants ownership of the data a flag
//! gates, so consumers must tolerate a flag flipping between their check and
//! their action.

use crate::stats::counters::NodeStats;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// One or more sticky event bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flag(u32);

impl Flag {
    /// Network association is up
    pub const NETWORK_READY: Flag = Flag(1 << 7);
    /// Datagram socket is bound and sends may be attempted
    pub const NETWORK_ENABLED: Flag = Flag(1 << 8);
    /// The configured node id has changed in the store
    pub const NODE_ID_CHANGED: Flag = Flag(1 << 9);
    /// Stop sampling (set before a firmware update)
    pub const PAUSE_SAMPLING: Flag = Flag(1 << 10);
    /// Calibration collection is running
    pub const CALIBRATING: Flag = Flag(1 << 11);
    /// Forward raw filtered samples instead of threshold bitmasks
    pub const RAW_MODE: Flag = Flag(1 << 12);
    /// Threshold percentage changed, thresholds must be recomputed
    pub const THRESHOLD_CHANGED: Flag = Flag(1 << 13);
    /// Log a diagnostic dump from the deferred worker
    pub const DEBUG_DUMP: Flag = Flag(1 << 14);

    const NAMES: [(Flag, &'static str); 8] = [
        (Flag::NETWORK_READY, "network-ready"),
        (Flag::NETWORK_ENABLED, "network-enabled"),
        (Flag::NODE_ID_CHANGED, "node-id-changed"),
        (Flag::PAUSE_SAMPLING, "pause-sampling"),
        (Flag::CALIBRATING, "calibrating"),
        (Flag::RAW_MODE, "raw-mode"),
        (Flag::THRESHOLD_CHANGED, "threshold-changed"),
        (Flag::DEBUG_DUMP, "debug-dump"),
    ];

    /// Raw bit pattern
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Flag {
    type Output = Flag;

    fn bitor(self, rhs: Flag) -> Flag {
        Flag(self.0 | rhs.0)
    }
}

/// Atomic set of sticky event bits shared across the node
#[derive(Debug, Default)]
pub struct EventFlags(AtomicU32);

impl EventFlags {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Set the given bits, returning the previous bit pattern
    pub fn set(&self, flag: Flag) -> u32 {
        self.0.fetch_or(flag.0, Ordering::AcqRel)
    }

    /// Clear the given bits, returning the previous bit pattern
    pub fn clear(&self, flag: Flag) -> u32 {
        self.0.fetch_and(!flag.0, Ordering::AcqRel)
    }

    /// Set or clear depending on `on`
    pub fn assign(&self, flag: Flag, on: bool) {
        if on {
            self.set(flag);
        } else {
            self.clear(flag);
        }
    }

    /// True when every bit of `flag` is set
    pub fn contains(&self, flag: Flag) -> bool {
        self.0.load(Ordering::Acquire) & flag.0 == flag.0
    }

    /// Clear the bits and report whether all of them were set beforehand
    pub fn take(&self, flag: Flag) -> bool {
        self.clear(flag) & flag.0 == flag.0
    }

    /// Current bit pattern
    pub fn bits(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Names of the currently set flags, for logging
    pub fn names(&self) -> Vec<&'static str> {
        let bits = self.bits();
        Flag::NAMES
            .iter()
            .filter(|(flag, _)| bits & flag.0 != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for EventFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// State shared by the interrupt handler and every task
///
/// Handed out as an `Arc<NodeState>` at construction. Calibration arrays are
/// not in here; they belong to the calibration engine alone.
#[derive(Debug)]
pub struct NodeState {
    /// Sticky event flags
    pub flags: EventFlags,
    /// Pipeline counters
    pub stats: NodeStats,
    node_id: AtomicU8,
    threshold_percent: AtomicU8,
    /// Bumped on every calibration start so a stop/start pair that happens
    /// between two frames still forces a reset
    calibration_epoch: AtomicU32,
    /// A `ReloadNodeId` event is queued and not yet handled
    reload_pending: AtomicBool,
}

impl NodeState {
    pub fn new(node_id: u8, threshold_percent: u8) -> Self {
        Self {
            flags: EventFlags::new(),
            stats: NodeStats::default(),
            node_id: AtomicU8::new(node_id),
            threshold_percent: AtomicU8::new(threshold_percent.min(100)),
            calibration_epoch: AtomicU32::new(0),
            reload_pending: AtomicBool::new(false),
        }
    }

    /// Node id stamped on every sample frame
    pub fn node_id(&self) -> u8 {
        self.node_id.load(Ordering::Acquire)
    }

    pub fn set_node_id(&self, id: u8) {
        self.node_id.store(id, Ordering::Release);
    }

    /// Threshold percentage (0-100) applied when thresholds are computed
    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent.load(Ordering::Acquire)
    }

    /// Store a new percentage and raise [`Flag::THRESHOLD_CHANGED`] if it differs
    ///
    /// Values above 100 are clamped. Returns true when the value changed.
    pub fn update_threshold_percent(&self, percent: u8) -> bool {
        let percent = percent.min(100);
        let previous = self.threshold_percent.swap(percent, Ordering::AcqRel);
        if previous != percent {
            self.flags.set(Flag::THRESHOLD_CHANGED);
            true
        } else {
            false
        }
    }

    /// Raise [`Flag::CALIBRATING`] and start a new calibration epoch
    pub fn begin_calibration(&self) {
        self.calibration_epoch.fetch_add(1, Ordering::AcqRel);
        self.flags.set(Flag::CALIBRATING);
    }

    /// Drop [`Flag::CALIBRATING`]; thresholds are derived on the next frame
    pub fn end_calibration(&self) {
        self.flags.clear(Flag::CALIBRATING);
    }

    pub fn calibration_epoch(&self) -> u32 {
        self.calibration_epoch.load(Ordering::Acquire)
    }

    /// Claim the single outstanding node-id reload slot
    ///
    /// Returns true if the caller should post the event.
    pub fn claim_reload(&self) -> bool {
        !self.reload_pending.swap(true, Ordering::AcqRel)
    }

    /// Release the reload slot once the event is handled (or failed to post)
    pub fn release_reload(&self) {
        self.reload_pending.store(false, Ordering::Release);
    }
}
