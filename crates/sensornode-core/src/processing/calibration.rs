//! Calibration and threshold engine
//!
//! Consumes sample frames and, per frame, picks one of three modes from the
//! event flags:
//!
//! | raw-mode | calibrating | mode           | output          |
//! |----------|-------------|----------------|-----------------|
//! | set      | any         | RawPassthrough | the sample      |
//! | clear    | set         | Calibrating    | nothing         |
//! | clear    | clear       | Thresholding   | bitmask frame   |
//!
//! Entering Calibrating resets the per-channel extremes. Leaving it (or a
//! threshold percentage change) derives the thresholds and persists them.
//! The calibration arrays live here and nowhere else.

use super::frame::{OutputFrame, SampleFrame, ThresholdFrame};
use crate::protocol::packet::WirePacket;
use crate::state::{EventFlags, Flag, NodeState};
use crate::storage::{self, ConfigKey, ConfigStore, StoreError};
use crate::CHANNEL_COUNT;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Threshold value that no 12-bit reading can exceed
pub const THRESHOLD_UNSET: u16 = 0xFFFF;

/// Engine mode for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    RawPassthrough,
    Calibrating,
    Thresholding,
}

impl EngineMode {
    /// Pick the mode from the current flags; raw mode wins over calibration
    pub fn select(flags: &EventFlags) -> Self {
        if flags.contains(Flag::RAW_MODE) {
            EngineMode::RawPassthrough
        } else if flags.contains(Flag::CALIBRATING) {
            EngineMode::Calibrating
        } else {
            EngineMode::Thresholding
        }
    }
}

/// Per-channel extremes and derived thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationState {
    pub max: [u16; CHANNEL_COUNT],
    pub min: [u16; CHANNEL_COUNT],
    pub threshold: [u16; CHANNEL_COUNT],
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            max: [0; CHANNEL_COUNT],
            min: [u16::MAX; CHANNEL_COUNT],
            threshold: [THRESHOLD_UNSET; CHANNEL_COUNT],
        }
    }
}

impl CalibrationState {
    /// Back to {max = 0, min = 0xFFFF, threshold = 0xFFFF}
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one sample into the extremes
    ///
    /// A reading updates at most one of max and min per tick.
    pub fn observe(&mut self, data: &[u16; CHANNEL_COUNT]) {
        for (c, &value) in data.iter().enumerate() {
            if value > self.max[c] {
                self.max[c] = value;
            } else if value < self.min[c] {
                self.min[c] = value;
            }
        }
    }

    /// `threshold = min + (max - min) * percent / 100`, per channel
    ///
    /// Channels that never saw both an upper and a lower reading
    /// (`max < min`) keep [`THRESHOLD_UNSET`].
    ///
    /// # Example
    /// ```
    /// use sensornode_core::processing::calibration::CalibrationState;
    ///
    /// let mut cal = CalibrationState::default();
    /// cal.observe(&[300; 4]);
    /// cal.observe(&[100; 4]);
    /// cal.compute_thresholds(50);
    /// assert_eq!(cal.threshold, [200; 4]);
    /// ```
    pub fn compute_thresholds(&mut self, percent: u8) {
        let percent = u32::from(percent.min(100));
        for c in 0..CHANNEL_COUNT {
            let (max, min) = (self.max[c], self.min[c]);
            self.threshold[c] = if max >= min {
                let span = u32::from(max - min) * percent / 100;
                min + span as u16
            } else {
                THRESHOLD_UNSET
            };
        }
    }

    /// Bit `c` set when `data[c] > threshold[c]`
    pub fn classify(&self, data: &[u16; CHANNEL_COUNT]) -> u8 {
        data.iter()
            .zip(self.threshold.iter())
            .enumerate()
            .filter(|(_, (value, threshold))| value > threshold)
            .fold(0u8, |mask, (c, _)| mask | (1 << c))
    }

    /// Load from the store, writing reset values back for missing keys
    pub fn load(store: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        let mut state = defaults;
        for c in 0..CHANNEL_COUNT {
            state.max[c] = storage::load_or_default(store, ConfigKey::CalibrationMax(c), defaults.max[c]);
            state.min[c] = storage::load_or_default(store, ConfigKey::CalibrationMin(c), defaults.min[c]);
            state.threshold[c] =
                storage::load_or_default(store, ConfigKey::Threshold(c), defaults.threshold[c]);
        }
        state
    }

    /// Write every channel's max, min and threshold
    ///
    /// Keeps going after a failed key; returns the number of failed writes.
    pub fn persist(&self, store: &dyn ConfigStore) -> usize {
        let mut failures = 0;
        for c in 0..CHANNEL_COUNT {
            let entries = [
                (ConfigKey::CalibrationMax(c), self.max[c]),
                (ConfigKey::CalibrationMin(c), self.min[c]),
                (ConfigKey::Threshold(c), self.threshold[c]),
            ];
            for (key, value) in entries {
                if let Err(e) = store.set(key, value) {
                    log_store_error(key, &e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn log_store_error(key: ConfigKey, e: &StoreError) {
    tracing::error!(key = %key, error = %e, "Failed to save calibration item");
}

/// Frame consumer running the raw / calibrating / thresholding state machine
pub struct CalibrationEngine {
    state: Arc<NodeState>,
    store: Arc<dyn ConfigStore>,
    calibration: CalibrationState,
    calibrating: bool,
    seen_epoch: u32,
}

impl CalibrationEngine {
    /// Create an engine with the calibration last persisted in `store`
    pub fn new(state: Arc<NodeState>, store: Arc<dyn ConfigStore>) -> Self {
        let calibration = CalibrationState::load(store.as_ref());
        tracing::info!(
            threshold = ?calibration.threshold,
            "Calibration loaded"
        );
        let seen_epoch = state.calibration_epoch();
        Self {
            state,
            store,
            calibration,
            calibrating: false,
            seen_epoch,
        }
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    /// Whether a calibration collection is in progress
    pub fn is_calibrating(&self) -> bool {
        self.calibrating
    }

    /// Run one frame through the state machine
    pub fn process(&mut self, frame: &SampleFrame) -> Option<OutputFrame> {
        match EngineMode::select(&self.state.flags) {
            EngineMode::RawPassthrough => Some(OutputFrame::Raw(*frame)),
            EngineMode::Calibrating => {
                let epoch = self.state.calibration_epoch();
                if !self.calibrating || epoch != self.seen_epoch {
                    self.calibration.reset();
                    self.calibrating = true;
                    self.seen_epoch = epoch;
                    tracing::info!(epoch, "Calibration started");
                }
                self.calibration.observe(&frame.data);
                None
            }
            EngineMode::Thresholding => {
                if self.calibrating {
                    self.calibrating = false;
                    // The recompute below uses the current percentage anyway
                    self.state.flags.clear(Flag::THRESHOLD_CHANGED);
                    tracing::info!(
                        max = ?self.calibration.max,
                        min = ?self.calibration.min,
                        "Calibration finished"
                    );
                    self.update_thresholds();
                } else if self.state.flags.take(Flag::THRESHOLD_CHANGED) {
                    self.update_thresholds();
                }
                let bitmask = self.calibration.classify(&frame.data);
                Some(OutputFrame::Threshold(ThresholdFrame::new(frame, bitmask)))
            }
        }
    }

    fn update_thresholds(&mut self) {
        let percent = self.state.threshold_percent();
        self.calibration.compute_thresholds(percent);
        tracing::info!(percent, threshold = ?self.calibration.threshold, "Thresholds updated");

        if let Err(e) = self.store.set(ConfigKey::ThresholdPercent, u16::from(percent)) {
            log_store_error(ConfigKey::ThresholdPercent, &e);
        }
        self.calibration.persist(self.store.as_ref());
    }

    /// Engine loop: sample queue in, framed packets out
    ///
    /// A receive timeout is a no-op iteration. A full transmit queue drops the
    /// packet. Returns when `running` goes false or the sample queue closes.
    pub fn run(
        mut self,
        samples: Receiver<SampleFrame>,
        packets: Sender<WirePacket>,
        running: Arc<AtomicBool>,
        timeout: Duration,
    ) {
        tracing::info!("Calibration engine running");
        while running.load(Ordering::Acquire) {
            let frame = match samples.recv_timeout(timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.state.stats.record_frame_processed();

            let Some(output) = self.process(&frame) else {
                continue;
            };
            match packets.try_send(output.to_packet()) {
                Ok(()) => self.state.stats.record_packet_queued(),
                Err(TrySendError::Full(_)) => {
                    self.state.stats.record_packet_dropped();
                    tracing::trace!(counter = frame.counter, "Transmit queue full, dropping packet");
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        tracing::info!("Calibration engine stopped");
    }
}
