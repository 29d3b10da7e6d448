//! Timer interrupt handler
//!
//! Runs once per alarm in interrupt context: strictly non-blocking, no
//! allocation, no locks. Everything that could wait is either a `try_send`
//! that drops on overflow or a [`DeferredEvent`] for the worker thread.

use super::adc::AnalogInput;
use super::deferred::DeferredEvent;
use super::filter::ChannelFilters;
use super::timer::{AlarmSchedule, AlarmTimer};
use crate::processing::frame::SampleFrame;
use crate::state::{Flag, NodeState};
use crossbeam_channel::{Sender, TrySendError};
use std::sync::Arc;

/// What a single fire did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Pause requested: no sample taken, alarm left disarmed
    Paused,
    /// Sample frame placed on the sample queue
    Queued,
    /// Sample queue full (or gone); frame discarded
    Dropped,
}

/// State owned by the interrupt handler
pub struct SampleAcquisition {
    timer: Arc<dyn AlarmTimer>,
    input: Box<dyn AnalogInput>,
    filters: ChannelFilters,
    schedule: AlarmSchedule,
    state: Arc<NodeState>,
    samples: Sender<SampleFrame>,
    events: Sender<DeferredEvent>,
    counter: u32,
    fired: bool,
}

impl SampleAcquisition {
    pub fn new(
        timer: Arc<dyn AlarmTimer>,
        input: Box<dyn AnalogInput>,
        schedule: AlarmSchedule,
        state: Arc<NodeState>,
        samples: Sender<SampleFrame>,
        events: Sender<DeferredEvent>,
    ) -> Self {
        Self {
            timer,
            input,
            filters: ChannelFilters::new(),
            schedule,
            state,
            samples,
            events,
            counter: 0,
            fired: false,
        }
    }

    /// Counter value the next sample frame will carry
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Handle one alarm
    pub fn on_alarm(&mut self) -> TickOutcome {
        self.timer.clear_interrupt();
        let now = self.timer.counter();

        if !self.fired {
            self.fired = true;
            tracing::debug!(counter = now, "First timer interrupt");
        }

        if self.state.flags.take(Flag::PAUSE_SAMPLING) {
            if self.events.try_send(DeferredEvent::DisableTimer).is_err() {
                // Keep the request visible so the next caller sees it
                self.state.flags.set(Flag::PAUSE_SAMPLING);
            }
            return TickOutcome::Paused;
        }

        if self.state.flags.contains(Flag::NODE_ID_CHANGED)
            && self.state.claim_reload()
            && self.events.try_send(DeferredEvent::ReloadNodeId).is_err()
        {
            self.state.release_reload();
        }

        if self.state.flags.take(Flag::DEBUG_DUMP)
            && self.events.try_send(DeferredEvent::DebugDump).is_err()
        {
            self.state.flags.set(Flag::DEBUG_DUMP);
        }

        let raw = self.input.read_all();
        let frame = SampleFrame {
            node_id: self.state.node_id(),
            counter: self.counter,
            data: self.filters.filter(raw),
        };
        self.counter = self.counter.wrapping_add(1);
        self.state.stats.record_sample_captured();

        let outcome = match self.samples.try_send(frame) {
            Ok(()) => TickOutcome::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.state.stats.record_sample_dropped();
                tracing::trace!(counter = frame.counter, "Sample queue full, dropping frame");
                TickOutcome::Dropped
            }
        };

        self.schedule.arm(self.timer.as_ref(), now);
        outcome
    }
}
