//! Work posted from interrupt context
//!
//! The interrupt handler may not touch the timer's control registers or the
//! configuration store. It posts a [`DeferredEvent`] instead, and the
//! [`DeferredWorker`] thread carries it out.

use super::timer::AlarmTimer;
use crate::state::{Flag, NodeState};
use crate::storage::{self, ConfigStore};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capacity of the deferred event queue
pub const EVENT_QUEUE_CAPACITY: usize = 10;

/// Event posted by the interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredEvent {
    /// Pause the timer and disable its interrupt
    DisableTimer,
    /// Re-read the node id from the configuration store
    ReloadNodeId,
    /// Log node state and statistics
    DebugDump,
}

/// Consumer of [`DeferredEvent`]s
pub struct DeferredWorker {
    timer: Arc<dyn AlarmTimer>,
    state: Arc<NodeState>,
    store: Arc<dyn ConfigStore>,
}

impl DeferredWorker {
    pub fn new(
        timer: Arc<dyn AlarmTimer>,
        state: Arc<NodeState>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self { timer, state, store }
    }

    /// Carry out one event
    pub fn handle(&self, event: DeferredEvent) {
        match event {
            DeferredEvent::DisableTimer => self.disable_timer(),
            DeferredEvent::ReloadNodeId => self.reload_node_id(),
            DeferredEvent::DebugDump => self.debug_dump(),
        }
    }

    /// Hardware failures are logged only; sampling stays stopped either way
    /// because the handler did not re-arm the alarm.
    fn disable_timer(&self) {
        match self.timer.pause() {
            Ok(()) => tracing::info!("Sampling timer paused"),
            Err(e) => tracing::error!(error = %e, "Failed to pause sampling timer"),
        }
        if let Err(e) = self.timer.disable_interrupt() {
            tracing::error!(error = %e, "Failed to disable timer interrupt");
        }
    }

    fn reload_node_id(&self) {
        self.state.flags.clear(Flag::NODE_ID_CHANGED);
        let previous = self.state.node_id();
        let node_id = storage::load_node_id(self.store.as_ref());
        self.state.set_node_id(node_id);
        self.state.release_reload();
        tracing::info!(previous, node_id, "Node id reloaded");
    }

    fn debug_dump(&self) {
        let stats = self.state.stats.snapshot();
        tracing::info!(
            node_id = self.state.node_id(),
            flags = %self.state.flags,
            threshold_percent = self.state.threshold_percent(),
            timer_counter = self.timer.counter(),
            "Debug dump"
        );
        match serde_json::to_string(&stats) {
            Ok(json) => tracing::info!(stats = %json, "Debug dump statistics"),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize statistics"),
        }
    }

    /// Block on the event queue until `running` goes false or every sender
    /// is dropped
    pub fn run(self, events: Receiver<DeferredEvent>, running: Arc<AtomicBool>, poll: Duration) {
        tracing::info!("Deferred worker running");
        while running.load(Ordering::Acquire) {
            match events.recv_timeout(poll) {
                Ok(event) => {
                    tracing::debug!(?event, "Deferred event");
                    self.handle(event);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::info!("Deferred worker stopped");
    }
}
