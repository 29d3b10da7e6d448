//! Node runtime
//!
//! Wires the bounded queues, spawns one named thread per task and hands back
//! a [`NodeHandle`]. The handle is also the control surface the
//! configuration page and the update downloader use on the device: every
//! control call only writes the store and raises sticky flags, the tasks pick
//! the change up on their next pass.
//!
//! ```text
//! timer-isr ──SampleFrame──▶ calibration ──WirePacket──▶ udp-tx ──▶ socket
//!     │
//!     └──DeferredEvent──▶ deferred-work
//! ```

use crate::acquisition::adc::AnalogInput;
use crate::acquisition::deferred::{DeferredEvent, DeferredWorker, EVENT_QUEUE_CAPACITY};
use crate::acquisition::isr::SampleAcquisition;
use crate::acquisition::timer::{
    AlarmSchedule, AlarmTimer, InterruptSource, SimulatedTimer, TimerError,
};
use crate::net::link::DatagramLink;
use crate::net::transmit::{Transmitter, DEFAULT_KEEPALIVE_AFTER};
use crate::processing::calibration::CalibrationEngine;
use crate::processing::frame::SampleFrame;
use crate::protocol::packet::WirePacket;
use crate::state::{Flag, NodeState};
use crate::stats::counters::StatsSnapshot;
use crate::storage::{self, ConfigKey, ConfigStore, StoreError};
use crate::DEFAULT_SAMPLE_RATE_HZ;
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Runtime parameters of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Timer interrupt rate (60 or 120 Hz in the field)
    pub sample_rate_hz: u32,
    /// Capacity of the interrupt-to-engine sample queue
    pub sample_queue_capacity: usize,
    /// Capacity of the engine-to-transmit packet queue
    pub packet_queue_capacity: usize,
    /// Capacity of the deferred event queue
    pub event_queue_capacity: usize,
    /// Calibration engine receive timeout
    pub engine_timeout: Duration,
    /// Transmit task receive timeout
    pub transmit_timeout: Duration,
    /// Deferred worker receive timeout
    pub deferred_timeout: Duration,
    /// Transmit timeouts before a keep-alive is sent
    pub keepalive_after: u32,
    /// Raise the network-ready and network-enabled flags at start
    pub network_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            sample_queue_capacity: 10,
            packet_queue_capacity: 10,
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            engine_timeout: Duration::from_secs(2),
            transmit_timeout: Duration::from_secs(5),
            deferred_timeout: Duration::from_secs(1),
            keepalive_after: DEFAULT_KEEPALIVE_AFTER,
            network_enabled: true,
        }
    }
}

/// Errors from [`NodeHandle`] control calls
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Threshold percentage must be 0-100, got {0}")]
    InvalidPercent(u8),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// Entry point for starting a node
pub struct Node;

impl Node {
    /// Start all tasks and the timer
    ///
    /// # Arguments
    /// * `config` - Rates, queue sizes and timeouts
    /// * `timer` - Timer peripheral; whatever runs its attached handler is the
    ///   interrupt context
    /// * `input` - Analog channels
    /// * `link` - Datagram link to the primary remote
    /// * `store` - Configuration store (node id, threshold, calibration)
    pub fn start<T: InterruptSource>(
        config: NodeConfig,
        timer: Arc<T>,
        input: Box<dyn AnalogInput>,
        link: Box<dyn DatagramLink>,
        store: Arc<dyn ConfigStore>,
    ) -> anyhow::Result<NodeHandle<T>> {
        let schedule = AlarmSchedule::from_rate(config.sample_rate_hz)
            .context("Invalid sample rate")?;

        let node_id = storage::load_node_id(store.as_ref());
        let threshold_percent = storage::load_threshold_percent(store.as_ref());
        let state = Arc::new(NodeState::new(node_id, threshold_percent));
        if config.network_enabled {
            state.flags.set(Flag::NETWORK_READY | Flag::NETWORK_ENABLED);
        }

        tracing::info!(
            node_id,
            threshold_percent,
            rate_hz = config.sample_rate_hz,
            period_ticks = schedule.period_ticks,
            link = %link.describe(),
            "Starting node"
        );

        let running = Arc::new(AtomicBool::new(true));
        let (sample_tx, sample_rx) =
            crossbeam_channel::bounded::<SampleFrame>(config.sample_queue_capacity);
        let (packet_tx, packet_rx) =
            crossbeam_channel::bounded::<WirePacket>(config.packet_queue_capacity);
        let (event_tx, event_rx) =
            crossbeam_channel::bounded::<DeferredEvent>(config.event_queue_capacity);

        let mut handle = NodeHandle {
            state: Arc::clone(&state),
            timer: Arc::clone(&timer),
            store: Arc::clone(&store),
            schedule,
            running: Arc::clone(&running),
            driver: None,
            tasks: Vec::new(),
        };

        // Consumers first so nothing is queued into the void
        let worker = DeferredWorker::new(
            Arc::clone(&timer) as Arc<dyn AlarmTimer>,
            Arc::clone(&state),
            Arc::clone(&store),
        );
        let flag = Arc::clone(&running);
        let poll = config.deferred_timeout;
        handle
            .tasks
            .push(spawn_task("deferred-work", move || worker.run(event_rx, flag, poll))?);

        let engine = CalibrationEngine::new(Arc::clone(&state), Arc::clone(&store));
        let flag = Arc::clone(&running);
        let timeout = config.engine_timeout;
        handle.tasks.push(spawn_task("calibration", move || {
            engine.run(sample_rx, packet_tx, flag, timeout)
        })?);

        let transmitter = Transmitter::new(link, Arc::clone(&state), config.keepalive_after);
        let flag = Arc::clone(&running);
        let timeout = config.transmit_timeout;
        handle.tasks.push(spawn_task("udp-tx", move || {
            transmitter.run(packet_rx, flag, timeout)
        })?);

        let mut isr = SampleAcquisition::new(
            Arc::clone(&timer) as Arc<dyn AlarmTimer>,
            input,
            schedule,
            Arc::clone(&state),
            sample_tx,
            event_tx,
        );
        schedule.arm(timer.as_ref(), timer.counter());
        timer.enable_interrupt().context("Failed to enable timer interrupt")?;
        timer.start().context("Failed to start timer")?;
        let driver = Arc::clone(&timer)
            .attach(
                Arc::clone(&running),
                Box::new(move || {
                    isr.on_alarm();
                }),
            )
            .context("Failed to attach timer interrupt handler")?;
        handle.driver = Some(driver);

        tracing::info!("Node started");
        Ok(handle)
    }
}

/// Spawn a named task thread that logs instead of propagating a panic
fn spawn_task<F>(name: &str, body: F) -> anyhow::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let task = name.to_string();
    std::thread::Builder::new()
        .name(task.clone())
        .spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
            if let Err(panic_info) = result {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!(task = %task, panic = %msg, "Task thread PANICKED");
            }
        })
        .with_context(|| format!("Failed to spawn {} thread", name))
}

/// Control handle of a running node
///
/// Dropping the handle stops the node.
pub struct NodeHandle<T: InterruptSource = SimulatedTimer> {
    state: Arc<NodeState>,
    timer: Arc<T>,
    store: Arc<dyn ConfigStore>,
    schedule: AlarmSchedule,
    running: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: InterruptSource> NodeHandle<T> {
    /// Shared state (flags, node id, counters)
    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    pub fn node_id(&self) -> u8 {
        self.state.node_id()
    }

    pub fn timer(&self) -> &Arc<T> {
        &self.timer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Store a new node id; the interrupt handler schedules the reload
    pub fn set_node_id(&self, node_id: u8) -> Result<(), ControlError> {
        self.store.set(ConfigKey::NodeId, u16::from(node_id))?;
        self.state.flags.set(Flag::NODE_ID_CHANGED);
        tracing::info!(node_id, "Node id change requested");
        Ok(())
    }

    pub fn start_calibration(&self) {
        tracing::info!("Calibration start requested");
        self.state.begin_calibration();
    }

    pub fn stop_calibration(&self) {
        tracing::info!("Calibration stop requested");
        self.state.end_calibration();
    }

    pub fn set_raw_mode(&self, on: bool) {
        self.state.flags.assign(Flag::RAW_MODE, on);
    }

    /// Change the threshold percentage
    ///
    /// Returns whether the value changed. Thresholds are recomputed by the
    /// engine on its next frame.
    pub fn set_threshold_percent(&self, percent: u8) -> Result<bool, ControlError> {
        if percent > 100 {
            return Err(ControlError::InvalidPercent(percent));
        }
        Ok(self.state.update_threshold_percent(percent))
    }

    /// Ask the interrupt handler to stop sampling (before a firmware update)
    pub fn pause_sampling(&self) {
        tracing::info!("Sampling pause requested");
        self.state.flags.set(Flag::PAUSE_SAMPLING);
    }

    /// Re-arm and restart the timer after a pause
    pub fn resume_sampling(&self) -> Result<(), ControlError> {
        self.state.flags.clear(Flag::PAUSE_SAMPLING);
        self.schedule
            .arm(self.timer.as_ref(), self.timer.counter());
        self.timer.enable_interrupt()?;
        self.timer.start()?;
        tracing::info!("Sampling resumed");
        Ok(())
    }

    pub fn request_debug_dump(&self) {
        self.state.flags.set(Flag::DEBUG_DUMP);
    }

    pub fn set_network_enabled(&self, enabled: bool) {
        self.state.flags.assign(Flag::NETWORK_ENABLED, enabled);
        tracing::info!(enabled, "Network enabled changed");
    }

    /// Stop every task and wait for the threads
    ///
    /// The timer driver goes first; dropping the interrupt handler closes the
    /// queues, which lets each task drain and exit without waiting out its
    /// receive timeout.
    pub fn stop(&mut self) {
        if self.driver.is_none() && self.tasks.is_empty() {
            return;
        }
        self.running.store(false, Ordering::Release);
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
        for task in self.tasks.drain(..) {
            let _ = task.join();
        }
        tracing::info!("Node stopped");
    }
}

impl<T: InterruptSource> Drop for NodeHandle<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::{MockTimer, RecordingLink, ScriptedInput};
    use std::time::Instant;

    fn fast_config() -> NodeConfig {
        NodeConfig {
            sample_rate_hz: 200,
            engine_timeout: Duration::from_millis(50),
            transmit_timeout: Duration::from_millis(50),
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

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.sample_rate_hz, 60);
        assert_eq!(config.sample_queue_capacity, 10);
        assert_eq!(config.engine_timeout, Duration::from_secs(2));
        assert_eq!(config.transmit_timeout, Duration::from_secs(5));
        assert_eq!(config.keepalive_after, 24);
    }

    #[test]
    fn test_start_rejects_bad_rate() {
        let result = Node::start(
            NodeConfig {
                sample_rate_hz: 0,
                ..fast_config()
            },
            Arc::new(SimulatedTimer::new()),
            Box::new(ScriptedInput::constant(0)),
            Box::new(RecordingLink::new()),
            Arc::new(MemoryStore::new()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_node_sends_threshold_packets() {
        let link = RecordingLink::new();
        let store = Arc::new(MemoryStore::new());
        let mut node = Node::start(
            fast_config(),
            Arc::new(SimulatedTimer::new()),
            Box::new(ScriptedInput::constant(1000)),
            Box::new(link.clone()),
            store.clone(),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || link.sent().len() >= 5));
        node.stop();
        assert!(!node.is_running());

        let sent = link.sent();
        assert!(sent.iter().all(|p| p.len() == 6 && p[0] == 0x53 && p[2] == 10));
        assert_eq!(store.get(ConfigKey::NodeId), Some(10));
        let stats = node.stats();
        assert!(stats.samples_captured >= 5);
        assert!(stats.packets_sent >= 5);
    }

    #[test]
    fn test_control_calls() {
        let link = RecordingLink::new();
        let store = Arc::new(MemoryStore::new());
        let node = Node::start(
            fast_config(),
            Arc::new(SimulatedTimer::new()),
            Box::new(ScriptedInput::constant(1000)),
            Box::new(link.clone()),
            store.clone(),
        )
        .unwrap();

        assert!(matches!(
            node.set_threshold_percent(101),
            Err(ControlError::InvalidPercent(101))
        ));
        assert!(node.set_threshold_percent(60).unwrap());

        node.set_node_id(33).unwrap();
        assert!(wait_until(Duration::from_secs(2), || node.node_id() == 33));

        node.set_raw_mode(true);
        assert!(wait_until(Duration::from_secs(2), || {
            link.sent().last().map(|p| p.len()) == Some(13)
        }));
    }

    #[test]
    fn test_pause_and_resume() {
        let link = RecordingLink::new();
        let node = Node::start(
            fast_config(),
            Arc::new(SimulatedTimer::new()),
            Box::new(ScriptedInput::constant(1000)),
            Box::new(link.clone()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        assert!(wait_until(Duration::from_secs(2), || node.stats().samples_captured > 0));
        node.pause_sampling();
        assert!(wait_until(Duration::from_secs(2), || !node.timer().is_counting()));
        let paused_at = node.stats().samples_captured;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(node.stats().samples_captured, paused_at);

        node.resume_sampling().unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            node.stats().samples_captured > paused_at
        }));
    }

    #[test]
    fn test_node_runs_on_any_interrupt_source() {
        let link = RecordingLink::new();
        let timer = Arc::new(MockTimer::new());
        timer.set_counter(1_000);
        let mut node = Node::start(
            fast_config(),
            Arc::clone(&timer),
            Box::new(ScriptedInput::constant(1000)),
            Box::new(link.clone()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        assert!(timer.is_counting());
        assert!(timer.is_interrupt_enabled());
        for _ in 0..3 {
            timer.fire();
        }
        assert!(wait_until(Duration::from_secs(2), || {
            node.stats().samples_captured == 3
        }));
        node.stop();

        // Initial arm plus one re-arm per fire, all from the frozen counter
        let period = AlarmSchedule::from_rate(200).unwrap().period_ticks;
        let expected = 1_000 + period - 7;
        assert_eq!(timer.alarms(), vec![expected; 4]);
        assert_eq!(timer.interrupts_cleared(), 3);
    }
}
