//! Alarm timer peripheral
//!
//! The interrupt handler drives a free-running up-counter with a single
//! alarm: on every fire it snapshots the counter, writes the next alarm value
//! and re-arms. [`AlarmTimer`] is the register-level surface it needs;
//! [`SimulatedTimer`] is the host stand-in that fires the handler from a
//! dedicated thread, the way an audio driver calls a real-time callback.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Timer group source clock
pub const TIMER_BASE_CLOCK_HZ: u64 = 80_000_000;

/// Prescaler applied to the source clock
pub const TIMER_DIVIDER: u64 = 16;

/// Counter rate after the prescaler (5 MHz, 0.2 µs per tick)
pub const TIMER_TICK_HZ: u64 = TIMER_BASE_CLOCK_HZ / TIMER_DIVIDER;

/// Fixed interrupt latency compensation: 1.4 µs
pub const FINE_ADJUST_TICKS: u64 = 7;

/// Longest the simulated driver sleeps before re-checking its state
const DRIVER_POLL: Duration = Duration::from_millis(2);

/// Counter ticks covered by `elapsed`
///
/// Widened to `u128` so multi-hour runs don't overflow; saturates at
/// `u64::MAX`.
pub fn ticks_in(elapsed: Duration) -> u64 {
    let ticks = elapsed.as_nanos() * u128::from(TIMER_TICK_HZ) / 1_000_000_000;
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// Wall-clock time `ticks` counter ticks take
pub fn duration_of(ticks: u64) -> Duration {
    let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(TIMER_TICK_HZ);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("Timer {operation} failed: {reason}")]
    Hardware {
        operation: &'static str,
        reason: String,
    },

    #[error("Unsupported sample rate: {0} Hz")]
    InvalidRate(u32),
}

/// Register-level control of a periodic alarm timer
///
/// The first four operations are used from interrupt context and are assumed
/// to succeed. The rest are control-path operations that may fail.
pub trait AlarmTimer: Send + Sync {
    /// Acknowledge the pending alarm interrupt
    fn clear_interrupt(&self);

    /// Current counter value in ticks
    fn counter(&self) -> u64;

    /// Write the alarm compare value
    fn set_alarm(&self, ticks: u64);

    /// Arm the alarm; it disarms itself when it fires
    fn enable_alarm(&self);

    /// Stop the counter
    fn pause(&self) -> Result<(), TimerError>;

    /// Start (or resume) the counter
    fn start(&self) -> Result<(), TimerError>;

    fn enable_interrupt(&self) -> Result<(), TimerError>;

    fn disable_interrupt(&self) -> Result<(), TimerError>;
}

/// Alarm timer whose fires can run a handler
///
/// On hardware this is the interrupt vector; on the host it is a driver
/// thread. The node runtime only needs this and [`AlarmTimer`].
pub trait InterruptSource: AlarmTimer + 'static {
    /// Run `handler` once per alarm fire until `running` goes false
    fn attach(
        self: Arc<Self>,
        running: Arc<AtomicBool>,
        handler: Box<dyn FnMut() + Send>,
    ) -> std::io::Result<JoinHandle<()>>;
}

/// Alarm period derived from the sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmSchedule {
    pub period_ticks: u64,
    pub fine_adjust_ticks: u64,
}

impl AlarmSchedule {
    /// Schedule for `rate_hz` samples per second on a [`TIMER_TICK_HZ`] counter
    ///
    /// # Example
    /// ```
    /// use sensornode_core::acquisition::timer::AlarmSchedule;
    ///
    /// let schedule = AlarmSchedule::from_rate(60).unwrap();
    /// assert_eq!(schedule.period_ticks, 83_333);
    /// assert_eq!(schedule.next_alarm(1_000), 1_000 + 83_333 - 7);
    /// ```
    pub fn from_rate(rate_hz: u32) -> Result<Self, TimerError> {
        let rate = u64::from(rate_hz);
        if rate == 0 || rate * FINE_ADJUST_TICKS * 2 > TIMER_TICK_HZ {
            return Err(TimerError::InvalidRate(rate_hz));
        }
        Ok(Self {
            period_ticks: TIMER_TICK_HZ / rate,
            fine_adjust_ticks: FINE_ADJUST_TICKS,
        })
    }

    /// Alarm value following a fire observed at `current`
    pub fn next_alarm(&self, current: u64) -> u64 {
        current.wrapping_add(self.period_ticks - self.fine_adjust_ticks)
    }

    /// Write the next alarm after `current` and arm it
    pub fn arm(&self, timer: &dyn AlarmTimer, current: u64) -> u64 {
        let next = self.next_alarm(current);
        timer.set_alarm(next);
        timer.enable_alarm();
        next
    }

    /// Nominal wall-clock period
    pub fn period(&self) -> Duration {
        Duration::from_nanos(self.period_ticks * 1_000_000_000 / TIMER_TICK_HZ)
    }
}

/// Host simulation of the timer peripheral
///
/// The counter only advances while the timer is started. A driver thread
/// spawned with [`SimulatedTimer::spawn`] waits for the armed alarm in wall
/// clock time, then latches the counter at the alarm value and calls the
/// handler.
#[derive(Debug, Default)]
pub struct SimulatedTimer {
    counter: AtomicU64,
    alarm: AtomicU64,
    alarm_armed: AtomicBool,
    counting: AtomicBool,
    interrupt_enabled: AtomicBool,
    interrupt_pending: AtomicBool,
    fires: AtomicU64,
}

impl SimulatedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the handler has been called
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    pub fn is_counting(&self) -> bool {
        self.counting.load(Ordering::Acquire)
    }

    pub fn is_interrupt_enabled(&self) -> bool {
        self.interrupt_enabled.load(Ordering::Acquire)
    }

    pub fn is_alarm_armed(&self) -> bool {
        self.alarm_armed.load(Ordering::Acquire)
    }

    /// True until the handler acknowledges the last fire
    pub fn is_interrupt_pending(&self) -> bool {
        self.interrupt_pending.load(Ordering::Acquire)
    }

    fn live(&self) -> bool {
        self.is_counting() && self.is_interrupt_enabled() && self.is_alarm_armed()
    }

    /// Spawn the "timer-isr" driver thread
    ///
    /// `handler` runs on the driver thread once per alarm, standing in for the
    /// interrupt vector. The thread exits when `running` goes false.
    pub fn spawn<F>(
        self: &Arc<Self>,
        running: Arc<AtomicBool>,
        mut handler: F,
    ) -> std::io::Result<JoinHandle<()>>
    where
        F: FnMut() + Send + 'static,
    {
        let timer = Arc::clone(self);
        std::thread::Builder::new()
            .name("timer-isr".into())
            .spawn(move || {
                tracing::debug!("Timer driver thread running");
                // Wall-clock origin matching `base_ticks`, re-synced whenever
                // the timer comes back from an idle state
                let mut origin: Option<(Instant, u64)> = None;

                while running.load(Ordering::Acquire) {
                    if !timer.live() {
                        origin = None;
                        std::thread::sleep(DRIVER_POLL);
                        continue;
                    }

                    let (started, base_ticks) =
                        *origin.get_or_insert_with(|| (Instant::now(), timer.counter()));
                    let now_ticks = base_ticks.saturating_add(ticks_in(started.elapsed()));
                    let alarm = timer.alarm.load(Ordering::Acquire);

                    if now_ticks < alarm {
                        let remaining = duration_of(alarm - now_ticks);
                        std::thread::sleep(remaining.min(DRIVER_POLL));
                        continue;
                    }

                    timer.counter.store(alarm, Ordering::Release);
                    timer.alarm_armed.store(false, Ordering::Release);
                    timer.interrupt_pending.store(true, Ordering::Release);
                    timer.fires.fetch_add(1, Ordering::Relaxed);
                    handler();
                }
                tracing::debug!("Timer driver thread exited");
            })
    }
}

impl InterruptSource for SimulatedTimer {
    fn attach(
        self: Arc<Self>,
        running: Arc<AtomicBool>,
        handler: Box<dyn FnMut() + Send>,
    ) -> std::io::Result<JoinHandle<()>> {
        self.spawn(running, handler)
    }
}

impl AlarmTimer for SimulatedTimer {
    fn clear_interrupt(&self) {
        self.interrupt_pending.store(false, Ordering::Release);
    }

    fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn set_alarm(&self, ticks: u64) {
        self.alarm.store(ticks, Ordering::Release);
    }

    fn enable_alarm(&self) {
        self.alarm_armed.store(true, Ordering::Release);
    }

    fn pause(&self) -> Result<(), TimerError> {
        self.counting.store(false, Ordering::Release);
        Ok(())
    }

    fn start(&self) -> Result<(), TimerError> {
        self.counting.store(true, Ordering::Release);
        Ok(())
    }

    fn enable_interrupt(&self) -> Result<(), TimerError> {
        self.interrupt_enabled.store(true, Ordering::Release);
        Ok(())
    }

    fn disable_interrupt(&self) -> Result<(), TimerError> {
        self.interrupt_enabled.store(false, Ordering::Release);
        Ok(())
    }
}
