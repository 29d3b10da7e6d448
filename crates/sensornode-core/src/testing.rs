//! Test doubles for the hardware and network seams
//!
//! Used by the unit tests, the integration tests under `tests/`, and
//! anything else that wants to drive the pipeline by hand.

use crate::acquisition::adc::AnalogInput;
use crate::acquisition::timer::{AlarmTimer, InterruptSource, TimerError};
use crate::net::link::DatagramLink;
use crate::CHANNEL_COUNT;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Timer that records register writes instead of counting
#[derive(Debug, Default)]
pub struct MockTimer {
    counter: AtomicU64,
    alarms: Mutex<Vec<u64>>,
    alarm_armed: AtomicBool,
    counting: AtomicBool,
    interrupt_enabled: AtomicBool,
    interrupts_cleared: AtomicUsize,
    fail_pause: AtomicBool,
    fail_disable_interrupt: AtomicBool,
    requested_fires: AtomicUsize,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value `counter()` returns from now on
    pub fn set_counter(&self, ticks: u64) {
        self.counter.store(ticks, Ordering::Release);
    }

    /// Every alarm value written, in order
    pub fn alarms(&self) -> Vec<u64> {
        self.alarms.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn is_alarm_armed(&self) -> bool {
        self.alarm_armed.load(Ordering::Acquire)
    }

    pub fn is_counting(&self) -> bool {
        self.counting.load(Ordering::Acquire)
    }

    pub fn is_interrupt_enabled(&self) -> bool {
        self.interrupt_enabled.load(Ordering::Acquire)
    }

    pub fn interrupts_cleared(&self) -> usize {
        self.interrupts_cleared.load(Ordering::Relaxed)
    }

    /// Queue one alarm fire for the attached handler
    ///
    /// The fire is delivered once the alarm is armed, the interrupt enabled
    /// and the counter running.
    pub fn fire(&self) {
        self.requested_fires.fetch_add(1, Ordering::AcqRel);
    }

    /// Fires queued but not yet delivered
    pub fn pending_fires(&self) -> usize {
        self.requested_fires.load(Ordering::Acquire)
    }

    fn deliverable(&self) -> bool {
        self.is_counting() && self.is_interrupt_enabled() && self.is_alarm_armed()
    }

    /// Make `pause()` report a hardware error
    pub fn fail_pause(&self, fail: bool) {
        self.fail_pause.store(fail, Ordering::Release);
    }

    /// Make `disable_interrupt()` report a hardware error
    pub fn fail_disable_interrupt(&self, fail: bool) {
        self.fail_disable_interrupt.store(fail, Ordering::Release);
    }
}

impl AlarmTimer for MockTimer {
    fn clear_interrupt(&self) {
        self.interrupts_cleared.fetch_add(1, Ordering::Relaxed);
        self.alarm_armed.store(false, Ordering::Release);
    }

    fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn set_alarm(&self, ticks: u64) {
        if let Ok(mut alarms) = self.alarms.lock() {
            alarms.push(ticks);
        }
    }

    fn enable_alarm(&self) {
        self.alarm_armed.store(true, Ordering::Release);
    }

    fn pause(&self) -> Result<(), TimerError> {
        if self.fail_pause.load(Ordering::Acquire) {
            return Err(TimerError::Hardware {
                operation: "pause",
                reason: "injected failure".into(),
            });
        }
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
        if self.fail_disable_interrupt.load(Ordering::Acquire) {
            return Err(TimerError::Hardware {
                operation: "disable interrupt",
                reason: "injected failure".into(),
            });
        }
        self.interrupt_enabled.store(false, Ordering::Release);
        Ok(())
    }
}

impl InterruptSource for MockTimer {
    fn attach(
        self: Arc<Self>,
        running: Arc<AtomicBool>,
        mut handler: Box<dyn FnMut() + Send>,
    ) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("timer-isr".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    let claimed = self.deliverable()
                        && self
                            .requested_fires
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                            .is_ok();
                    if claimed {
                        handler();
                    } else {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            })
    }
}

/// Analog input replaying a fixed list of readings
///
/// Each `read_all` consumes one entry; the last entry repeats once the list
/// runs out. An empty list reads zeros.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    frames: VecDeque<[u16; CHANNEL_COUNT]>,
    current: [u16; CHANNEL_COUNT],
}

impl ScriptedInput {
    pub fn new(frames: Vec<[u16; CHANNEL_COUNT]>) -> Self {
        Self {
            frames: frames.into(),
            current: [0; CHANNEL_COUNT],
        }
    }

    /// Same reading on every channel, every tick
    pub fn constant(value: u16) -> Self {
        Self::new(vec![[value; CHANNEL_COUNT]])
    }
}

impl AnalogInput for ScriptedInput {
    fn read(&mut self, channel: usize) -> u16 {
        self.current.get(channel).copied().unwrap_or(0)
    }

    fn read_all(&mut self) -> [u16; CHANNEL_COUNT] {
        if self.frames.len() > 1 {
            if let Some(next) = self.frames.pop_front() {
                self.current = next;
            }
        } else if let Some(&last) = self.frames.front() {
            self.current = last;
        }
        self.current
    }
}

/// Link that keeps every datagram in memory
///
/// Clones share the same record, so a test can keep one clone while the
/// transmit task owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    attempts: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Datagrams delivered so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Calls to `send`, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Make every subsequent send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }
}

impl DatagramLink for RecordingLink {
    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "injected failure"));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "recording lock poisoned"))?;
        sent.push(payload.to_vec());
        Ok(payload.len())
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}
