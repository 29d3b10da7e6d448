//! Analog inputs
//!
//! [`AnalogInput`] is what the interrupt handler reads once per channel per
//! tick. [`SimulatedAdc`] produces slow pressure-like waveforms with a bit of
//! noise so the host binary has something to calibrate against.

use crate::{ADC_MAX, CHANNEL_COUNT};
use std::f64::consts::TAU;

/// One-shot conversions on the physical channels
///
/// Readings are 12-bit (`0..=ADC_MAX`). Implementations must not block; they
/// are called from interrupt context.
pub trait AnalogInput: Send {
    /// Convert one channel
    fn read(&mut self, channel: usize) -> u16;

    /// Convert every channel in order
    fn read_all(&mut self) -> [u16; CHANNEL_COUNT] {
        let mut values = [0u16; CHANNEL_COUNT];
        for (channel, value) in values.iter_mut().enumerate() {
            *value = self.read(channel).min(ADC_MAX);
        }
        values
    }
}

/// Deterministic waveform generator standing in for the ADC
///
/// Channel `c` oscillates at `0.5 + 0.25 * c` Hz around mid-scale, with
/// pseudo-random noise of up to `noise` counts.
#[derive(Debug, Clone)]
pub struct SimulatedAdc {
    sample_rate_hz: f64,
    amplitude: f64,
    noise: u16,
    ticks: [u64; CHANNEL_COUNT],
    rng: u32,
}

impl SimulatedAdc {
    /// # Arguments
    /// * `sample_rate_hz` - Rate the channels will be read at
    /// * `seed` - Noise generator seed
    pub fn new(sample_rate_hz: u32, seed: u32) -> Self {
        Self {
            sample_rate_hz: f64::from(sample_rate_hz.max(1)),
            amplitude: 1500.0,
            noise: 24,
            ticks: [0; CHANNEL_COUNT],
            rng: seed | 1,
        }
    }

    /// Peak deviation from mid-scale
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, f64::from(ADC_MAX) / 2.0);
        self
    }

    /// Peak noise in counts
    pub fn with_noise(mut self, noise: u16) -> Self {
        self.noise = noise;
        self
    }

    fn next_noise(&mut self) -> i32 {
        if self.noise == 0 {
            return 0;
        }
        self.rng = self.rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let span = u32::from(self.noise) * 2 + 1;
        ((self.rng >> 8) % span) as i32 - i32::from(self.noise)
    }
}

impl AnalogInput for SimulatedAdc {
    fn read(&mut self, channel: usize) -> u16 {
        let Some(tick) = self.ticks.get_mut(channel) else {
            return 0;
        };
        let t = *tick as f64 / self.sample_rate_hz;
        *tick += 1;

        let freq = 0.5 + 0.25 * channel as f64;
        let mid = f64::from(ADC_MAX) / 2.0;
        let value = mid + self.amplitude * (TAU * freq * t).sin();
        let value = value.round() as i32 + self.next_noise();
        value.clamp(0, i32::from(ADC_MAX)) as u16
    }
}
