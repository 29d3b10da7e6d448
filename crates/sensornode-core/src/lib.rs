//! Sensornode Core - acquisition, calibration, framing and transmission
//!
//! This library implements the data path of a real-time sensor-telemetry node:
//! a periodic timer interrupt samples analog channels and median-filters them,
//! a calibration engine turns the samples into raw or thresholded output frames,
//! and a transmit task sends the framed packets over a datagram socket.
//!
//! The interrupt context only ever talks to the tasks through bounded,
//! non-blocking queues and a set of sticky event flags held in [`NodeState`].

pub mod acquisition;
pub mod node;
pub mod processing;
pub mod protocol;
pub mod net;
pub mod state;
pub mod stats;
pub mod storage;
pub mod testing;

pub use acquisition::{
    filter::MedianFilter,
    isr::SampleAcquisition,
    timer::{AlarmTimer, InterruptSource, SimulatedTimer},
};
pub use node::{Node, NodeConfig, NodeHandle};
pub use processing::calibration::CalibrationEngine;
pub use protocol::{checksum::checksum, packet::WirePacket};
pub use state::{EventFlags, Flag, NodeState};
pub use stats::counters::{NodeStats, StatsSnapshot};
pub use storage::{ConfigKey, ConfigStore};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Number of physical analog channels sampled per tick
pub const CHANNEL_COUNT: usize = 4;

/// Median filter window length (must be odd)
pub const FILTER_WINDOW: usize = 5;

/// Largest value a 12-bit ADC conversion can produce
pub const ADC_MAX: u16 = 4095;

/// Node id used when the configuration store has none
pub const DEFAULT_NODE_ID: u8 = 10;

/// Threshold percentage used when the configuration store has none
pub const DEFAULT_THRESHOLD_PERCENT: u8 = 50;

/// Default sampling rate in Hz (the 120 Hz deployment is the alternative)
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 60;

/// Default local UDP port
pub const DEFAULT_LOCAL_PORT: u16 = 16500;

/// Default remote UDP port
pub const DEFAULT_REMOTE_PORT: u16 = 16501;

/// Default primary remote address
pub const DEFAULT_REMOTE_IP: &str = "192.168.0.101";
