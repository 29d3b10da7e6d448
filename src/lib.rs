//! Sensornode - real-time sensor telemetry node
//!
//! This library re-exports the acquisition, calibration, framing and
//! transmission pipeline from `sensornode-core` and adds the host settings
//! file used by the `sensornode` binary.

pub mod settings;

pub use sensornode_core::{acquisition, net, processing, protocol, state, stats, storage, testing};

pub use sensornode_core::{
    checksum, AlarmTimer, CalibrationEngine, ConfigKey, ConfigStore, EventFlags, Flag,
    InterruptSource, MedianFilter, Node, NodeConfig, NodeHandle, NodeState, NodeStats,
    SampleAcquisition, SimulatedTimer, StatsSnapshot, WirePacket,
};
pub use sensornode_core::{BUILD_DATE, CHANNEL_COUNT, FILTER_WINDOW, VERSION};

pub use settings::{NodeSettings, SettingsError};
