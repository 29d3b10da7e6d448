//! Configuration store
//!
//! The node persists a handful of small integers by label: its id, the
//! threshold percentage and the per-channel calibration. [`ConfigStore`] is
//! the key/value surface the core needs; [`memory::MemoryStore`] backs tests
//! and [`file::JsonFileStore`] persists to a JSON map on disk.
//!
//! Missing keys are never an error: callers fall back to a compiled-in
//! default and write it back so the store converges to a complete set.

pub mod file;
pub mod memory;

use crate::{DEFAULT_NODE_ID, DEFAULT_THRESHOLD_PERCENT};
use std::fmt;
use thiserror::Error;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Key addressed in the configuration store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Node identifier (byte)
    NodeId,
    /// Threshold percentage, 0-100 (byte)
    ThresholdPercent,
    /// Calibrated maximum of a channel (word)
    CalibrationMax(usize),
    /// Calibrated minimum of a channel (word)
    CalibrationMin(usize),
    /// Derived threshold of a channel (word)
    Threshold(usize),
}

impl ConfigKey {
    /// Label the value is stored under
    pub fn label(&self) -> String {
        match self {
            ConfigKey::NodeId => "nodeid".to_string(),
            ConfigKey::ThresholdPercent => "threshold".to_string(),
            ConfigKey::CalibrationMax(c) => format!("max{}", c),
            ConfigKey::CalibrationMin(c) => format!("min{}", c),
            ConfigKey::Threshold(c) => format!("thresh{}", c),
        }
    }

    /// Largest value the key accepts
    pub fn max_value(&self) -> u16 {
        match self {
            ConfigKey::NodeId => u16::from(u8::MAX),
            ConfigKey::ThresholdPercent => 100,
            _ => u16::MAX,
        }
    }

    /// Reject values that do not fit the key
    pub fn check(&self, value: u16) -> Result<(), StoreError> {
        if value > self.max_value() {
            return Err(StoreError::OutOfRange {
                key: self.label(),
                value,
                max: self.max_value(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Value {value} out of range for '{key}' (max {max})")]
    OutOfRange { key: String, value: u16, max: u16 },

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Key/value configuration collaborator
pub trait ConfigStore: Send + Sync {
    /// Stored value, or `None` when the key was never written
    fn get(&self, key: ConfigKey) -> Option<u16>;

    /// Write a value
    fn set(&self, key: ConfigKey, value: u16) -> Result<(), StoreError>;
}

/// Read `key`, writing `default` back when it is missing
///
/// A failed write-back is logged and the default is still returned.
pub fn load_or_default(store: &dyn ConfigStore, key: ConfigKey, default: u16) -> u16 {
    match store.get(key) {
        Some(value) => value,
        None => {
            tracing::info!(key = %key, default, "Config key missing, writing default");
            if let Err(e) = store.set(key, default) {
                tracing::warn!(key = %key, error = %e, "Failed to write default back");
            }
            default
        }
    }
}

/// Node id from the store, defaulting to [`DEFAULT_NODE_ID`]
pub fn load_node_id(store: &dyn ConfigStore) -> u8 {
    let raw = load_or_default(store, ConfigKey::NodeId, u16::from(DEFAULT_NODE_ID));
    u8::try_from(raw).unwrap_or_else(|_| {
        tracing::warn!(value = raw, "Stored node id out of range, using default");
        DEFAULT_NODE_ID
    })
}

/// Threshold percentage from the store, defaulting to [`DEFAULT_THRESHOLD_PERCENT`]
pub fn load_threshold_percent(store: &dyn ConfigStore) -> u8 {
    let raw = load_or_default(
        store,
        ConfigKey::ThresholdPercent,
        u16::from(DEFAULT_THRESHOLD_PERCENT),
    );
    if raw > 100 {
        tracing::warn!(value = raw, "Stored threshold percentage out of range, clamping");
    }
    raw.min(100) as u8
}
