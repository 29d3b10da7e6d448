//! Host settings for the `sensornode` binary
//!
//! Stores the sample rate, network endpoints, queue sizes and timeouts in a
//! JSON file (default `sensornode.json` in the working directory). Missing
//! fields take their defaults, so a partial file is fine.

use sensornode_core::acquisition::timer::AlarmSchedule;
use sensornode_core::NodeConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "sensornode.json";

/// Highest sample rate the host accepts
pub const MAX_SAMPLE_RATE_HZ: u32 = 1000;

fn default_sample_rate() -> u32 {
    sensornode_core::DEFAULT_SAMPLE_RATE_HZ
}

fn default_local_port() -> u16 {
    sensornode_core::DEFAULT_LOCAL_PORT
}

fn default_remote_ip() -> String {
    sensornode_core::DEFAULT_REMOTE_IP.to_string()
}

fn default_remote_port() -> u16 {
    sensornode_core::DEFAULT_REMOTE_PORT
}

fn default_store_path() -> PathBuf {
    PathBuf::from("sensornode-store.json")
}

fn default_queue_capacity() -> usize {
    10
}

fn default_engine_timeout_ms() -> u64 {
    2000
}

fn default_transmit_timeout_ms() -> u64 {
    5000
}

fn default_keepalive_after() -> u32 {
    24
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Sample rate must be 1-1000 Hz, got {0}")]
    InvalidSampleRate(u32),

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("Invalid remote address '{0}'")]
    InvalidRemote(String),
}

/// Persistent host settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Timer interrupt rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    /// Local UDP port to bind
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Primary remote IP address
    #[serde(default = "default_remote_ip")]
    pub remote_ip: String,
    /// Primary remote UDP port
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// Configuration store file (node id, threshold, calibration)
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_queue_capacity")]
    pub sample_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub packet_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Calibration engine receive timeout
    #[serde(default = "default_engine_timeout_ms")]
    pub engine_timeout_ms: u64,
    /// Transmit task receive timeout
    #[serde(default = "default_transmit_timeout_ms")]
    pub transmit_timeout_ms: u64,
    /// Idle transmit timeouts before a keep-alive
    #[serde(default = "default_keepalive_after")]
    pub keepalive_after: u32,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: default_sample_rate(),
            local_port: default_local_port(),
            remote_ip: default_remote_ip(),
            remote_port: default_remote_port(),
            store_path: default_store_path(),
            sample_queue_capacity: default_queue_capacity(),
            packet_queue_capacity: default_queue_capacity(),
            event_queue_capacity: default_queue_capacity(),
            engine_timeout_ms: default_engine_timeout_ms(),
            transmit_timeout_ms: default_transmit_timeout_ms(),
            keepalive_after: default_keepalive_after(),
        }
    }
}

impl NodeSettings {
    /// Load settings from `path`, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "Loaded settings from disk");
                    settings
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse settings, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No settings file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save settings to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Settings saved to disk");
        Ok(())
    }

    /// Check ranges before the node is started
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sample_rate_hz == 0
            || self.sample_rate_hz > MAX_SAMPLE_RATE_HZ
            || AlarmSchedule::from_rate(self.sample_rate_hz).is_err()
        {
            return Err(SettingsError::InvalidSampleRate(self.sample_rate_hz));
        }
        for (name, value) in [
            ("sample_queue_capacity", self.sample_queue_capacity),
            ("packet_queue_capacity", self.packet_queue_capacity),
            ("event_queue_capacity", self.event_queue_capacity),
        ] {
            if value == 0 {
                return Err(SettingsError::Zero(name));
            }
        }
        if self.engine_timeout_ms == 0 {
            return Err(SettingsError::Zero("engine_timeout_ms"));
        }
        if self.transmit_timeout_ms == 0 {
            return Err(SettingsError::Zero("transmit_timeout_ms"));
        }
        if self.keepalive_after == 0 {
            return Err(SettingsError::Zero("keepalive_after"));
        }
        self.remote_addr()?;
        Ok(())
    }

    /// Primary remote as a socket address
    pub fn remote_addr(&self) -> Result<SocketAddr, SettingsError> {
        let ip: IpAddr = self
            .remote_ip
            .parse()
            .map_err(|_| SettingsError::InvalidRemote(self.remote_ip.clone()))?;
        Ok(SocketAddr::new(ip, self.remote_port))
    }

    /// Apply a `--remote` value: either `IP` or `IP:PORT`
    pub fn set_remote(&mut self, remote: &str) -> Result<(), SettingsError> {
        if let Ok(addr) = remote.parse::<SocketAddr>() {
            self.remote_ip = addr.ip().to_string();
            self.remote_port = addr.port();
            return Ok(());
        }
        let ip: IpAddr = remote
            .parse()
            .map_err(|_| SettingsError::InvalidRemote(remote.to_string()))?;
        self.remote_ip = ip.to_string();
        Ok(())
    }

    /// Local bind address on every interface
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.local_port)
    }

    /// Runtime parameters for [`sensornode_core::Node::start`]
    pub fn to_node_config(&self) -> NodeConfig {
        NodeConfig {
            sample_rate_hz: self.sample_rate_hz,
            sample_queue_capacity: self.sample_queue_capacity,
            packet_queue_capacity: self.packet_queue_capacity,
            event_queue_capacity: self.event_queue_capacity,
            engine_timeout: Duration::from_millis(self.engine_timeout_ms),
            transmit_timeout: Duration::from_millis(self.transmit_timeout_ms),
            keepalive_after: self.keepalive_after,
            ..NodeConfig::default()
        }
    }
}
