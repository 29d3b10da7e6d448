//! JSON-file configuration store
//!
//! Values live in a flat JSON object keyed by label, e.g.
//! `{"nodeid": 10, "threshold": 50, "max0": 3547}`. The whole map is
//! rewritten on every `set`, which is fine for a handful of keys changed by
//! hand or at the end of a calibration.

use super::{ConfigKey, ConfigStore, StoreError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Store persisted as a JSON map on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, u16>>,
}

impl JsonFileStore {
    /// Open the store at `path`
    ///
    /// A missing file is an empty store; it is created on the first write.
    /// An unreadable or malformed file is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No store file found, starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), keys = values.len(), "Opened config store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, u16>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn get(&self, key: ConfigKey) -> Option<u16> {
        self.values.lock().ok()?.get(&key.label()).copied()
    }

    fn set(&self, key: ConfigKey, value: u16) -> Result<(), StoreError> {
        key.check(value)?;
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        let previous = values.insert(key.label(), value);
        if let Err(e) = self.persist(&values) {
            match previous {
                Some(old) => values.insert(key.label(), old),
                None => values.remove(&key.label()),
            };
            return Err(e);
        }
        Ok(())
    }
}
