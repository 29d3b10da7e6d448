//! In-memory configuration store

use super::{ConfigKey, ConfigStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Volatile store, mainly for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<ConfigKey, u16>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `entries`
    pub fn with_entries(entries: &[(ConfigKey, u16)]) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            values.extend(entries.iter().copied());
        }
        store
    }

    /// Make every subsequent `set` fail with [`StoreError::ReadOnly`]
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Number of keys written so far
    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: ConfigKey) -> Option<u16> {
        self.values.lock().ok()?.get(&key).copied()
    }

    fn set(&self, key: ConfigKey, value: u16) -> Result<(), StoreError> {
        key.check(value)?;
        if self.read_only.load(Ordering::Acquire) {
            return Err(StoreError::ReadOnly);
        }
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key, value);
        Ok(())
    }
}
