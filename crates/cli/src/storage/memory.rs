// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-process storage area.
//!
//! Clones share the same entries, so handing clones to several transports
//! models several tabs of one origin. A fresh instance per transport models
//! tab-local storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::{
    StorageArea, StorageChange, StorageError, StorageResult, StoredValue, CHANGE_CHANNEL_CAPACITY,
};

/// In-memory storage area with optional byte quota.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    entries: Mutex<HashMap<String, StoredValue>>,
    /// Max total bytes of all values, if limited.
    quota: Option<usize>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    /// Create an unlimited area.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an area that rejects writes beyond `quota` bytes in total.
    pub fn with_quota(quota: usize) -> Self {
        Self::build(Some(quota))
    }

    fn build(quota: Option<usize>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        MemoryStorage {
            inner: Arc::new(MemoryInner { entries: Mutex::new(HashMap::new()), quota, changes }),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredValue>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_quota(
        &self,
        entries: &HashMap<String, StoredValue>,
        key: &str,
        value: &str,
    ) -> StorageResult<()> {
        let Some(quota) = self.inner.quota else {
            return Ok(());
        };
        let others: usize =
            entries.iter().filter(|(k, _)| k.as_str() != key).map(|(_, v)| v.value.len()).sum();
        let needed = others + value.len();
        if needed > quota {
            return Err(StorageError::QuotaExceeded { needed, quota });
        }
        Ok(())
    }

    fn write_locked(
        &self,
        entries: &mut HashMap<String, StoredValue>,
        key: &str,
        value: &str,
    ) -> StorageResult<u64> {
        self.check_quota(entries, key, value)?;
        let version = entries.get(key).map_or(1, |v| v.version + 1);
        entries.insert(key.to_string(), StoredValue { value: value.to_string(), version });
        Ok(version)
    }

    fn publish(&self, key: &str, value: Option<&str>, version: u64) {
        // No subscribers is not an error
        let _ = self.inner.changes.send(StorageChange {
            key: key.to_string(),
            value: value.map(str::to_string),
            version,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageArea for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        Ok(self.lock().get(key).cloned())
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> StorageResult<Option<u64>> {
        let version = {
            let mut entries = self.lock();
            let current = entries.get(key).map(|v| v.version);
            if current != expected {
                return Ok(None);
            }
            self.write_locked(&mut entries, key, value)?
        };
        self.publish(key, Some(value), version);
        Ok(Some(version))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<u64> {
        let version = {
            let mut entries = self.lock();
            self.write_locked(&mut entries, key, value)?
        };
        self.publish(key, Some(value), version);
        Ok(version)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let removed = self.lock().remove(key);
        if let Some(old) = removed {
            self.publish(key, None, old.version + 1);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.changes.subscribe()
    }
}
