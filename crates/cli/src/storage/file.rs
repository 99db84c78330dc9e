// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Directory-backed storage area shared between processes.
//!
//! Each key is stored as `<encoded-key>.json` holding `{"version":..,"value":..}`.
//! Writers take an exclusive `fs2` lock on `<encoded-key>.lock`, so a
//! compare-and-set is atomic across processes. Files are replaced by
//! rename, so readers never observe a partial write and need no lock.
//!
//! Writes made through this handle are announced immediately. Writes from
//! other processes are picked up by a polling watcher that starts with the
//! first subscription.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use fs2::FileExt;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{
    StorageArea, StorageChange, StorageError, StorageResult, StoredValue, CHANGE_CHANNEL_CAPACITY,
};

const ENTRY_EXT: &str = "json";
const LOCK_EXT: &str = "lock";

#[derive(Serialize, Deserialize)]
struct EntryFile {
    version: u64,
    value: String,
}

/// Storage area persisted as one file per key.
#[derive(Clone)]
pub struct FileStorage {
    inner: Arc<FileInner>,
}

struct FileInner {
    dir: PathBuf,
    poll_interval: Duration,
    changes: broadcast::Sender<StorageChange>,
    /// Last version seen per key, shared by writers and the watcher.
    known: Mutex<HashMap<String, u64>>,
    watching: AtomicBool,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: &Path, poll_interval: Duration) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let storage = FileStorage {
            inner: Arc::new(FileInner {
                dir: dir.to_path_buf(),
                poll_interval,
                changes,
                known: Mutex::new(HashMap::new()),
                watching: AtomicBool::new(false),
            }),
        };
        // Seed known versions so the watcher only reports later changes
        let snapshot = storage.inner.scan()?;
        *storage.inner.known_lock() = snapshot.into_iter().map(|(k, v)| (k, v.version)).collect();
        Ok(storage)
    }

    /// Directory backing this area.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn start_watcher(&self) {
        if self.inner.watching.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, file storage changes from other processes will not be observed");
            self.inner.watching.store(false, Ordering::Release);
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.poll_interval;
        handle.spawn(watch_loop(weak, interval));
    }
}

impl FileInner {
    fn known_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), ENTRY_EXT))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), LOCK_EXT))
    }

    fn read_entry(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        read_entry_file(&self.entry_path(key), key)
    }

    fn write_entry(&self, key: &str, version: u64, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension(format!("{}.tmp", ENTRY_EXT));
        let json = serde_json::to_string(&EntryFile { version, value: value.to_string() })
            .map_err(|e| StorageError::Corrupted { key: key.to_string(), reason: e.to_string() })?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Runs `f` while holding the key's exclusive lock.
    fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
        let lock_file =
            OpenOptions::new().create(true).truncate(false).write(true).open(self.lock_path(key))?;
        lock_file.lock_exclusive()?;
        let result = f();
        let _ = lock_file.unlock();
        result
    }

    fn publish(&self, key: &str, value: Option<&str>, version: u64) {
        self.known_lock().insert(key.to_string(), version);
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            value: value.map(str::to_string),
            version,
        });
    }

    /// Reads every entry in the directory.
    fn scan(&self) -> StorageResult<HashMap<String, StoredValue>> {
        let mut entries = HashMap::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(decode_key) else {
                continue;
            };
            match read_entry_file(&path, &key) {
                Ok(Some(value)) => {
                    entries.insert(key, value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("skipping unreadable storage entry {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }

    /// Compares the directory with known versions and announces differences.
    fn poll_once(&self) -> StorageResult<()> {
        let current = self.scan()?;
        let mut changes = Vec::new();
        {
            let mut known = self.known_lock();
            for (key, stored) in &current {
                if known.get(key) != Some(&stored.version) {
                    known.insert(key.clone(), stored.version);
                    changes.push(StorageChange {
                        key: key.clone(),
                        value: Some(stored.value.clone()),
                        version: stored.version,
                    });
                }
            }
            let removed: Vec<String> =
                known.keys().filter(|k| !current.contains_key(*k)).cloned().collect();
            for key in removed {
                let version = known.remove(&key).unwrap_or(0);
                changes.push(StorageChange { key, value: None, version: version + 1 });
            }
        }
        for change in changes {
            let _ = self.changes.send(change);
        }
        Ok(())
    }
}

async fn watch_loop(inner: Weak<FileInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Err(e) = inner.poll_once() {
            tracing::warn!("storage poll failed for {}: {}", inner.dir.display(), e);
        }
    }
}

fn read_entry_file(path: &Path, key: &str) -> StorageResult<Option<StoredValue>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let entry: EntryFile = serde_json::from_str(&content)
        .map_err(|e| StorageError::Corrupted { key: key.to_string(), reason: e.to_string() })?;
    Ok(Some(StoredValue { value: entry.value, version: entry.version }))
}

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, NON_ALPHANUMERIC).to_string()
}

fn decode_key(encoded: &str) -> Option<String> {
    percent_decode_str(encoded).decode_utf8().ok().map(|s| s.into_owned())
}

impl StorageArea for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        self.inner.read_entry(key)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> StorageResult<Option<u64>> {
        let inner = &self.inner;
        let written = inner.with_lock(key, || {
            let current = inner.read_entry(key)?.map(|v| v.version);
            if current != expected {
                return Ok(None);
            }
            let version = current.map_or(1, |v| v + 1);
            inner.write_entry(key, version, value)?;
            Ok(Some(version))
        })?;
        if let Some(version) = written {
            inner.publish(key, Some(value), version);
        }
        Ok(written)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<u64> {
        let inner = &self.inner;
        let version = inner.with_lock(key, || {
            let version = inner.read_entry(key)?.map_or(1, |v| v.version + 1);
            inner.write_entry(key, version, value)?;
            Ok(version)
        })?;
        inner.publish(key, Some(value), version);
        Ok(version)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let inner = &self.inner;
        let removed = inner.with_lock(key, || {
            // A corrupted entry can still be removed
            let current = inner.read_entry(key).ok().flatten().map_or(0, |v| v.version);
            match fs::remove_file(inner.entry_path(key)) {
                Ok(()) => Ok(Some(current)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;
        if let Some(version) = removed {
            inner.known_lock().remove(key);
            let _ = inner.changes.send(StorageChange {
                key: key.to_string(),
                value: None,
                version: version + 1,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        let rx = self.inner.changes.subscribe();
        self.start_watcher();
        rx
    }
}
