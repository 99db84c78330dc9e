// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Key/value storage areas shared between transport instances.
//!
//! A storage area plays the role of a browser storage bucket: every transport
//! handed the same area sees the same keys and receives a change notification
//! whenever any of them writes.
//!
//! # Consistency
//!
//! Each key carries a version that increases on every write. Writers use
//! [`StorageArea::compare_and_set`] to publish a read-modify-write only if
//! nobody else wrote in between; the loser re-reads and retries.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use tokio::sync::broadcast;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The write would exceed the area's quota.
    #[error("quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted entry could not be parsed.
    #[error("corrupted entry for key '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    /// A value could not be encoded for storage.
    #[error("cannot encode value for key '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A value together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub value: String,
    pub version: u64,
}

/// Notification that a key changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// New value, `None` when the key was removed.
    pub value: Option<String>,
    pub version: u64,
}

/// A shared key/value area with change notifications.
pub trait StorageArea: Send + Sync {
    /// Reads a key.
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>>;

    /// Writes `value` only if the key is currently at `expected`.
    ///
    /// `expected == None` means the key must be absent. Returns the new
    /// version, or `None` if the key moved on and nothing was written.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<u64>,
        value: &str,
    ) -> StorageResult<Option<u64>>;

    /// Writes unconditionally and returns the new version.
    fn set(&self, key: &str, value: &str) -> StorageResult<u64>;

    /// Removes a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribes to change notifications for all keys.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Capacity of the change notification channel.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;
