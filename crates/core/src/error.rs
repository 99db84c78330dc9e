// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tw-core operations.

use thiserror::Error;

/// All possible errors that can occur in tw-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid connection state: '{0}'\n  hint: valid states are: disconnected, connecting, connected, reconnecting, failed")]
    InvalidState(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed\n  hint: the blob was written under a different identity or is corrupted")]
    DecryptionFailed,

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

/// A specialized Result type for tw-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
