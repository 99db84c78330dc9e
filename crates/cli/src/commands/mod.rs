// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod listen;
pub mod send;
pub mod show;

use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::GlobalArgs;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::storage::FileStorage;
use crate::transport::{create_transport, AnyTransport, StorageHandles, TransportContext};

/// Directory name under the platform data dir.
const DATA_DIR_NAME: &str = "tabwire";

/// Default location of the shared storage directory.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(DATA_DIR_NAME))
}

/// Resolves the effective configuration for a command.
///
/// File, then environment, then the `--mode` flag.
pub fn load_config(args: &GlobalArgs) -> Result<TransportConfig> {
    let mut config = TransportConfig::resolve(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    Ok(config)
}

/// Builds the transport described by the global arguments.
pub fn open_transport(args: &GlobalArgs) -> Result<(TransportConfig, AnyTransport)> {
    let config = load_config(args)?;
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let storage = FileStorage::open(&data_dir, config.storage.poll_interval())?;
    tracing::debug!("shared storage at {}", data_dir.display());

    let context = match &args.session {
        Some(id) => TransportContext::new(id.clone()),
        None => TransportContext::generate(),
    }
    .with_user(args.user.clone())
    .with_token(args.token.clone());

    let transport = create_transport(&config, context, StorageHandles::new(Arc::new(storage)))?;
    Ok((config, transport))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
