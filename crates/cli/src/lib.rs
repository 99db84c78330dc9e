// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tabwire - Event transports between instances of one application.
//!
//! Instances publish application [`Event`](tw_core::Event)s and receive the
//! events published by their peers, through one of three transports:
//!
//! - [`LocalStorageTransport`] - a shared key in a [`StorageArea`], with
//!   change notifications fanning events out to every instance on the host
//! - [`WebSocketTransport`] - a relay server, with reconnection, heartbeats
//!   and an outbound queue while offline
//! - [`HybridTransport`] - both at once, with duplicates suppressed
//!
//! # Usage
//!
//! ```rust,ignore
//! use tabwire::{create_transport, StorageHandles, Transport, TransportConfig, TransportContext};
//!
//! let config = TransportConfig::resolve(None)?;
//! let context = TransportContext::generate().with_user(Some("alice".into()));
//! let transport = create_transport(&config, context, StorageHandles::in_memory())?;
//! transport.connect().await?;
//! transport.send(Event::new("trip:updated", transport.session_id(), payload)).await?;
//! ```

mod cli;
mod commands;

pub mod config;
pub mod error;
pub mod storage;
pub mod transport;

pub use cli::{Cli, Command, GlobalArgs};
pub use commands::default_data_dir;
pub use config::{StorageConfig, TransportConfig, TransportMode, WebSocketConfig};
pub use error::{Error, Result};
pub use storage::{FileStorage, MemoryStorage, StorageArea, StorageChange, StorageError};
pub use transport::{
    create_transport, AnyTransport, HybridTransport, ListenerId, LocalStorageTransport,
    StorageHandles, Transport, TransportContext, TransportError, WebSocketTransport,
};

/// Execute a CLI command. This is the main entry point for library users
/// and provides a testable way to run commands without process execution.
pub async fn run(cli: Cli) -> Result<()> {
    let Cli { global, command } = cli;
    match command {
        Command::Send { event_type, payload } => {
            commands::send::run(&global, &event_type, payload.as_deref()).await
        }
        Command::Listen => commands::listen::run(&global).await,
        Command::Show => commands::show::run(&global),
        Command::Config => commands::config::run(&global),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
