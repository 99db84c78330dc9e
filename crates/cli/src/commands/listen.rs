// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tw_core::{ConnectionState, Event};

use crate::cli::GlobalArgs;
use crate::error::Result;
use crate::transport::{ListenerId, Transport};

use super::open_transport;

/// Prints inbound events as JSON lines until Ctrl-C.
///
/// State changes go to stderr so stdout stays machine-readable.
pub async fn run(args: &GlobalArgs) -> Result<()> {
    let (_, transport) = open_transport(args)?;

    let messages: ListenerId = transport.on_message(Arc::new(|event: &Event| {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("cannot print event {}: {}", event.event_id, e),
        }
    }));
    let states = transport.on_state_change(Arc::new(|state: &ConnectionState| eprintln!("state: {}", state)));

    transport.connect().await?;
    tracing::info!("listening as session {}", transport.session_id());

    tokio::signal::ctrl_c().await?;
    tracing::debug!("interrupted, disconnecting");

    transport.remove_listener(messages);
    transport.remove_listener(states);
    transport.disconnect().await?;
    Ok(())
}
