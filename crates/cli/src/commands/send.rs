// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::Value;
use tw_core::Event;

use crate::cli::GlobalArgs;
use crate::error::{Error, Result};
use crate::transport::{AnyTransport, Transport};

use super::open_transport;

/// Parses the `--payload` argument. A missing payload is an empty object.
pub fn parse_payload(payload: Option<&str>) -> Result<Value> {
    match payload {
        None => Ok(Value::Object(Default::default())),
        Some(raw) => serde_json::from_str(raw).map_err(|e| Error::InvalidPayload(e.to_string())),
    }
}

/// Connects, sends one event, disconnects, and prints the event id.
pub async fn run(args: &GlobalArgs, event_type: &str, payload: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    let (_, transport) = open_transport(args)?;
    let event = send_event(&transport, event_type, payload).await?;
    println!("{}", event.event_id);
    Ok(())
}

/// Sends a single event through `transport` and returns it.
pub(crate) async fn send_event(
    transport: &AnyTransport,
    event_type: &str,
    payload: Value,
) -> Result<Event> {
    transport.connect().await?;
    let event = Event::new(event_type, transport.session_id(), payload);
    let result = transport.send(event.clone()).await;
    transport.disconnect().await?;
    result?;
    Ok(event)
}

#[cfg(test)]
#[path = "send_tests.rs"]
mod tests;
