// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frames exchanged between transports and the relay.
//!
//! The protocol is deliberately flat:
//! - Application events travel as bare [`Event`] JSON objects
//! - `{"type":"ping","timestamp":..}` and `{"type":"pong"}` are reserved for
//!   heartbeats and are never handed to application listeners

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::Event;

/// Reserved type of a heartbeat request.
pub const PING_TYPE: &str = "ping";
/// Reserved type of a heartbeat response.
pub const PONG_TYPE: &str = "pong";

/// A single text frame on the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Heartbeat request.
    Ping { timestamp: u64 },
    /// Heartbeat response, optionally echoing the ping's timestamp.
    Pong { timestamp: Option<u64> },
    /// An application event.
    Event(Event),
}

#[derive(Serialize, Deserialize)]
struct PingFrame {
    #[serde(rename = "type")]
    kind: String,
    timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct PongFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

impl WireMessage {
    /// Creates a Ping frame.
    pub fn ping(timestamp: u64) -> Self {
        WireMessage::Ping { timestamp }
    }

    /// Creates a Pong frame.
    pub fn pong(timestamp: Option<u64>) -> Self {
        WireMessage::Pong { timestamp }
    }

    /// Creates an Event frame.
    pub fn event(event: Event) -> Self {
        WireMessage::Event(event)
    }

    /// Serializes the frame to JSON.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            WireMessage::Ping { timestamp } => serde_json::to_string(&PingFrame {
                kind: PING_TYPE.to_string(),
                timestamp: *timestamp,
            })?,
            WireMessage::Pong { timestamp } => serde_json::to_string(&PongFrame {
                kind: PONG_TYPE.to_string(),
                timestamp: *timestamp,
            })?,
            WireMessage::Event(event) => event.to_json()?,
        };
        Ok(json)
    }

    /// Deserializes a frame from JSON.
    ///
    /// The `type` field selects the frame kind; anything that is not a
    /// reserved heartbeat type must be a valid event.
    pub fn from_json(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidEvent("missing type".to_string()))?;

        match kind {
            PING_TYPE => {
                let frame: PingFrame = serde_json::from_value(value)?;
                Ok(WireMessage::Ping { timestamp: frame.timestamp })
            }
            PONG_TYPE => {
                let frame: PongFrame = serde_json::from_value(value)?;
                Ok(WireMessage::Pong { timestamp: frame.timestamp })
            }
            _ => {
                let event: Event = serde_json::from_value(value)?;
                event.validate()?;
                Ok(WireMessage::Event(event))
            }
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
