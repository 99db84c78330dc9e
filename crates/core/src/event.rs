// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! The event record carried by every transport.
//!
//! Field names on the wire match the browser-side records exactly
//! (`type`, `sessionId`, `_eventId`), so the same JSON travels through the
//! storage key, the WebSocket relay, and the consuming event bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::version::{ClockSource, VersionClock};

/// An application event produced by one transport instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Application-level event name (e.g. `trip:updated`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Monotonic marker assigned by the producer.
    pub version: u64,
    /// Session that produced the event.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Unique id of this event.
    #[serde(rename = "_eventId")]
    pub event_id: String,
    /// Creation time in milliseconds since Unix epoch.
    pub timestamp: u64,
    /// Arbitrary event payload.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Creates an event versioned by the [process clock](VersionClock::process),
    /// so events created in this process never share a version.
    pub fn new(event_type: impl Into<String>, session_id: impl Into<String>, payload: Value) -> Self {
        Self::stamped(VersionClock::process(), event_type, session_id, payload)
    }

    /// Creates an event whose version comes from the given clock.
    pub fn stamped<C: ClockSource>(
        clock: &VersionClock<C>,
        event_type: impl Into<String>,
        session_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Event {
            event_type: event_type.into(),
            version: clock.next(),
            session_id: session_id.into(),
            event_id: new_event_id(),
            timestamp: clock.now_ms(),
            payload,
        }
    }

    /// Returns true if the event was produced by the given session.
    pub fn is_from(&self, session_id: &str) -> bool {
        self.session_id == session_id
    }

    /// Age of the event relative to `now_ms`. Events from the future have age 0.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Returns true if the event is older than `ttl_ms`.
    pub fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        self.age_ms(now_ms) > ttl_ms
    }

    /// Serializes the event to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes and validates an event from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        let event: Event = serde_json::from_str(s)?;
        event.validate()?;
        Ok(event)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.event_id.is_empty() {
            return Err(Error::InvalidEvent("empty _eventId".to_string()));
        }
        if self.event_type.is_empty() {
            return Err(Error::InvalidEvent("empty type".to_string()));
        }
        Ok(())
    }
}

/// Generates a fresh event id.
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
