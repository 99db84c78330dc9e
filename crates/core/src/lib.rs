// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tw-core: Shared library for the tabwire event transports
//!
//! This crate provides the event record, the WebSocket wire protocol, the
//! connection state machine's states, and the cipher used for persisted
//! event lists. It is shared by the `tabwire` transports and the `tw-relay`
//! server.

pub mod crypto;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod version;

pub use crypto::Cipher;
pub use error::{Error, Result};
pub use event::Event;
pub use protocol::WireMessage;
pub use state::ConnectionState;
pub use version::{now_ms, ClockSource, SystemClock, VersionClock};
