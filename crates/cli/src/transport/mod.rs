// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Event transports.
//!
//! A transport moves [`Event`]s between instances of the application:
//! - [`LocalStorageTransport`] through a shared storage area
//! - [`WebSocketTransport`] through a relay server
//! - [`HybridTransport`] through both at once
//!
//! All three implement [`Transport`]; [`AnyTransport`] wraps whichever one
//! [`create_transport`] selected from configuration.

mod factory;
mod hybrid;
mod listeners;
mod local;
mod websocket;
mod ws_client;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use factory::{create_transport, StorageHandles, TransportContext};
pub use hybrid::HybridTransport;
pub use listeners::{Handler, ListenerId, Listeners};
pub use local::LocalStorageTransport;
pub use websocket::WebSocketTransport;
pub use ws_client::{
    backoff_delay, reconnect_delay, should_reconnect, WebSocketClient, CLOSE_AUTH_FAILED,
    CLOSE_HEARTBEAT_TIMEOUT, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, MAX_JITTER,
    MAX_RECONNECT_DELAY,
};

use std::future::Future;
use std::pin::Pin;

use tw_core::{ConnectionState, Event};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No WebSocket URL was configured.
    #[error("no websocket url configured\n  hint: set [websocket] url or TABWIRE_WS_URL")]
    MissingUrl,

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection attempt did not complete in time.
    #[error("connection timed out after {0}s")]
    ConnectTimeout(u64),

    /// The attempt was superseded by a disconnect or a newer connect.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// Returns true for errors caused by configuration rather than the network.
    pub fn is_config_error(&self) -> bool {
        matches!(self, TransportError::MissingUrl)
    }
}

impl From<tw_core::Error> for TransportError {
    fn from(e: tw_core::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by asynchronous transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Callback for inbound events.
pub type MessageHandler = Handler<Event>;

/// Callback for connection state changes.
pub type StateHandler = Handler<ConnectionState>;

/// A channel that delivers events to other instances of the application.
///
/// Methods take `&self`; implementations synchronize internally so one
/// transport can be shared between tasks behind an `Arc`.
pub trait Transport: Send + Sync {
    /// Start delivering events. Only the initial connection error is returned;
    /// later failures surface as state changes.
    fn connect(&self) -> TransportFuture<'_, ()>;

    /// Stop delivering events and cancel any pending reconnect.
    fn disconnect(&self) -> TransportFuture<'_, ()>;

    /// Publish an event to other instances.
    fn send(&self, event: Event) -> TransportFuture<'_, ()>;

    /// Register a handler for events from other instances.
    fn on_message(&self, handler: MessageHandler) -> ListenerId;

    /// Register a handler for connection state changes.
    fn on_state_change(&self, handler: StateHandler) -> ListenerId;

    /// Unregister a handler added by either `on_*` method.
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Identifier of this instance, used to suppress self-delivery.
    fn session_id(&self) -> &str;

    /// Set or clear the user identity used for encryption.
    fn set_user_id(&self, user_id: Option<String>) -> TransportFuture<'_, ()>;

    /// Set or clear the credential presented to the relay.
    fn set_auth_token(&self, token: Option<String>) -> TransportFuture<'_, ()>;
}

/// The transport variant selected by configuration.
pub enum AnyTransport {
    LocalStorage(LocalStorageTransport),
    WebSocket(WebSocketTransport),
    Hybrid(HybridTransport),
}

impl AnyTransport {
    fn inner(&self) -> &dyn Transport {
        match self {
            AnyTransport::LocalStorage(t) => t,
            AnyTransport::WebSocket(t) => t,
            AnyTransport::Hybrid(t) => t,
        }
    }

    /// Short name of the selected variant.
    pub fn kind(&self) -> &'static str {
        match self {
            AnyTransport::LocalStorage(_) => "localStorage",
            AnyTransport::WebSocket(_) => "websocket",
            AnyTransport::Hybrid(_) => "hybrid",
        }
    }

    /// The storage-backed side, if this variant has one.
    pub fn local(&self) -> Option<&LocalStorageTransport> {
        match self {
            AnyTransport::LocalStorage(t) => Some(t),
            AnyTransport::Hybrid(t) => Some(t.local()),
            AnyTransport::WebSocket(_) => None,
        }
    }
}

impl Transport for AnyTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        self.inner().connect()
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        self.inner().disconnect()
    }

    fn send(&self, event: Event) -> TransportFuture<'_, ()> {
        self.inner().send(event)
    }

    fn on_message(&self, handler: MessageHandler) -> ListenerId {
        self.inner().on_message(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> ListenerId {
        self.inner().on_state_change(handler)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner().remove_listener(id)
    }

    fn state(&self) -> ConnectionState {
        self.inner().state()
    }

    fn session_id(&self) -> &str {
        self.inner().session_id()
    }

    fn set_user_id(&self, user_id: Option<String>) -> TransportFuture<'_, ()> {
        self.inner().set_user_id(user_id)
    }

    fn set_auth_token(&self, token: Option<String>) -> TransportFuture<'_, ()> {
        self.inner().set_auth_token(token)
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
