// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay-backed transport.

use std::sync::{Arc, Mutex};

use tw_core::{ConnectionState, Event};

use super::listeners::{Listeners, StateCell};
use super::ws_client::{WebSocketClient, CLOSE_NORMAL};
use super::{ListenerId, MessageHandler, StateHandler, Transport, TransportFuture};
use crate::config::WebSocketConfig;

struct Relay {
    session_id: String,
    messages: Listeners<Event>,
    state: StateCell,
}

/// Transport that exchanges events through a WebSocket relay.
///
/// The relay echoes every event to every client, so events carrying this
/// instance's session id are dropped on arrival.
pub struct WebSocketTransport {
    client: WebSocketClient,
    relay: Arc<Relay>,
    user_id: Mutex<Option<String>>,
}

impl WebSocketTransport {
    pub fn new(
        config: WebSocketConfig,
        session_id: impl Into<String>,
        user_id: Option<String>,
        auth_token: Option<String>,
    ) -> Self {
        let session_id = session_id.into();
        let client = WebSocketClient::new(config, session_id.clone(), auth_token);
        let relay =
            Arc::new(Relay { session_id, messages: Listeners::new(), state: StateCell::new() });

        let inbound = Arc::clone(&relay);
        client.on_message(Arc::new(move |event: &Event| {
            if event.is_from(&inbound.session_id) {
                tracing::debug!("dropping own event {}", event.event_id);
                return;
            }
            inbound.messages.notify(event);
        }));
        let states = Arc::clone(&relay);
        client.on_state_change(Arc::new(move |state: &ConnectionState| {
            states.state.set(*state);
        }));

        WebSocketTransport { client, relay, user_id: Mutex::new(user_id) }
    }

    /// The underlying client.
    pub fn client(&self) -> &WebSocketClient {
        &self.client
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn rotate_token(&self, token: Option<String>) {
        let active = matches!(
            self.client.state(),
            ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Reconnecting
        );
        self.client.set_auth_token(token);
        if !active {
            return;
        }

        tracing::info!("auth token changed, reconnecting");
        self.client.disconnect(CLOSE_NORMAL, "auth token changed");
        if let Err(e) = self.client.connect().await {
            tracing::warn!("reconnect with new token failed: {}", e);
        }
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(self.client.connect())
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.client.close(CLOSE_NORMAL, "client disconnect").await;
            Ok(())
        })
    }

    fn send(&self, event: Event) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.client.send(&event) {
                tracing::debug!("queued {} until connected", event.event_id);
            }
            Ok(())
        })
    }

    fn on_message(&self, handler: MessageHandler) -> ListenerId {
        self.relay.messages.add(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> ListenerId {
        self.relay.state.listeners().add(handler)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.relay.messages.remove(id) || self.relay.state.listeners().remove(id)
    }

    fn state(&self) -> ConnectionState {
        self.relay.state.get()
    }

    fn session_id(&self) -> &str {
        &self.relay.session_id
    }

    fn set_user_id(&self, user_id: Option<String>) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            *self.user_id.lock().unwrap_or_else(|e| e.into_inner()) = user_id;
            Ok(())
        })
    }

    fn set_auth_token(&self, token: Option<String>) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.rotate_token(token).await;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "websocket_tests.rs"]
mod tests;
