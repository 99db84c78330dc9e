// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Storage plus relay, for delivery when either path is down.
//!
//! Events arriving on both paths are forwarded twice; consumers deduplicate
//! by `_eventId`.

use std::sync::Arc;

use tw_core::{ConnectionState, Event};

use super::listeners::Listeners;
use super::{
    ListenerId, LocalStorageTransport, MessageHandler, StateHandler, Transport, TransportFuture,
    WebSocketTransport,
};

/// Transport sending through both a storage area and a relay.
pub struct HybridTransport {
    local: LocalStorageTransport,
    websocket: WebSocketTransport,
    messages: Arc<Listeners<Event>>,
}

impl HybridTransport {
    /// Combines two transports built for the same session.
    pub fn new(local: LocalStorageTransport, websocket: WebSocketTransport) -> Self {
        let messages: Arc<Listeners<Event>> = Arc::new(Listeners::new());
        for source in [&local as &dyn Transport, &websocket as &dyn Transport] {
            let forward = Arc::clone(&messages);
            source.on_message(Arc::new(move |event: &Event| forward.notify(event)));
        }
        HybridTransport { local, websocket, messages }
    }

    pub fn local(&self) -> &LocalStorageTransport {
        &self.local
    }

    pub fn websocket(&self) -> &WebSocketTransport {
        &self.websocket
    }
}

impl Transport for HybridTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.local.connect().await?;
            match self.websocket.connect().await {
                Ok(()) => Ok(()),
                Err(e) if e.is_config_error() => Err(e),
                Err(e) => {
                    tracing::warn!("relay unavailable, continuing with storage only: {}", e);
                    Ok(())
                }
            }
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.websocket.disconnect().await?;
            self.local.disconnect().await
        })
    }

    fn send(&self, event: Event) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            // Never queue on a down socket; storage already carries the event
            if self.websocket.state() == ConnectionState::Connected {
                self.websocket.send(event.clone()).await?;
            }
            self.local.send(event).await
        })
    }

    fn on_message(&self, handler: MessageHandler) -> ListenerId {
        self.messages.add(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> ListenerId {
        self.websocket.on_state_change(handler)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.messages.remove(id) || self.websocket.remove_listener(id)
    }

    fn state(&self) -> ConnectionState {
        self.websocket.state()
    }

    fn session_id(&self) -> &str {
        self.local.session_id()
    }

    fn set_user_id(&self, user_id: Option<String>) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.websocket.set_user_id(user_id.clone()).await?;
            self.local.set_user_id(user_id).await
        })
    }

    fn set_auth_token(&self, token: Option<String>) -> TransportFuture<'_, ()> {
        self.websocket.set_auth_token(token)
    }
}

#[cfg(test)]
#[path = "hybrid_tests.rs"]
mod tests;
