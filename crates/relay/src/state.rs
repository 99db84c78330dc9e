// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state shared by every connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Frames buffered per subscriber before it starts lagging.
const BROADCAST_CAPACITY: usize = 1024;

/// Shared relay state: the fanout channel and the optional access token.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    /// Required value of the `token` query parameter, if any.
    token: Option<String>,
    /// Event frames, forwarded verbatim to every connection.
    events: broadcast::Sender<Arc<str>>,
    clients: AtomicUsize,
}

impl RelayState {
    pub fn new(token: Option<String>) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        RelayState {
            inner: Arc::new(RelayInner {
                token: token.filter(|t| !t.is_empty()),
                events,
                clients: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns true if a client presenting `token` may connect.
    pub fn authorize(&self, token: Option<&str>) -> bool {
        match &self.inner.token {
            None => true,
            Some(expected) => token == Some(expected.as_str()),
        }
    }

    /// Fans a frame out to every subscriber. Returns how many received it.
    pub fn publish(&self, frame: &str) -> usize {
        self.inner.events.send(Arc::from(frame)).unwrap_or(0)
    }

    /// Subscribe to published frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.inner.events.subscribe()
    }

    /// Registers a connected client until the guard drops.
    pub fn register_client(&self) -> ClientGuard {
        self.inner.clients.fetch_add(1, Ordering::SeqCst);
        ClientGuard { inner: Arc::clone(&self.inner) }
    }

    /// Number of authorized clients currently connected.
    pub fn client_count(&self) -> usize {
        self.inner.clients.load(Ordering::SeqCst)
    }
}

/// Counts a client as connected while alive.
pub struct ClientGuard {
    inner: Arc<RelayInner>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.inner.clients.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
