// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Listener registries shared by all transports.
//!
//! Handlers run synchronously on the task that produced the value. The handler
//! list is snapshotted before invocation, so a handler may add or remove
//! listeners without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tw_core::ConnectionState;

/// Identifies a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A shared callback.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_listener_id() -> ListenerId {
    ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Ordered set of handlers for one kind of notification.
pub struct Listeners<T> {
    handlers: Mutex<Vec<(ListenerId, Handler<T>)>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Listeners { handlers: Mutex::new(Vec::new()) }
    }

    /// Registers a handler; handlers run in registration order.
    pub fn add(&self, handler: Handler<T>) -> ListenerId {
        let id = next_listener_id();
        self.lock().push((id, handler));
        id
    }

    /// Removes a handler. Returns false if the id is unknown here.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every handler with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in snapshot {
            handler(value);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Handler<T>)>> {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection state owned by one transport, announced on every change.
pub struct StateCell {
    state: Mutex<ConnectionState>,
    listeners: Listeners<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        StateCell { state: Mutex::new(ConnectionState::Disconnected), listeners: Listeners::new() }
    }

    pub fn get(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves to `next`, notifying listeners if the state changed.
    pub fn set(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return false;
        }
        tracing::debug!("connection state {} -> {}", previous, next);
        self.listeners.notify(&next);
        true
    }

    pub fn listeners(&self) -> &Listeners<ConnectionState> {
        &self.listeners
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod tests;
