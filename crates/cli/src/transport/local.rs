// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Storage-backed transport.
//!
//! All instances sharing a storage area read and write one key holding the
//! recent event list as an encrypted blob. Other instances learn about new
//! events from the area's change notifications.
//!
//! # Writes
//!
//! `send` appends to a batch and then takes the flush lock. Whoever holds the
//! lock drains the whole batch, so sends that pile up behind a flush are
//! written together. Each flush is a compare-and-set on the key's version and
//! is retried from a fresh read if another writer got in first.
//!
//! # Identity
//!
//! With a user id, events live in the shared area under the user's key.
//! Without one, they live in the instance's private session area under the
//! anonymous key. Gaining a user id moves the anonymous events over.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio_util::sync::CancellationToken;
use tw_core::{now_ms, Cipher, ConnectionState, Event};

use super::listeners::{Listeners, StateCell};
use super::{ListenerId, MessageHandler, StateHandler, Transport, TransportFuture};
use crate::config::StorageConfig;
use crate::storage::{StorageArea, StorageChange, StorageError, StorageResult};

/// Contended compare-and-set attempts before a flush gives up.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// What a read does with a list it cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unreadable {
    /// Remove it; the caller is about to own the key.
    Clear,
    /// Leave it; it may belong to another identity.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Shared,
    Session,
}

struct Identity {
    user_id: Option<String>,
    cipher: Cipher,
}

impl Identity {
    fn new(user_id: Option<String>) -> Self {
        let user_id = user_id.filter(|id| !id.is_empty());
        let cipher = Cipher::for_identity(user_id.as_deref());
        Identity { user_id, cipher }
    }

    fn scope(&self) -> Scope {
        if self.user_id.is_some() {
            Scope::Shared
        } else {
            Scope::Session
        }
    }
}

/// Bounded set of event ids, forgetting the oldest first.
struct SeenIds {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        SeenIds { capacity, order: VecDeque::new(), ids: HashSet::new() }
    }

    /// Records `id`; returns false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Transport that syncs instances through a shared storage area.
pub struct LocalStorageTransport {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    session_id: String,
    config: StorageConfig,
    shared_area: Arc<dyn StorageArea>,
    session_area: Arc<dyn StorageArea>,
    identity: Mutex<Identity>,
    seen: Mutex<SeenIds>,
    batch: Mutex<Vec<Event>>,
    /// Serializes read-modify-write cycles of this instance.
    flush_lock: tokio::sync::Mutex<()>,
    watcher: Mutex<Option<CancellationToken>>,
    state: StateCell,
    messages: Listeners<Event>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl LocalStorageTransport {
    pub fn new(
        config: StorageConfig,
        session_id: impl Into<String>,
        user_id: Option<String>,
        shared_area: Arc<dyn StorageArea>,
        session_area: Arc<dyn StorageArea>,
    ) -> Self {
        let seen = SeenIds::new(config.dedup_capacity);
        LocalStorageTransport {
            inner: Arc::new(LocalInner {
                session_id: session_id.into(),
                config,
                shared_area,
                session_area,
                identity: Mutex::new(Identity::new(user_id)),
                seen: Mutex::new(seen),
                batch: Mutex::new(Vec::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                watcher: Mutex::new(None),
                state: StateCell::new(),
                messages: Listeners::new(),
            }),
        }
    }

    /// Current user id, if any.
    pub fn user_id(&self) -> Option<String> {
        lock(&self.inner.identity).user_id.clone()
    }

    pub fn storage_key(&self) -> &str {
        &self.inner.config.storage_key
    }

    /// Reads the stored event list for the current identity.
    ///
    /// An unreadable list is removed and reported as empty.
    pub fn read_events_list(&self) -> Vec<Event> {
        let (area, cipher) = self.inner.current();
        self.inner.load(area.as_ref(), &cipher, Unreadable::Clear).0
    }

    /// Replaces the stored event list for the current identity.
    ///
    /// Failures are logged, not returned.
    pub fn write_events_list(&self, events: &[Event]) {
        let inner = &self.inner;
        let (area, cipher) = inner.current();
        let key = &inner.config.storage_key;
        if let Err(e) = inner.write_list(&cipher, events, |blob| area.set(key, blob).map(|_| true)) {
            tracing::error!("failed to write event list: {}", e);
        }
    }

    /// Removes the stored event list for the current identity.
    pub fn clear(&self) {
        let (area, _) = self.inner.current();
        self.inner.clear(area.as_ref());
    }

    /// Event ids remembered for deduplication.
    pub fn seen_count(&self) -> usize {
        lock(&self.inner.seen).len()
    }

    async fn connect_inner(&self) {
        let inner = &self.inner;
        if inner.state.get() == ConnectionState::Connected {
            return;
        }

        // Subscribe first so nothing written after the priming read is missed
        let shared_rx = inner.shared_area.subscribe();
        let session_rx = inner.session_area.subscribe();
        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&inner.watcher).replace(cancel.clone()) {
            previous.cancel();
        }

        let primed = inner.prime_seen();
        tracing::debug!("primed {} event ids from storage", primed);
        {
            let _flush = inner.flush_lock.lock().await;
            inner.persist(&[]);
        }

        tokio::spawn(watch(Arc::downgrade(inner), shared_rx, session_rx, cancel));
        inner.state.set(ConnectionState::Connected);
    }

    fn disconnect_inner(&self) {
        if let Some(cancel) = lock(&self.inner.watcher).take() {
            cancel.cancel();
        }
        self.inner.state.set(ConnectionState::Disconnected);
    }

    async fn send_inner(&self, event: Event) {
        let inner = &self.inner;
        lock(&inner.batch).push(event);

        let _flush = inner.flush_lock.lock().await;
        let pending = std::mem::take(&mut *lock(&inner.batch));
        if pending.is_empty() {
            // Written by the flush we waited for
            return;
        }
        tracing::debug!("flushing {} events", pending.len());
        inner.persist(&pending);
    }

    async fn set_user_id_inner(&self, user_id: Option<String>) {
        let inner = &self.inner;
        let next = Identity::new(user_id);
        let previous = {
            let mut identity = lock(&inner.identity);
            if identity.user_id == next.user_id {
                return;
            }
            std::mem::replace(&mut *identity, next)
        };

        let migrate = previous.user_id.is_none();
        if migrate {
            inner.migrate_anonymous(&previous.cipher).await;
        }
        // History of the new identity is not replayed
        inner.prime_seen();
    }
}

impl LocalInner {
    fn current(&self) -> (Arc<dyn StorageArea>, Cipher) {
        let identity = lock(&self.identity);
        let area = self.area(identity.scope());
        (Arc::clone(area), identity.cipher.clone())
    }

    fn area(&self, scope: Scope) -> &Arc<dyn StorageArea> {
        match scope {
            Scope::Shared => &self.shared_area,
            Scope::Session => &self.session_area,
        }
    }

    fn prime_seen(&self) -> usize {
        let (area, cipher) = self.current();
        let events = self.load(area.as_ref(), &cipher, Unreadable::Keep).0;
        let mut seen = lock(&self.seen);
        events.iter().filter(|e| seen.insert(&e.event_id)).count()
    }

    fn encode(&self, cipher: &Cipher, events: &[Event]) -> StorageResult<String> {
        let encode_error =
            |reason: String| StorageError::Encode { key: self.config.storage_key.clone(), reason };
        let json = serde_json::to_string(events).map_err(|e| encode_error(e.to_string()))?;
        cipher.seal(&json).map_err(|e| encode_error(e.to_string()))
    }

    /// Reads the list and its version.
    ///
    /// An unreadable list reads as empty. With [`Unreadable::Keep`] it also
    /// reads as unversioned so nothing overwrites it.
    fn load(
        &self,
        area: &dyn StorageArea,
        cipher: &Cipher,
        unreadable: Unreadable,
    ) -> (Vec<Event>, Option<u64>) {
        let key = &self.config.storage_key;
        match area.get(key) {
            Ok(None) => (Vec::new(), None),
            Ok(Some(stored)) => match decode_list(cipher, &stored.value) {
                Ok(events) => (events, Some(stored.version)),
                Err(e) if unreadable == Unreadable::Keep => {
                    tracing::debug!("skipping unreadable event list under '{}': {}", key, e);
                    (Vec::new(), None)
                }
                Err(e) => {
                    tracing::warn!("clearing unreadable event list under '{}': {}", key, e);
                    self.clear(area);
                    (Vec::new(), None)
                }
            },
            Err(e @ StorageError::Corrupted { .. }) if unreadable == Unreadable::Clear => {
                tracing::warn!("clearing event list: {}", e);
                self.clear(area);
                (Vec::new(), None)
            }
            Err(e) => {
                tracing::error!("failed to read event list: {}", e);
                (Vec::new(), None)
            }
        }
    }

    fn clear(&self, area: &dyn StorageArea) {
        if let Err(e) = area.remove(&self.config.storage_key) {
            tracing::warn!("failed to clear event list: {}", e);
        }
    }

    /// Drops expired events and trims to `max_events`, newest kept.
    fn prune(&self, events: &mut Vec<Event>) {
        let now = now_ms();
        let ttl_ms = u64::try_from(self.config.event_ttl().as_millis()).unwrap_or(u64::MAX);
        events.retain(|e| !e.is_expired(now, ttl_ms));
        if events.len() > self.config.max_events {
            let excess = events.len() - self.config.max_events;
            events.drain(..excess);
        }
    }

    /// Encodes and writes `events`, retrying once with the newest half if the
    /// area is over quota.
    fn write_list<F>(&self, cipher: &Cipher, events: &[Event], mut write: F) -> StorageResult<bool>
    where
        F: FnMut(&str) -> StorageResult<bool>,
    {
        let blob = self.encode(cipher, events)?;
        match write(&blob) {
            Err(StorageError::QuotaExceeded { needed, quota }) => {
                let keep = events.len() / 2;
                tracing::warn!(
                    "storage quota exceeded ({} > {} bytes), retrying with {} of {} events",
                    needed,
                    quota,
                    keep,
                    events.len()
                );
                let blob = self.encode(cipher, &events[events.len() - keep..])?;
                write(&blob)
            }
            other => other,
        }
    }

    /// Appends `additions` to the stored list and sweeps it.
    ///
    /// A sweep without additions leaves an unreadable list alone. Returns
    /// true once the list is persisted. Callers hold the flush lock.
    fn persist(&self, additions: &[Event]) -> bool {
        let (area, cipher) = self.current();
        let key = &self.config.storage_key;
        let unreadable = if additions.is_empty() { Unreadable::Keep } else { Unreadable::Clear };

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut events, version) = self.load(area.as_ref(), &cipher, unreadable);
            let before = events.len();
            events.extend_from_slice(additions);
            self.prune(&mut events);
            if additions.is_empty() && events.len() == before {
                return true;
            }

            let written = self.write_list(&cipher, &events, |blob| {
                area.compare_and_set(key, version, blob).map(|v| v.is_some())
            });
            match written {
                Ok(true) => return true,
                Ok(false) => {
                    tracing::debug!(
                        "event list changed underneath, retrying ({}/{})",
                        attempt,
                        MAX_WRITE_ATTEMPTS
                    );
                }
                Err(e) => {
                    tracing::error!("failed to persist {} events: {}", additions.len(), e);
                    return false;
                }
            }
        }
        tracing::error!(
            "gave up persisting {} events after {} contended writes",
            additions.len(),
            MAX_WRITE_ATTEMPTS
        );
        false
    }

    /// Moves anonymous events from the session area to the shared area.
    async fn migrate_anonymous(&self, anonymous: &Cipher) {
        let _flush = self.flush_lock.lock().await;
        let key = &self.config.storage_key;

        let stored = match self.session_area.get(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("skipping migration of anonymous events: {}", e);
                return;
            }
        };
        let events = match decode_list(anonymous, &stored.value) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("discarding unreadable anonymous events: {}", e);
                self.clear(self.session_area.as_ref());
                return;
            }
        };

        if !events.is_empty() && !self.persist(&events) {
            tracing::warn!("migration of {} anonymous events failed", events.len());
            return;
        }
        self.clear(self.session_area.as_ref());
        tracing::info!("migrated {} anonymous events", events.len());
    }

    fn handle_change(&self, scope: Scope, change: StorageChange) {
        if change.key != self.config.storage_key {
            return;
        }
        let Some(blob) = change.value else {
            return;
        };
        let cipher = {
            let identity = lock(&self.identity);
            if identity.scope() != scope {
                return;
            }
            identity.cipher.clone()
        };
        match decode_list(&cipher, &blob) {
            Ok(events) => self.deliver(events),
            // Another identity's list, or a write we cannot read yet
            Err(e) => tracing::debug!("skipping unreadable storage update: {}", e),
        }
    }

    /// Surfaces events not produced here and not surfaced before.
    fn deliver(&self, events: Vec<Event>) {
        let now = now_ms();
        let ttl_ms = u64::try_from(self.config.event_ttl().as_millis()).unwrap_or(u64::MAX);
        let fresh: Vec<Event> = {
            let mut seen = lock(&self.seen);
            events
                .into_iter()
                .filter(|e| !e.is_from(&self.session_id))
                .filter(|e| !e.is_expired(now, ttl_ms))
                .filter(|e| seen.insert(&e.event_id))
                .collect()
        };
        for event in &fresh {
            tracing::debug!("received {} ({}) from {}", event.event_type, event.event_id, event.session_id);
            self.messages.notify(event);
        }
    }

    /// Re-reads the list after missed notifications.
    fn resync(&self, scope: Scope) {
        let (area, cipher) = self.current();
        if lock(&self.identity).scope() != scope {
            return;
        }
        let events = self.load(area.as_ref(), &cipher, Unreadable::Keep).0;
        self.deliver(events);
    }
}

impl Drop for LocalInner {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.watcher).take() {
            cancel.cancel();
        }
    }
}

fn decode_list(cipher: &Cipher, blob: &str) -> tw_core::Result<Vec<Event>> {
    let json = cipher.open(blob)?;
    let events: Vec<Event> = serde_json::from_str(&json)?;
    for event in &events {
        event.validate()?;
    }
    Ok(events)
}

async fn watch(
    inner: Weak<LocalInner>,
    mut shared_rx: Receiver<StorageChange>,
    mut session_rx: Receiver<StorageChange>,
    cancel: CancellationToken,
) {
    loop {
        let (scope, received) = tokio::select! {
            biased;

            _ = cancel.cancelled() => return,
            r = shared_rx.recv() => (Scope::Shared, r),
            r = session_rx.recv() => (Scope::Session, r),
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if cancel.is_cancelled() {
            return;
        }
        match received {
            Ok(change) => inner.handle_change(scope, change),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("missed {} storage notifications, re-reading", missed);
                inner.resync(scope);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

impl Transport for LocalStorageTransport {
    fn connect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.connect_inner().await;
            Ok(())
        })
    }

    fn disconnect(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.disconnect_inner();
            Ok(())
        })
    }

    fn send(&self, event: Event) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.send_inner(event).await;
            Ok(())
        })
    }

    fn on_message(&self, handler: MessageHandler) -> ListenerId {
        self.inner.messages.add(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> ListenerId {
        self.inner.state.listeners().add(handler)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.messages.remove(id) || self.inner.state.listeners().remove(id)
    }

    fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    fn set_user_id(&self, user_id: Option<String>) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.set_user_id_inner(user_id).await;
            Ok(())
        })
    }

    fn set_auth_token(&self, _token: Option<String>) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
