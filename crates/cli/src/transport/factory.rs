// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Builds the configured transport.

use std::sync::Arc;

use super::{AnyTransport, HybridTransport, LocalStorageTransport, WebSocketTransport};
use crate::config::{TransportConfig, TransportMode};
use crate::error::Result;
use crate::storage::{MemoryStorage, StorageArea};

/// Identity of the instance a transport is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub auth_token: Option<String>,
}

impl TransportContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        TransportContext { session_id: session_id.into(), user_id: None, auth_token: None }
    }

    /// Context with a freshly generated session id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token;
        self
    }
}

/// Storage areas handed to storage-backed transports.
#[derive(Clone)]
pub struct StorageHandles {
    /// Area shared with other instances.
    pub shared: Arc<dyn StorageArea>,
    /// Area private to this instance, used while anonymous.
    pub session: Arc<dyn StorageArea>,
}

impl StorageHandles {
    /// Uses `shared` and a fresh private in-memory session area.
    pub fn new(shared: Arc<dyn StorageArea>) -> Self {
        StorageHandles { shared, session: Arc::new(MemoryStorage::new()) }
    }

    /// Both areas in memory; nothing is shared outside this value's clones.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }
}

/// Creates the transport selected by `config.mode`.
///
/// A missing WebSocket URL is reported by `connect()`, not here.
pub fn create_transport(
    config: &TransportConfig,
    context: TransportContext,
    storage: StorageHandles,
) -> Result<AnyTransport> {
    config.validate()?;
    tracing::debug!("creating {} transport for session {}", config.mode, context.session_id);

    let local = || {
        LocalStorageTransport::new(
            config.storage.clone(),
            context.session_id.clone(),
            context.user_id.clone(),
            Arc::clone(&storage.shared),
            Arc::clone(&storage.session),
        )
    };
    let websocket = || {
        WebSocketTransport::new(
            config.websocket.clone(),
            context.session_id.clone(),
            context.user_id.clone(),
            context.auth_token.clone(),
        )
    };

    let transport = match config.mode {
        TransportMode::LocalStorage => AnyTransport::LocalStorage(local()),
        TransportMode::WebSocket => AnyTransport::WebSocket(websocket()),
        TransportMode::Hybrid => AnyTransport::Hybrid(HybridTransport::new(local(), websocket())),
    };
    Ok(transport)
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
