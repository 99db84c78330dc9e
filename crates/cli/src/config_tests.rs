// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use std::collections::HashMap;
use tempfile::TempDir;
use yare::parameterized;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = TransportConfig::default();
    assert_eq!(config.mode, TransportMode::LocalStorage);
    assert_eq!(config.websocket.url, None);
    assert_eq!(config.websocket.reconnect_interval_ms, 1_000);
    assert_eq!(config.websocket.max_reconnect_attempts, 10);
    assert_eq!(config.websocket.heartbeat_interval(), Some(Duration::from_secs(30)));
    assert_eq!(config.websocket.heartbeat_timeout(), Duration::from_secs(10));
    assert_eq!(config.websocket.max_queue_size, 100);
    assert_eq!(config.storage.storage_key, DEFAULT_STORAGE_KEY);
    assert_eq!(config.storage.max_events, 50);
    assert_eq!(config.storage.event_ttl(), Duration::from_secs(300));
}

#[parameterized(
    camel = { "localStorage", TransportMode::LocalStorage },
    snake = { "local_storage", TransportMode::LocalStorage },
    websocket = { "websocket", TransportMode::WebSocket },
    ws = { "WS", TransportMode::WebSocket },
    hybrid = { "hybrid", TransportMode::Hybrid },
)]
fn test_parse_mode(input: &str, expected: TransportMode) {
    assert_eq!(input.parse::<TransportMode>().unwrap(), expected);
}

#[test]
fn test_parse_invalid_mode() {
    let err = "smoke-signal".parse::<TransportMode>().unwrap_err();
    assert!(matches!(err, Error::InvalidMode(_)));
}

#[test]
fn test_mode_uses_websocket() {
    assert!(!TransportMode::LocalStorage.uses_websocket());
    assert!(TransportMode::WebSocket.uses_websocket());
    assert!(TransportMode::Hybrid.uses_websocket());
}

#[test]
fn test_parse_toml_partial_sections() {
    let config = TransportConfig::parse(
        r#"
mode = "hybrid"

[websocket]
url = "ws://localhost:7891"
max_reconnect_attempts = 3

[storage]
max_events = 5
"#,
    )
    .unwrap();

    assert_eq!(config.mode, TransportMode::Hybrid);
    assert_eq!(config.websocket.url.as_deref(), Some("ws://localhost:7891"));
    assert_eq!(config.websocket.max_reconnect_attempts, 3);
    // Unspecified fields keep their defaults
    assert_eq!(config.websocket.reconnect_interval_ms, 1_000);
    assert_eq!(config.storage.max_events, 5);
    assert_eq!(config.storage.storage_key, DEFAULT_STORAGE_KEY);
}

#[test]
fn test_parse_toml_camel_case_mode() {
    let config = TransportConfig::parse(r#"mode = "localStorage""#).unwrap();
    assert_eq!(config.mode, TransportMode::LocalStorage);
}

#[test]
fn test_parse_rejects_bad_url() {
    let result = TransportConfig::parse(
        r#"
[websocket]
url = "http://example.com"
"#,
    );
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_parse_rejects_zero_max_events() {
    let result = TransportConfig::parse(
        r#"
[storage]
max_events = 0
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_env_overrides() {
    let mut config = TransportConfig::default();
    config
        .apply_env(env(&[
            (ENV_TRANSPORT, "websocket"),
            (ENV_WS_URL, "wss://relay.example.com/events"),
            (ENV_RECONNECT_INTERVAL, "250"),
            (ENV_MAX_RECONNECT_ATTEMPTS, "4"),
        ]))
        .unwrap();

    assert_eq!(config.mode, TransportMode::WebSocket);
    assert_eq!(config.websocket.url.as_deref(), Some("wss://relay.example.com/events"));
    assert_eq!(config.websocket.reconnect_interval(), Duration::from_millis(250));
    assert_eq!(config.websocket.max_reconnect_attempts, 4);
}

#[test]
fn test_env_empty_url_clears() {
    let mut config = TransportConfig::default();
    config.websocket.url = Some("ws://old".to_string());
    config.apply_env(env(&[(ENV_WS_URL, "  ")])).unwrap();
    assert_eq!(config.websocket.url, None);
}

#[parameterized(
    interval = { ENV_RECONNECT_INTERVAL, "soon" },
    attempts = { ENV_MAX_RECONNECT_ATTEMPTS, "-1" },
)]
fn test_env_invalid_numbers(key: &str, value: &str) {
    let mut config = TransportConfig::default();
    let err = config.apply_env(env(&[(key, value)])).unwrap_err();
    assert!(matches!(err, Error::InvalidEnv { .. }));
}

#[test]
fn test_heartbeat_zero_disables() {
    let ws = WebSocketConfig { heartbeat_interval_ms: 0, ..WebSocketConfig::default() };
    assert_eq!(ws.heartbeat_interval(), None);
}

#[test]
fn test_load_from_file_and_roundtrip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("tabwire.toml");

    let mut config = TransportConfig::default();
    config.mode = TransportMode::Hybrid;
    config.websocket.url = Some("ws://localhost:7891".to_string());
    std::fs::write(&path, config.to_toml().unwrap()).unwrap();

    let loaded = TransportConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file() {
    let temp = TempDir::new().unwrap();
    let result = TransportConfig::load(&temp.path().join("missing.toml"));
    assert!(matches!(result, Err(Error::Io(_))));
}
