// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use super::*;
use crate::transport::test_helpers::{
    fast_ws_config, make_event, unused_url, wait_until, Recorder, TestServer,
};
use yare::parameterized;

// Backoff

#[test]
fn test_backoff_is_non_decreasing_and_capped() {
    let base = Duration::from_millis(1000);
    let mut previous = Duration::ZERO;
    for attempt in 1..=40 {
        let delay = backoff_delay(base, attempt);
        assert!(delay >= previous, "attempt {} went down", attempt);
        assert!(delay <= MAX_RECONNECT_DELAY);
        previous = delay;
    }
    assert_eq!(backoff_delay(base, 40), MAX_RECONNECT_DELAY);
}

#[parameterized(
    first = { 1, 1000 },
    second = { 2, 1500 },
    third = { 3, 2250 },
    fourth = { 4, 3375 },
)]
fn test_backoff_grows_by_half(attempt: u32, expected_ms: u64) {
    assert_eq!(backoff_delay(Duration::from_millis(1000), attempt), Duration::from_millis(expected_ms));
}

#[test]
fn test_reconnect_delay_adds_bounded_jitter() {
    let base = Duration::from_millis(500);
    for attempt in 1..=20 {
        let delay = reconnect_delay(base, attempt);
        assert!(delay >= backoff_delay(base, attempt));
        assert!(delay <= MAX_RECONNECT_DELAY + MAX_JITTER);
    }
}

#[parameterized(
    normal = { 1000, false },
    policy = { 1008, false },
    auth = { 4001, false },
    going_away = { 1001, true },
    abnormal = { 1006, true },
    internal = { 1011, true },
    heartbeat = { 4000, true },
)]
fn test_should_reconnect(code: u16, expected: bool) {
    assert_eq!(should_reconnect(code), expected);
}

// URL

#[test]
fn test_url_carries_token_and_session() {
    let client = WebSocketClient::new(
        fast_ws_config("ws://relay.test/ws"),
        "tab 1",
        Some("a&b=c".to_string()),
    );
    assert_eq!(
        client.url().unwrap(),
        "ws://relay.test/ws?token=a%26b%3Dc&sessionId=tab%201"
    );
}

#[parameterized(
    bare_host = { "ws://127.0.0.1:7891", "ws://127.0.0.1:7891/" },
    root_path = { "ws://relay.test/", "ws://relay.test/" },
    nested_path = { "wss://relay.test/a/b", "wss://relay.test/a/b" },
    query_without_path = { "ws://relay.test?room=7", "ws://relay.test/?room=7" },
)]
fn test_with_root_path(base: &str, expected: &str) {
    assert_eq!(with_root_path(base), expected);
}

#[test]
fn test_url_on_bare_host_gets_root_path() {
    let client = WebSocketClient::new(fast_ws_config("ws://localhost:7891"), "s1", None);
    assert_eq!(client.url().unwrap(), "ws://localhost:7891/?sessionId=s1");
}

#[tokio::test]
async fn test_connects_to_bare_host_url() {
    let mut server = TestServer::start().await;
    assert!(!server.url().ends_with('/'));
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let event = make_event("a", "s1", 1);
    assert!(client.send(&event));
    assert_eq!(server.next_event().await, event);
}

#[test]
fn test_url_preserves_existing_query() {
    let client = WebSocketClient::new(fast_ws_config("ws://relay.test/?room=7"), "s1", None);
    assert_eq!(client.url().unwrap(), "ws://relay.test/?room=7&sessionId=s1");
}

#[tokio::test]
async fn test_connect_without_url_fails_fast() {
    let mut config = fast_ws_config("ws://unused");
    config.url = None;
    let client = WebSocketClient::new(config, "s1", None);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::MissingUrl));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.url().is_none());
}

// Queue

#[test]
fn test_send_while_disconnected_queues() {
    let client = WebSocketClient::new(fast_ws_config("ws://unused"), "s1", None);
    assert!(!client.send(&make_event("a", "s1", 1)));
    assert!(!client.send(&make_event("a", "s1", 2)));
    assert_eq!(client.pending_count(), 2);
}

#[test]
fn test_queue_drops_oldest_when_full() {
    let mut config = fast_ws_config("ws://unused");
    config.max_queue_size = 2;
    let client = WebSocketClient::new(config, "s1", None);

    for n in 1..=3 {
        client.send(&make_event("a", "s1", n));
    }
    assert_eq!(client.pending_count(), 2);
}

#[tokio::test]
async fn test_queued_events_flush_in_order_on_connect() {
    let mut server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);

    let sent: Vec<Event> = (1..=3).map(|n| make_event("trip:updated", "s1", n)).collect();
    for event in &sent {
        assert!(!client.send(event));
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect().await.unwrap();

    for expected in &sent {
        assert_eq!(server.next_event().await.event_id, expected.event_id);
    }
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_oldest_queued_frame_is_lost_on_overflow() {
    let mut server = TestServer::start().await;
    let mut config = fast_ws_config(&server.url());
    config.max_queue_size = 2;
    let client = WebSocketClient::new(config, "s1", None);

    let sent: Vec<Event> = (1..=3).map(|n| make_event("a", "s1", n)).collect();
    for event in &sent {
        client.send(event);
    }
    client.connect().await.unwrap();

    assert_eq!(server.next_event().await.event_id, sent[1].event_id);
    assert_eq!(server.next_event().await.event_id, sent[2].event_id);
}

#[tokio::test]
async fn test_send_while_connected_is_immediate() {
    let mut server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    client.connect().await.unwrap();

    let event = make_event("a", "s1", 1);
    assert!(client.send(&event));
    assert_eq!(server.next_event().await, event);
}

// Lifecycle

#[tokio::test]
async fn test_state_transitions_on_connect_and_disconnect() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    let states = Recorder::new();
    client.on_state_change(states.handler());

    client.connect().await.unwrap();
    client.disconnect(CLOSE_NORMAL, "bye");

    assert_eq!(
        states.items(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}

#[tokio::test]
async fn test_connect_is_idempotent_while_connected() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    client.connect().await.unwrap();
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_handshake_carries_query() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", Some("t0k".into()));
    client.connect().await.unwrap();

    assert_eq!(server.request_uris(), vec!["/?token=t0k&sessionId=s1".to_string()]);
}

#[tokio::test]
async fn test_inbound_events_reach_listeners() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    let received = Recorder::new();
    client.on_message(received.handler());
    client.connect().await.unwrap();

    let event = make_event("a", "other", 1);
    server.push("not json at all");
    server.push(r#"{"type":"x"}"#);
    server.push_event(&event);

    assert_eq!(received.wait_len(1).await, vec![event]);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_server_ping_is_answered_and_not_forwarded() {
    let mut server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    let received = Recorder::new();
    client.on_message(received.handler());
    client.connect().await.unwrap();

    server.push(r#"{"type":"ping","timestamp":5}"#);
    let reply = server.next_frame().await;

    assert_eq!(WireMessage::from_json(&reply).unwrap(), WireMessage::pong(Some(5)));
    assert_eq!(received.len(), 0);
}

#[tokio::test]
async fn test_reconnects_after_abnormal_close() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    let states = Recorder::new();
    client.on_state_change(states.handler());
    client.connect().await.unwrap();

    server.close_all(1011);
    server.wait_for_connections(2).await;
    wait_until(|| client.state() == ConnectionState::Connected && states.len() >= 5).await;

    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(
        states.items()[2..5],
        [
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Connected
        ]
    );
}

#[tokio::test]
async fn test_terminal_close_codes_do_not_reconnect() {
    for code in [CLOSE_NORMAL, CLOSE_POLICY_VIOLATION, CLOSE_AUTH_FAILED] {
        let server = TestServer::start().await;
        let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
        client.connect().await.unwrap();

        server.close_all(code);
        wait_until(|| client.state() == ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(server.connections(), 1, "code {} reconnected", code);
        assert_eq!(client.reconnect_attempts(), 0);
    }
}

#[tokio::test]
async fn test_disconnect_suppresses_reconnect() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    client.connect().await.unwrap();

    client.disconnect(CLOSE_NORMAL, "bye");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.connections(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    // Sends after disconnect wait for the next connect
    assert!(!client.send(&make_event("a", "s1", 1)));
    assert_eq!(client.pending_count(), 1);
}

#[tokio::test]
async fn test_close_writes_frames_sent_before_it() {
    let mut server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    client.connect().await.unwrap();

    let event = make_event("a", "s1", 1);
    assert!(client.send(&event));
    client.close(CLOSE_NORMAL, "bye").await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(server.next_event().await.event_id, event.event_id);
}

#[tokio::test]
async fn test_close_without_socket_returns() {
    let client = WebSocketClient::new(fast_ws_config(&unused_url()), "s1", None);
    client.close(CLOSE_NORMAL, "bye").await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_after_disconnect_lifts_suppression() {
    let mut server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    client.connect().await.unwrap();
    client.disconnect(CLOSE_NORMAL, "bye");

    let event = make_event("a", "s1", 1);
    client.send(&event);
    client.connect().await.unwrap();

    assert_eq!(server.next_event().await, event);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_initial_failure_is_returned_and_retried_until_failed() {
    let mut config = fast_ws_config(&unused_url());
    config.max_reconnect_attempts = 1;
    config.reconnect_interval_ms = 10;
    let client = WebSocketClient::new(config, "s1", None);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectionFailed(_)));

    wait_until(|| client.state() == ConnectionState::Failed).await;
    assert_eq!(client.reconnect_attempts(), 1);
}

#[tokio::test]
async fn test_zero_attempts_fails_immediately() {
    let mut config = fast_ws_config(&unused_url());
    config.max_reconnect_attempts = 0;
    let client = WebSocketClient::new(config, "s1", None);

    assert!(client.connect().await.is_err());
    wait_until(|| client.state() == ConnectionState::Failed).await;
}

// Heartbeat

#[tokio::test]
async fn test_missing_pong_recycles_connection() {
    let server = TestServer::silent().await;
    let mut config = fast_ws_config(&server.url());
    config.heartbeat_interval_ms = 40;
    config.heartbeat_timeout_ms = 40;
    let client = WebSocketClient::new(config, "s1", None);
    client.connect().await.unwrap();

    server.wait_for_connections(2).await;
    assert!(server.pings() >= 1);
}

#[tokio::test]
async fn test_answered_pings_keep_connection() {
    let server = TestServer::start().await;
    let mut config = fast_ws_config(&server.url());
    config.heartbeat_interval_ms = 30;
    config.heartbeat_timeout_ms = 100;
    let client = WebSocketClient::new(config, "s1", None);
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(server.pings() >= 3);
    assert_eq!(server.connections(), 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_remove_listener() {
    let server = TestServer::start().await;
    let client = WebSocketClient::new(fast_ws_config(&server.url()), "s1", None);
    let states = Recorder::new();
    let id = client.on_state_change(states.handler());

    assert!(client.remove_listener(id));
    client.connect().await.unwrap();
    assert_eq!(states.len(), 0);
}
