// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for transport tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tw_core::{Event, WireMessage};

use super::Handler;
use crate::config::WebSocketConfig;

/// How long helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(3);

/// Create a test event from the given session.
pub fn make_event(event_type: &str, session_id: &str, n: u64) -> Event {
    Event::new(event_type, session_id, json!({ "n": n }))
}

/// WebSocket settings pointing at `url` with fast timings for tests.
pub fn fast_ws_config(url: &str) -> WebSocketConfig {
    WebSocketConfig {
        url: Some(url.to_string()),
        reconnect_interval_ms: 20,
        max_reconnect_attempts: 10,
        heartbeat_interval_ms: 0,
        heartbeat_timeout_ms: 0,
        connect_timeout_secs: 2,
        max_queue_size: 100,
    }
}

/// A URL on which nothing is listening.
pub fn unused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("ws://127.0.0.1:{}", port)
}

/// Polls `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within {:?}", WAIT);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Collects every value passed to its handler.
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Recorder { items: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn handler(&self) -> Handler<T> {
        let items = Arc::clone(&self.items);
        Arc::new(move |value: &T| items.lock().unwrap().push(value.clone()))
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Waits until at least `n` values were recorded.
    pub async fn wait_len(&self, n: usize) -> Vec<T> {
        wait_until(|| self.len() >= n).await;
        self.items()
    }
}

#[derive(Clone, Debug)]
enum Control {
    Push(String),
    Close(u16),
}

/// In-process WebSocket server recording what clients send.
pub struct TestServer {
    port: u16,
    frames: mpsc::UnboundedReceiver<String>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    uris: Arc<Mutex<Vec<String>>>,
    accept_loop: JoinHandle<()>,
}

impl TestServer {
    /// Start a server that answers heartbeat pings.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that never answers pings.
    pub async fn silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(answer_pings: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let uris = Arc::new(Mutex::new(Vec::new()));

        let accept_loop = tokio::spawn({
            let control = control.clone();
            let connections = Arc::clone(&connections);
            let pings = Arc::clone(&pings);
            let uris = Arc::clone(&uris);
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    // Subscribe before the handshake so pushes right after connect arrive
                    let control_rx = control.subscribe();
                    let uris = Arc::clone(&uris);
                    let callback = move |req: &Request, resp: Response| {
                        uris.lock().unwrap().push(req.uri().to_string());
                        Ok::<Response, ErrorResponse>(resp)
                    };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        ws,
                        frames_tx.clone(),
                        control_rx,
                        Arc::clone(&pings),
                        answer_pings,
                    ));
                }
            }
        });

        TestServer { port, frames, control, connections, pings, uris, accept_loop }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Next non-heartbeat text frame received from any client.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server stopped")
    }

    pub async fn next_event(&mut self) -> Event {
        Event::from_json(&self.next_frame().await).unwrap()
    }

    /// Asserts no further frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(window, self.frames.recv()).await {
            panic!("unexpected frame: {}", frame);
        }
    }

    /// Sends a text frame to every connected client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Push(text.into()));
    }

    pub fn push_event(&self, event: &Event) {
        self.push(event.to_json().unwrap());
    }

    /// Closes every open connection with `code`.
    pub fn close_all(&self, code: u16) {
        let _ = self.control.send(Control::Close(code));
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Request URIs of every accepted handshake.
    pub fn request_uris(&self) -> Vec<String> {
        self.uris.lock().unwrap().clone()
    }

    pub async fn wait_for_connections(&self, n: usize) {
        wait_until(|| self.connections() >= n).await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    frames: mpsc::UnboundedSender<String>,
    mut control: broadcast::Receiver<Control>,
    pings: Arc<AtomicUsize>,
    answer_pings: bool,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(WireMessage::Ping { timestamp }) = WireMessage::from_json(text.as_str()) {
                        pings.fetch_add(1, Ordering::SeqCst);
                        if answer_pings {
                            let pong = WireMessage::pong(Some(timestamp)).to_json().unwrap();
                            let _ = sink.send(Message::text(pong)).await;
                        }
                        continue;
                    }
                    let _ = frames.send(text.as_str().to_string());
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            cmd = control.recv() => match cmd {
                Ok(Control::Push(text)) => {
                    let _ = sink.send(Message::text(text)).await;
                }
                Ok(Control::Close(code)) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: "test".into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}
