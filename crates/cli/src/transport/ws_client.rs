// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting WebSocket client.
//!
//! One [`WebSocketClient`] owns at most one socket at a time. A supervisor
//! task drives the socket and, when it drops abnormally, schedules reconnects
//! with exponential backoff until the attempt budget is spent.
//!
//! Frames sent while no socket is open wait in a bounded FIFO queue. On every
//! successful open the queue is moved into the new socket's writer channel
//! under the same lock that `send` takes, so new frames cannot overtake
//! queued ones.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tw_core::{now_ms, ConnectionState, Event, WireMessage};

use super::listeners::{Listeners, StateCell};
use super::{ListenerId, MessageHandler, StateHandler, TransportError, TransportResult};
use crate::config::WebSocketConfig;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Policy violation; treated as an authentication failure.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Closed by the client after a missed heartbeat.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;
/// Rejected credentials.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

const CLOSE_NO_STATUS: u16 = 1005;
const CLOSE_ABNORMAL: u16 = 1006;

/// Upper bound of the backoff delay, before jitter.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Upper bound of the random jitter added to each delay.
pub const MAX_JITTER: Duration = Duration::from_secs(1);

const BACKOFF_FACTOR: f64 = 1.5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Adds the root path to a URL whose authority is not followed by one, so
/// the query string never lands directly after the host.
pub(crate) fn with_root_path(base: &str) -> String {
    let authority_start = base.find("://").map_or(0, |i| i + 3);
    let authority_end = base[authority_start..]
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .map_or(base.len(), |i| authority_start + i);
    if base[authority_end..].starts_with('/') {
        return base.to_string();
    }
    let mut url = String::with_capacity(base.len() + 1);
    url.push_str(&base[..authority_end]);
    url.push('/');
    url.push_str(&base[authority_end..]);
    url
}

/// Returns false for close codes after which the client stays down.
pub fn should_reconnect(code: u16) -> bool {
    !matches!(code, CLOSE_NORMAL | CLOSE_POLICY_VIOLATION | CLOSE_AUTH_FAILED)
}

/// Deterministic part of the reconnect delay: `base * 1.5^(attempt-1)`,
/// capped at [`MAX_RECONNECT_DELAY`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let millis = base.as_millis() as f64 * BACKOFF_FACTOR.powi(exponent);
    let capped = millis.min(MAX_RECONNECT_DELAY.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

/// Backoff delay plus uniform jitter in `[0, MAX_JITTER]`.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::rng().random_range(0..=MAX_JITTER.as_millis() as u64);
    backoff_delay(base, attempt) + Duration::from_millis(jitter_ms)
}

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

/// An open socket handed from `open` to the supervisor.
struct Connection {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

/// How a socket's run loop ended.
enum SocketEnd {
    /// Closed on request; nothing more to do.
    Local,
    /// Dropped with the given close code.
    Dropped(u16),
}

struct Shared {
    auth_token: Option<String>,
    /// Writer for the open socket, if any.
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
    queue: VecDeque<String>,
    attempts: u32,
    /// Set by `disconnect`, cleared by `connect`.
    suppressed: bool,
    /// Bumped by every `connect`/`disconnect`; tasks from older generations stop.
    generation: u64,
    cancel: CancellationToken,
    /// Supervisor of the current generation.
    task: Option<JoinHandle<()>>,
}

struct ClientInner {
    config: WebSocketConfig,
    session_id: String,
    shared: Mutex<Shared>,
    state: StateCell,
    messages: Listeners<Event>,
}

/// WebSocket client with queuing, heartbeat and automatic reconnection.
#[derive(Clone)]
pub struct WebSocketClient {
    inner: Arc<ClientInner>,
}

impl WebSocketClient {
    pub fn new(
        config: WebSocketConfig,
        session_id: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        WebSocketClient {
            inner: Arc::new(ClientInner {
                config,
                session_id: session_id.into(),
                shared: Mutex::new(Shared {
                    auth_token,
                    outgoing: None,
                    queue: VecDeque::new(),
                    attempts: 0,
                    suppressed: false,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    task: None,
                }),
                state: StateCell::new(),
                messages: Listeners::new(),
            }),
        }
    }

    /// Opens the socket and resolves once it is open.
    ///
    /// An initial failure is returned, and a reconnect is still scheduled.
    pub async fn connect(&self) -> TransportResult<()> {
        let inner = &self.inner;
        // Fail fast on configuration before touching any state
        let url = inner.build_url()?;
        if inner.state.get() == ConnectionState::Connected {
            return Ok(());
        }

        let (generation, cancel) = inner.begin();
        tracing::info!("connecting to {}", inner.config.url.as_deref().unwrap_or_default());
        match inner.open(generation, &url).await {
            Ok(conn) => {
                let task = tokio::spawn(supervise(Arc::clone(inner), generation, cancel, Some(conn)));
                inner.lock().task = Some(task);
                Ok(())
            }
            Err(TransportError::Cancelled) => Err(TransportError::Cancelled),
            Err(e) => {
                tracing::warn!("connection failed: {}", e);
                let task = tokio::spawn(supervise(Arc::clone(inner), generation, cancel, None));
                inner.lock().task = Some(task);
                Err(e)
            }
        }
    }

    /// Closes the socket with `code` and stops reconnecting until the next
    /// `connect()`.
    pub fn disconnect(&self, code: u16, reason: &str) {
        let writer = {
            let mut shared = self.inner.lock();
            shared.suppressed = true;
            shared.generation += 1;
            let writer = shared.outgoing.take();
            // Close frame first, so the run loop prefers it over cancellation
            if let Some(tx) = &writer {
                let _ = tx.send(Outgoing::Close { code, reason: reason.to_string() });
            }
            shared.cancel.cancel();
            writer
        };
        if writer.is_some() {
            tracing::info!("disconnected ({})", code);
        }
        self.inner.state.set(ConnectionState::Disconnected);
    }

    /// Like [`disconnect`](Self::disconnect), then waits until frames sent
    /// before it and the close frame are written. Bounded by the connect
    /// timeout.
    pub async fn close(&self, code: u16, reason: &str) {
        self.disconnect(code, reason);
        let task = self.inner.lock().task.take();
        if let Some(task) = task {
            if tokio::time::timeout(self.inner.config.connect_timeout(), task).await.is_err() {
                tracing::warn!("socket did not close within {:?}", self.inner.config.connect_timeout());
            }
        }
    }

    /// Sends an event now if connected, otherwise queues it.
    ///
    /// Returns true if the frame went to an open socket.
    pub fn send(&self, event: &Event) -> bool {
        match event.to_json() {
            Ok(frame) => self.inner.send_frame(frame),
            Err(e) => {
                tracing::warn!("dropping unserializable event {}: {}", event.event_id, e);
                false
            }
        }
    }

    /// Replaces the credential used by subsequent connection attempts.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.inner.lock().auth_token = token;
    }

    pub fn on_message(&self, handler: MessageHandler) -> ListenerId {
        self.inner.messages.add(handler)
    }

    pub fn on_state_change(&self, handler: StateHandler) -> ListenerId {
        self.inner.state.listeners().add(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.messages.remove(id) || self.inner.state.listeners().remove(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Frames waiting for a socket.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    /// Full URL of the next connection attempt, including query parameters.
    pub fn url(&self) -> Option<String> {
        self.inner.build_url().ok()
    }
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn build_url(&self) -> TransportResult<String> {
        let base = self.config.url.as_deref().ok_or(TransportError::MissingUrl)?;
        let token = self.lock().auth_token.clone();

        let mut url = with_root_path(base);
        let mut separator = if base.contains('?') { '&' } else { '?' };
        if let Some(token) = token {
            url.push(separator);
            url.push_str("token=");
            url.extend(utf8_percent_encode(&token, NON_ALPHANUMERIC));
            separator = '&';
        }
        url.push(separator);
        url.push_str("sessionId=");
        url.extend(utf8_percent_encode(&self.session_id, NON_ALPHANUMERIC));
        Ok(url)
    }

    /// Starts a new generation, cancelling tasks of the previous one.
    fn begin(&self) -> (u64, CancellationToken) {
        let mut shared = self.lock();
        shared.cancel.cancel();
        shared.cancel = CancellationToken::new();
        shared.outgoing = None;
        shared.generation += 1;
        shared.suppressed = false;
        shared.attempts = 0;
        (shared.generation, shared.cancel.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        let shared = self.lock();
        shared.generation == generation && !shared.suppressed
    }

    fn send_frame(&self, frame: String) -> bool {
        let mut shared = self.lock();
        let frame = if let Some(tx) = &shared.outgoing {
            match tx.send(Outgoing::Text(frame)) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(returned)) => {
                    // The run loop is gone; queue until the next open
                    shared.outgoing = None;
                    match returned {
                        Outgoing::Text(frame) => frame,
                        Outgoing::Close { .. } => return false,
                    }
                }
            }
        } else {
            frame
        };

        if shared.queue.len() >= self.config.max_queue_size {
            shared.queue.pop_front();
            tracing::warn!("send queue full ({}), dropped oldest frame", self.config.max_queue_size);
        }
        shared.queue.push_back(frame);
        false
    }

    async fn open(&self, generation: u64, url: &str) -> TransportResult<Connection> {
        if !self.is_current(generation) {
            return Err(TransportError::Cancelled);
        }
        self.state.set(ConnectionState::Connecting);

        let timeout = self.config.connect_timeout();
        let ws = match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
            Err(_) => return Err(TransportError::ConnectTimeout(self.config.connect_timeout_secs)),
        };
        let (sink, stream) = ws.split();
        let (tx, outgoing) = mpsc::unbounded_channel();

        {
            let mut shared = self.lock();
            if shared.generation != generation || shared.suppressed {
                return Err(TransportError::Cancelled);
            }
            shared.attempts = 0;
            let queued = shared.queue.len();
            for frame in shared.queue.drain(..) {
                let _ = tx.send(Outgoing::Text(frame));
            }
            shared.outgoing = Some(tx);
            if queued > 0 {
                tracing::debug!("flushing {} queued frames", queued);
            }
        }

        tracing::info!("connected");
        self.state.set(ConnectionState::Connected);
        Ok(Connection { sink, stream, outgoing })
    }

    /// Drops the writer of a socket that ended, if it belongs to `generation`.
    fn release(&self, generation: u64) {
        let mut shared = self.lock();
        if shared.generation == generation {
            shared.outgoing = None;
        }
    }

    /// Claims the next reconnect attempt, or moves to `failed` when none remain.
    fn next_attempt(&self, generation: u64) -> Option<u32> {
        let claimed = {
            let mut shared = self.lock();
            if shared.generation != generation || shared.suppressed {
                return None;
            }
            if shared.attempts >= self.config.max_reconnect_attempts {
                None
            } else {
                shared.attempts += 1;
                Some(shared.attempts)
            }
        };
        match claimed {
            Some(attempt) => {
                self.state.set(ConnectionState::Reconnecting);
                Some(attempt)
            }
            None => {
                tracing::error!(
                    "giving up after {} reconnect attempts",
                    self.config.max_reconnect_attempts
                );
                self.state.set(ConnectionState::Failed);
                None
            }
        }
    }

    async fn run(&self, conn: Connection, cancel: &CancellationToken) -> SocketEnd {
        let Connection { mut sink, mut stream, mut outgoing } = conn;

        let heartbeat = self.config.heartbeat_interval();
        let grace = heartbeat.map(|interval| interval + self.config.heartbeat_timeout());
        let mut ping_timer =
            heartbeat.map(|interval| tokio::time::interval_at(Instant::now() + interval, interval));
        let mut last_pong = Instant::now();

        loop {
            let pong_deadline = grace.map(|grace| last_pong + grace);
            tokio::select! {
                biased;

                out = outgoing.recv() => match out {
                    Some(Outgoing::Text(frame)) => {
                        if let Err(e) = sink.send(Message::text(frame)).await {
                            tracing::warn!("send failed: {}", e);
                            return SocketEnd::Dropped(CLOSE_ABNORMAL);
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let _ = sink.send(close_message(code, reason)).await;
                        return SocketEnd::Local;
                    }
                    None => return SocketEnd::Local,
                },

                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return SocketEnd::Local;
                }

                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match WireMessage::from_json(text.as_str()) {
                            Ok(WireMessage::Event(event)) => self.messages.notify(&event),
                            Ok(WireMessage::Pong { .. }) => last_pong = Instant::now(),
                            Ok(WireMessage::Ping { timestamp }) => {
                                if let Ok(pong) = WireMessage::pong(Some(timestamp)).to_json() {
                                    let _ = sink.send(Message::text(pong)).await;
                                }
                            }
                            Err(e) => tracing::warn!("dropping unparseable frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code));
                        return SocketEnd::Dropped(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("connection error: {}", e);
                        return SocketEnd::Dropped(CLOSE_ABNORMAL);
                    }
                    None => return SocketEnd::Dropped(CLOSE_ABNORMAL),
                },

                _ = tick(&mut ping_timer) => {
                    let ping = WireMessage::ping(now_ms()).to_json().unwrap_or_default();
                    if let Err(e) = sink.send(Message::text(ping)).await {
                        tracing::warn!("heartbeat send failed: {}", e);
                        return SocketEnd::Dropped(CLOSE_ABNORMAL);
                    }
                }

                _ = sleep_until(pong_deadline) => {
                    tracing::warn!("no pong within {:?}, closing connection", grace.unwrap_or_default());
                    let _ = sink
                        .send(close_message(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout".to_string()))
                        .await;
                    return SocketEnd::Dropped(CLOSE_HEARTBEAT_TIMEOUT);
                }
            }
        }
    }
}

/// Drives one generation: runs the socket, then reconnects until told to stop.
async fn supervise(
    inner: Arc<ClientInner>,
    generation: u64,
    cancel: CancellationToken,
    mut conn: Option<Connection>,
) {
    loop {
        if let Some(open) = conn.take() {
            let end = inner.run(open, &cancel).await;
            inner.release(generation);
            match end {
                SocketEnd::Local => return,
                SocketEnd::Dropped(code) if !should_reconnect(code) => {
                    tracing::info!("connection closed with code {}, not reconnecting", code);
                    if inner.is_current(generation) {
                        inner.state.set(ConnectionState::Disconnected);
                    }
                    return;
                }
                SocketEnd::Dropped(code) => tracing::info!("connection lost (code {})", code),
            }
        }

        let Some(attempt) = inner.next_attempt(generation) else {
            return;
        };
        let delay = reconnect_delay(inner.config.reconnect_interval(), attempt);
        tracing::info!(
            "reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            attempt,
            inner.config.max_reconnect_attempts
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let url = match inner.build_url() {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("cannot reconnect: {}", e);
                return;
            }
        };
        match inner.open(generation, &url).await {
            Ok(open) => conn = Some(open),
            Err(TransportError::Cancelled) => return,
            Err(e) => tracing::warn!("reconnect attempt {} failed: {}", attempt, e),
        }
    }
}

fn close_message(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() }))
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "ws_client_tests.rs"]
mod tests;
