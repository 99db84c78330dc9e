// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Handles client connections, heartbeat replies, and event fanout.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::percent_decode_str;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use tw_core::WireMessage;

use crate::state::RelayState;

/// Close code sent to clients presenting a wrong token.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", listener.local_addr()?);
    serve(listener, state).await
}

/// Accept connections from an already bound listener.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let mut token = None;
    let callback = |req: &Request, resp: Response| {
        token = query_param(req.uri().query(), "token");
        Ok::<Response, ErrorResponse>(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    if !state.authorize(token.as_deref()) {
        warn!("Rejecting {}: invalid token", peer_addr);
        let frame = CloseFrame {
            code: CloseCode::from(CLOSE_AUTH_FAILED),
            reason: String::from("authentication failed").into(),
        };
        ws_sink.send(Message::Close(Some(frame))).await?;
        return Ok(());
    }

    // A counted client is already subscribed
    let mut broadcast_rx = state.subscribe();
    let _client = state.register_client();
    info!("New WebSocket connection from: {}", peer_addr);

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match handle_client_frame(text.as_str(), &state) {
                            Ok(Some(reply)) => {
                                ws_sink.send(Message::text(reply.to_json()?)).await?;
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Dropping malformed frame from {}: {}", peer_addr, e),
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong and raw frames carry nothing for us
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(frame) => {
                        if let Err(e) = ws_sink.send(Message::text(frame.to_string())).await {
                            warn!("Failed to send broadcast to {}: {}", peer_addr, e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} frames", peer_addr, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Connection closed: {}", peer_addr);
    Ok(())
}

/// Process one text frame and return an optional direct reply.
///
/// Events are published verbatim; pings are answered with a pong echoing
/// the timestamp.
pub(crate) fn handle_client_frame(
    text: &str,
    state: &RelayState,
) -> tw_core::Result<Option<WireMessage>> {
    match WireMessage::from_json(text)? {
        WireMessage::Ping { timestamp } => {
            debug!("Ping received: {}", timestamp);
            Ok(Some(WireMessage::pong(Some(timestamp))))
        }
        WireMessage::Pong { .. } => Ok(None),
        WireMessage::Event(event) => {
            let receivers = state.publish(text);
            debug!(
                "Relayed {} ({}) from {} to {} clients",
                event.event_type, event.event_id, event.session_id, receivers
            );
            Ok(None)
        }
    }
}

/// Extracts and percent-decodes one query parameter.
pub(crate) fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| percent_decode_str(value).decode_utf8_lossy().into_owned())
    })
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
