// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tw-relay: WebSocket relay server for tabwire transports.
//!
//! Every event a client sends is broadcast to all connected clients; each
//! client drops the events carrying its own session id. JSON pings are
//! answered with pongs so clients can detect dead connections.

mod server;
mod state;

use clap::Parser;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// tw-relay: Event relay server for tabwire
#[derive(Parser, Debug)]
#[command(name = "tw-relay")]
#[command(about = "WebSocket relay server for tabwire event transports")]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1:7891")]
    bind: SocketAddr,

    /// Token clients must present in the `token` query parameter
    #[arg(short, long)]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tw-relay server");
    info!("  Bind address: {}", args.bind);
    info!("  Token required: {}", if args.token.is_some() { "yes" } else { "no" });

    let state = state::RelayState::new(args.token);
    server::run(args.bind, state).await
}
