// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

mod args;

use clap::{Parser, Subcommand};

pub use args::GlobalArgs;

/// Parse a string that must not be empty or whitespace-only.
fn non_empty_string(s: &str) -> Result<String, String> {
    if s.trim().is_empty() {
        Err("cannot be empty".to_string())
    } else {
        Ok(s.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "tabwire")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send and receive events between application instances")]
#[command(
    long_about = "Send and receive events between application instances.\n\n\
    Events travel through a shared storage directory, a WebSocket relay, or both."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one event
    #[command(after_help = "\
Examples:
  tabwire send trip:updated                          Send an event with an empty payload
  tabwire send trip:updated -p '{\"id\":7}'            Send an event with a payload
  tabwire -m websocket send ping:manual              Send through the relay only")]
    Send {
        /// Event type, e.g. trip:updated
        #[arg(value_parser = non_empty_string)]
        event_type: String,

        /// Event payload as JSON
        #[arg(short, long, value_name = "JSON")]
        payload: Option<String>,
    },

    /// Print events from other instances until interrupted
    Listen,

    /// Print the stored event list
    Show,

    /// Print the effective configuration
    Config,
}

#[cfg(test)]
#[path = "../cli_tests.rs"]
mod tests;
