// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use tw_core::Event;

use crate::cli::GlobalArgs;
use crate::error::{Error, Result};
use crate::transport::AnyTransport;

use super::open_transport;

/// Prints the stored event list as pretty JSON.
pub fn run(args: &GlobalArgs) -> Result<()> {
    let (_, transport) = open_transport(args)?;
    let events = stored_events(&transport)?;
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

/// Reads the decrypted list visible to the transport's identity.
pub(crate) fn stored_events(transport: &AnyTransport) -> Result<Vec<Event>> {
    let local = transport.local().ok_or_else(|| {
        Error::Config(format!(
            "{} mode keeps no stored events\n  hint: use --mode localStorage or --mode hybrid",
            transport.kind()
        ))
    })?;
    Ok(local.read_events_list())
}

#[cfg(test)]
#[path = "show_tests.rs"]
mod tests;
