// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow unused items: test helpers are shared across multiple test binaries,
// and not every test file uses every helper.
#![allow(dead_code)]
#![allow(unused_imports)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;

pub use predicates::prelude::*;
pub use tempfile::TempDir;

const ENV_OVERRIDES: [&str; 4] = [
    "TABWIRE_TRANSPORT",
    "TABWIRE_WS_URL",
    "TABWIRE_RECONNECT_INTERVAL",
    "TABWIRE_MAX_RECONNECT_ATTEMPTS",
];

/// The binary with environment overrides cleared.
pub fn tabwire() -> Command {
    let mut cmd = cargo_bin_cmd!("tabwire");
    for key in ENV_OVERRIDES {
        cmd.env_remove(key);
    }
    cmd.env("RUST_LOG", "off");
    cmd
}

/// The binary pointed at `temp` as its data dir, acting as `user`.
pub fn tabwire_in(temp: &TempDir, user: &str) -> Command {
    let mut cmd = tabwire();
    cmd.arg("--data-dir").arg(temp.path()).arg("--user").arg(user);
    cmd
}
