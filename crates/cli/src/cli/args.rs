// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use clap::Args;
use std::path::PathBuf;

use crate::config::TransportMode;

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Transport configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory backing the shared storage area
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Override the configured transport mode
    #[arg(short, long, global = true, value_name = "MODE")]
    pub mode: Option<TransportMode>,

    /// Session id of this instance (default: random)
    #[arg(long, global = true, value_name = "ID")]
    pub session: Option<String>,

    /// User id; events are shared and encrypted per user
    #[arg(short, long, global = true, value_name = "ID")]
    pub user: Option<String>,

    /// Credential presented to the relay
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}
