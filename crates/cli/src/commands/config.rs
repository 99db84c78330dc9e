// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use crate::cli::GlobalArgs;
use crate::error::Result;

use super::load_config;

/// Prints the effective configuration as TOML.
pub fn run(args: &GlobalArgs) -> Result<()> {
    let config = load_config(args)?;
    print!("{}", config.to_toml()?);
    Ok(())
}
