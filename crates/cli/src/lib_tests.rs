// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Tests for the public `run()` function.

use crate::{Cli, Command, Error, GlobalArgs, TransportMode};

fn global_in(dir: &tempfile::TempDir) -> GlobalArgs {
    GlobalArgs {
        data_dir: Some(dir.path().to_path_buf()),
        mode: Some(TransportMode::LocalStorage),
        user: Some("alice".to_string()),
        ..GlobalArgs::default()
    }
}

#[tokio::test]
async fn test_run_send_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let send = Command::Send { event_type: "trip:updated".into(), payload: Some(r#"{"id":7}"#.into()) };
    crate::run(Cli { global: global_in(&dir), command: send }).await.unwrap();
    crate::run(Cli { global: global_in(&dir), command: Command::Show }).await.unwrap();
}

#[tokio::test]
async fn test_run_send_rejects_bad_payload() {
    let dir = tempfile::tempdir().unwrap();
    let send = Command::Send { event_type: "trip:updated".into(), payload: Some("{not json".into()) };

    let err = crate::run(Cli { global: global_in(&dir), command: send }).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPayload(_)));
}

#[tokio::test]
async fn test_run_config() {
    crate::run(Cli { global: GlobalArgs::default(), command: Command::Config }).await.unwrap();
}

#[tokio::test]
async fn test_run_missing_config_file() {
    let global = GlobalArgs {
        config: Some("/nonexistent/tabwire.toml".into()),
        ..GlobalArgs::default()
    };
    let err = crate::run(Cli { global, command: Command::Config }).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}
