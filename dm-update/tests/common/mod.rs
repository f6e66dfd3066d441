//! Shared test helpers for update tests.

#![allow(dead_code)]

use dm_update::{UpdateInfo, UpdateMachine};
use std::path::PathBuf;

pub const UPDATE_BODY: &str = r#"{
    "version": "2.0.1",
    "releaseNotes": "Bug fixes",
    "sizeBytes": 1048576,
    "downloadUrl": "https://updates.example.com/app-2.0.1.pkg",
    "postUpdateInfo": {"requiresRevalidation": true}
}"#;

pub fn sample_info() -> UpdateInfo {
    UpdateInfo::from_response(200, UPDATE_BODY.as_bytes())
        .unwrap()
        .unwrap()
}

/// A machine holding an available update.
pub fn available_machine() -> UpdateMachine {
    let mut machine = UpdateMachine::new();
    machine.begin_check().unwrap();
    machine.finish_check(Ok(Some(sample_info()))).unwrap();
    machine
}

/// A machine holding a downloaded package.
pub fn downloaded_machine() -> UpdateMachine {
    let mut machine = available_machine();
    let ticket = machine.begin_download().unwrap();
    assert!(machine.finish_download(ticket.generation, Ok(PathBuf::from("/tmp/app.pkg"))));
    machine
}
