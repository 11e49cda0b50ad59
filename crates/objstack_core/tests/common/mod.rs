#![allow(dead_code)]

use objstack_core::{PersistenceStack, RecoveryPolicy, StackConfig};
use std::path::{Path, PathBuf};

pub const JOURNAL_MODEL: &str = r#"{
    "name": "Journal",
    "entities": [
        {
            "name": "Note",
            "attributes": [
                { "name": "title", "type": "string" },
                { "name": "body", "type": "string", "optional": true },
                { "name": "pinned", "type": "boolean", "default": false },
                { "name": "created_at", "type": "date", "optional": true }
            ]
        },
        {
            "name": "Tag",
            "attributes": [
                { "name": "label", "type": "string" },
                { "name": "weight", "type": "double", "default": 1.0 }
            ]
        }
    ]
}"#;

/// Journal model with `Note.title` renamed, so its fingerprint differs.
pub const RENAMED_MODEL: &str = r#"{
    "name": "Journal",
    "entities": [
        {
            "name": "Note",
            "attributes": [
                { "name": "heading", "type": "string" }
            ]
        }
    ]
}"#;

pub const STORE_NAME: &str = "Journal.sqlite";

pub fn write_model(dir: &Path, file_name: &str, json: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, json).unwrap();
    path
}

pub fn journal_stack(dir: &Path) -> PersistenceStack {
    let model_path = write_model(dir, "Journal.json", JOURNAL_MODEL);
    stack_for(&model_path, dir, RecoveryPolicy::default())
}

pub fn stack_for(model_path: &Path, dir: &Path, recovery: RecoveryPolicy) -> PersistenceStack {
    let config = StackConfig::builder(model_path, dir.join("store"))
        .store_name(STORE_NAME)
        .recovery(recovery)
        .build()
        .unwrap();
    PersistenceStack::new(config)
}

pub fn store_path(dir: &Path) -> PathBuf {
    dir.join("store").join(STORE_NAME)
}
