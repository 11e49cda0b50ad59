//! SQLite-backed store and the coordinator that owns it.
//!
//! # Responsibility
//! - Open and configure SQLite connections for a model (`open`).
//! - Create entity tables and guard against model mismatches (`schema_sync`).
//! - Map managed objects onto rows (`rows`).
//! - Own the on-disk store file lifecycle (`files`, `coordinator`).
//!
//! # Invariants
//! - Store format version is tracked via `PRAGMA user_version`.
//! - A store only ever serves the model whose fingerprint it recorded.
//! - No object data is read or written before schema sync succeeds.

use crate::model::object::{ManagedObject, ObjectId};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod coordinator;
pub mod files;
mod open;
mod rows;
pub mod schema_sync;

pub use coordinator::StoreCoordinator;

pub type StoreResult<T> = Result<T, StoreError>;

/// One row mutation applied by `StoreCoordinator::apply_changes`.
#[derive(Debug, Clone, Copy)]
pub enum RowChange<'a> {
    Insert(&'a ManagedObject),
    Update(&'a ManagedObject),
    Delete { entity: &'a str, id: ObjectId },
}

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// File is not a database or its pages are damaged.
    Corrupt(rusqlite::Error),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Store was created from a different model.
    ///
    /// `store_fingerprint` is `None` for foreign SQLite files that carry no
    /// store metadata at all.
    IncompatibleModel {
        store_fingerprint: Option<String>,
        model_fingerprint: String,
    },
    UnsupportedFormat {
        store_version: u32,
        latest_supported: u32,
    },
    UnknownEntity(String),
    MissingRow {
        entity: String,
        id: ObjectId,
    },
    InvalidData(String),
    /// Coordinator was detached by a stack deletion.
    Detached,
}

impl StoreError {
    /// Whether deleting the store file can cure this error.
    ///
    /// Plain I/O and SQLite errors are not: recreating the file would lose
    /// data without fixing the cause.
    pub fn is_recoverable_by_recreate(&self) -> bool {
        matches!(
            self,
            Self::Corrupt(_) | Self::IncompatibleModel { .. } | Self::UnsupportedFormat { .. }
        )
    }

    /// Stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "store_sqlite",
            Self::Corrupt(_) => "store_corrupt",
            Self::Io { .. } => "store_io",
            Self::IncompatibleModel { .. } => "store_incompatible_model",
            Self::UnsupportedFormat { .. } => "store_unsupported_format",
            Self::UnknownEntity(_) => "store_unknown_entity",
            Self::MissingRow { .. } => "store_missing_row",
            Self::InvalidData(_) => "store_invalid_data",
            Self::Detached => "store_detached",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Corrupt(err) => write!(f, "store file is corrupt: {err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::IncompatibleModel {
                store_fingerprint: Some(store),
                model_fingerprint,
            } => write!(
                f,
                "store was created from model {store}, incompatible with model {model_fingerprint}"
            ),
            Self::IncompatibleModel {
                store_fingerprint: None,
                ..
            } => write!(f, "file is a SQLite database without store metadata"),
            Self::UnsupportedFormat {
                store_version,
                latest_supported,
            } => write!(
                f,
                "store format version {store_version} is newer than supported {latest_supported}"
            ),
            Self::UnknownEntity(name) => write!(f, "entity `{name}` is not part of the model"),
            Self::MissingRow { entity, id } => write!(f, "{entity} row not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Detached => write!(f, "store coordinator is detached"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::Corrupt(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::IncompatibleModel { .. }
            | Self::UnsupportedFormat { .. }
            | Self::UnknownEntity(_)
            | Self::MissingRow { .. }
            | Self::InvalidData(_)
            | Self::Detached => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                Self::Corrupt(value)
            }
            _ => Self::Sqlite(value),
        }
    }
}
