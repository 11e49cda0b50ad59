//! Connection bootstrap for store files and in-memory stores.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by the coordinator.
//! - Run schema sync before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - File stores run in WAL journal mode.
//! - Returned connections serve exactly the given model.

use super::schema_sync::sync_schema;
use super::{StoreError, StoreResult};
use crate::config::StoreLocation;
use crate::model::schema::ObjectModel;
use log::{error, info};
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Opens the store at `location` and syncs it against `model`.
///
/// # Side effects
/// - Creates the store directory and file when missing.
/// - Emits `store_open` logging events with duration and status.
pub(crate) fn open_store(
    location: &StoreLocation,
    model: &ObjectModel,
    busy_timeout: Duration,
) -> StoreResult<Connection> {
    let started_at = Instant::now();
    let mode = mode_label(location);
    info!("event=store_open module=store status=start mode={mode}");

    let mut conn = match connect(location) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=store_open module=store status=error mode={mode} duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            return Err(err);
        }
    };

    match bootstrap_connection(&mut conn, location, model, busy_timeout) {
        Ok(()) => {
            info!(
                "event=store_open module=store status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=store_open module=store status=error mode={mode} duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            );
            Err(err)
        }
    }
}

fn connect(location: &StoreLocation) -> StoreResult<Connection> {
    match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            Ok(Connection::open(path)?)
        }
        StoreLocation::InMemory => Ok(Connection::open_in_memory()?),
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    location: &StoreLocation,
    model: &ObjectModel,
    busy_timeout: Duration,
) -> StoreResult<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if let StoreLocation::File(_) = location {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    }
    sync_schema(conn, model)?;
    Ok(())
}

fn mode_label(location: &StoreLocation) -> &'static str {
    match location {
        StoreLocation::File(_) => "file",
        StoreLocation::InMemory => "memory",
    }
}
