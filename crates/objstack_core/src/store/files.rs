//! Store file removal.
//!
//! # Invariants
//! - Removing a store also removes its SQLite sidecar files.
//! - A missing file is not an error.

use super::{StoreError, StoreResult};
use log::{error, info};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Paths of the store file and every sidecar SQLite may create next to it.
pub fn store_file_set(path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![path.to_path_buf()];
    paths.extend(SIDECAR_SUFFIXES.iter().map(|suffix| {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }));
    paths
}

/// Removes the store file and its sidecars.
///
/// Returns whether the main store file existed.
///
/// # Side effects
/// - Emits `store_delete` logging events.
pub fn remove_store_files(path: &Path) -> StoreResult<bool> {
    let started_at = Instant::now();
    let mut existed = false;

    for (index, candidate) in store_file_set(path).into_iter().enumerate() {
        match std::fs::remove_file(&candidate) {
            Ok(()) => existed |= index == 0,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                error!(
                    "event=store_delete module=store status=error duration_ms={} error_code=store_io path={} error={}",
                    started_at.elapsed().as_millis(),
                    candidate.display(),
                    source
                );
                return Err(StoreError::Io {
                    path: candidate,
                    source,
                });
            }
        }
    }

    info!(
        "event=store_delete module=store status=ok duration_ms={} existed={}",
        started_at.elapsed().as_millis(),
        existed
    );
    Ok(existed)
}
