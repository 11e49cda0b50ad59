//! Store coordinator: the single owner of a store connection.
//!
//! # Responsibility
//! - Attach a store of the configured type for one model.
//! - Apply the configured recovery policy when attaching fails.
//! - Serve row reads and transactional change sets to contexts.
//!
//! # Invariants
//! - One coordinator owns at most one connection, to one store.
//! - After `detach` every operation fails with `StoreError::Detached`.
//! - A change set is applied entirely or not at all.

use super::files::remove_store_files;
use super::open::open_store;
use super::rows::{count_rows, delete_row, fetch_all, fetch_row, insert_row, update_row};
use super::{RowChange, StoreError, StoreResult};
use crate::config::{RecoveryPolicy, StackConfig, StoreLocation};
use crate::model::object::{ManagedObject, ObjectId};
use crate::model::schema::{EntityDescription, ObjectModel};
use log::{error, info, warn};
use rusqlite::Connection;
use std::cell::RefCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Mediates between contexts and one attached store.
///
/// Not `Send`: a coordinator stays on the thread that attached it.
#[derive(Debug)]
pub struct StoreCoordinator {
    model: Arc<ObjectModel>,
    location: StoreLocation,
    conn: RefCell<Option<Connection>>,
}

impl StoreCoordinator {
    /// Attaches the store described by `config` for `model`.
    ///
    /// When the first attempt fails and `config.recovery()` allows it, the
    /// store file is deleted and attaching is retried exactly once.
    ///
    /// # Side effects
    /// - May create or delete the store file.
    /// - Emits `store_attach` logging events.
    pub fn attach(model: Arc<ObjectModel>, config: &StackConfig) -> StoreResult<Self> {
        let started_at = Instant::now();
        let location = config.store_location();
        info!("event=store_attach module=store status=start");

        let first_attempt = open_store(&location, &model, config.busy_timeout());
        let conn = match (first_attempt, &location) {
            (Ok(conn), _) => conn,
            (Err(err), StoreLocation::File(path)) if allows_recreate(config.recovery(), &err) => {
                warn!(
                    "event=store_attach module=store status=retry error_code={} error={}",
                    err.code(),
                    err
                );
                remove_store_files(path)?;
                open_store(&location, &model, config.busy_timeout())
                    .map_err(|retry_err| log_attach_failure(started_at, retry_err))?
            }
            (Err(err), _) => return Err(log_attach_failure(started_at, err)),
        };

        info!(
            "event=store_attach module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            model,
            location,
            conn: RefCell::new(Some(conn)),
        })
    }

    pub fn model(&self) -> &Arc<ObjectModel> {
        &self.model
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Store file path; `None` for in-memory stores.
    pub fn store_path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn is_attached(&self) -> bool {
        self.conn.borrow().is_some()
    }

    /// Closes the connection. Idempotent.
    pub fn detach(&self) -> StoreResult<()> {
        let Some(conn) = self.conn.borrow_mut().take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, err)| StoreError::from(err))?;
        info!("event=store_detach module=store status=ok");
        Ok(())
    }

    /// Number of persisted objects of `entity`.
    pub fn count(&self, entity: &str) -> StoreResult<u64> {
        let description = self.entity(entity)?;
        self.with_connection(|conn| count_rows(conn, description))
    }

    /// Persisted objects of `entity`, ordered by id.
    pub fn fetch_entity(&self, entity: &str) -> StoreResult<Vec<ManagedObject>> {
        let description = self.entity(entity)?;
        self.with_connection(|conn| fetch_all(conn, description))
    }

    /// Persisted object `id` of `entity`.
    pub fn fetch_object(&self, entity: &str, id: ObjectId) -> StoreResult<Option<ManagedObject>> {
        let description = self.entity(entity)?;
        self.with_connection(|conn| fetch_row(conn, description, id))
    }

    /// Looks `id` up across every entity of the model.
    pub fn find_object(&self, id: ObjectId) -> StoreResult<Option<ManagedObject>> {
        self.with_connection(|conn| {
            for description in self.model.entities() {
                if let Some(object) = fetch_row(conn, description, id)? {
                    return Ok(Some(object));
                }
            }
            Ok(None)
        })
    }

    /// Applies `changes` in one transaction.
    ///
    /// Returns the number of rows written. On error nothing is written.
    ///
    /// # Side effects
    /// - Emits `store_save` logging events.
    pub fn apply_changes(&self, changes: &[RowChange<'_>]) -> StoreResult<usize> {
        let started_at = Instant::now();
        let result = self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;
            for change in changes {
                match change {
                    RowChange::Insert(object) => {
                        insert_row(&tx, self.entity(&object.entity)?, object)?
                    }
                    RowChange::Update(object) => {
                        update_row(&tx, self.entity(&object.entity)?, object)?
                    }
                    RowChange::Delete { entity, id } => delete_row(&tx, self.entity(entity)?, *id)?,
                }
            }
            tx.commit()?;
            Ok(changes.len())
        });

        match &result {
            Ok(written) => info!(
                "event=store_save module=store status=ok duration_ms={} rows={}",
                started_at.elapsed().as_millis(),
                written
            ),
            Err(err) => error!(
                "event=store_save module=store status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    fn entity(&self, name: &str) -> StoreResult<&EntityDescription> {
        self.model
            .entity(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }

    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = self.conn.borrow();
        let conn = guard.as_ref().ok_or(StoreError::Detached)?;
        operation(conn)
    }
}

fn allows_recreate(policy: RecoveryPolicy, err: &StoreError) -> bool {
    match policy {
        RecoveryPolicy::Never => false,
        RecoveryPolicy::RecreateOnIncompatible => err.is_recoverable_by_recreate(),
        RecoveryPolicy::RecreateOnAnyError => true,
    }
}

fn log_attach_failure(started_at: Instant, err: StoreError) -> StoreError {
    error!(
        "event=store_attach module=store status=error duration_ms={} error_code={} error={}",
        started_at.elapsed().as_millis(),
        err.code(),
        err
    );
    err
}
