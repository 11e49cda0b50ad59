//! Store format bootstrap and model compatibility check.
//!
//! # Responsibility
//! - Create the metadata table and one table per entity on a fresh store.
//! - Refuse stores written by a newer format or a different model.
//!
//! # Invariants
//! - Store format version is mirrored to `PRAGMA user_version`.
//! - Metadata and entity tables are created in a single transaction.
//! - Existing stores are never altered; model changes are not migrated.

use super::{StoreError, StoreResult};
use crate::model::schema::{AttributeType, EntityDescription, ObjectModel};
use rusqlite::{params, Connection, OptionalExtension};

/// Internal table holding store-level key/value metadata.
pub const METADATA_TABLE: &str = "_objstack_metadata";
const FORMAT_VERSION: u32 = 1;
const KEY_MODEL_FINGERPRINT: &str = "model_fingerprint";
const KEY_STORE_FORMAT: &str = "store_format";
const KEY_MODEL_NAME: &str = "model_name";

/// Returns the latest store format version known by this binary.
pub fn latest_format_version() -> u32 {
    FORMAT_VERSION
}

/// Prepares `conn` to serve `model`.
///
/// A fresh store is initialized; an existing one must carry the same
/// format version and model fingerprint.
pub(crate) fn sync_schema(conn: &mut Connection, model: &ObjectModel) -> StoreResult<()> {
    let current_version = current_user_version(conn)?;
    let latest = latest_format_version();
    let fingerprint = model.fingerprint();

    if current_version > latest {
        return Err(StoreError::UnsupportedFormat {
            store_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        let stored = stored_fingerprint(conn)?;
        return match stored {
            Some(stored) if stored == fingerprint => Ok(()),
            other => Err(StoreError::IncompatibleModel {
                store_fingerprint: other,
                model_fingerprint: fingerprint,
            }),
        };
    }

    if current_version == 0 && has_user_tables(conn)? {
        return Err(StoreError::IncompatibleModel {
            store_fingerprint: None,
            model_fingerprint: fingerprint,
        });
    }

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE {METADATA_TABLE} (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );"
    ))?;
    let insert_sql = format!("INSERT INTO {METADATA_TABLE} (key, value) VALUES (?1, ?2);");
    tx.execute(&insert_sql, params![KEY_MODEL_FINGERPRINT, fingerprint])?;
    tx.execute(&insert_sql, params![KEY_STORE_FORMAT, latest.to_string()])?;
    if let Some(name) = model.name() {
        tx.execute(&insert_sql, params![KEY_MODEL_NAME, name])?;
    }
    for entity in model.entities() {
        tx.execute_batch(&create_table_sql(entity))?;
    }
    tx.execute_batch(&format!("PRAGMA user_version = {latest};"))?;
    tx.commit()?;

    Ok(())
}

/// Reads the model fingerprint recorded in the store metadata.
pub fn stored_fingerprint(conn: &Connection) -> StoreResult<Option<String>> {
    if !table_exists(conn, METADATA_TABLE)? {
        return Ok(None);
    }
    let value = conn
        .query_row(
            &format!("SELECT value FROM {METADATA_TABLE} WHERE key = ?1;"),
            [KEY_MODEL_FINGERPRINT],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(entity: &EntityDescription) -> String {
    let mut columns = vec!["\"id\" TEXT PRIMARY KEY NOT NULL".to_string()];
    for attribute in &entity.attributes {
        let null_clause = if attribute.optional { "" } else { " NOT NULL" };
        columns.push(format!(
            "{} {}{null_clause}",
            quote_identifier(&attribute.name),
            column_type(attribute.kind)
        ));
    }
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_identifier(&entity.name),
        columns.join(",\n    ")
    )
}

fn column_type(kind: AttributeType) -> &'static str {
    match kind {
        AttributeType::String => "TEXT",
        AttributeType::Integer | AttributeType::Boolean | AttributeType::Date => "INTEGER",
        AttributeType::Double => "REAL",
        AttributeType::Binary => "BLOB",
    }
}

fn current_user_version(conn: &Connection) -> StoreResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn has_user_tables(conn: &Connection) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
        );",
        [],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
