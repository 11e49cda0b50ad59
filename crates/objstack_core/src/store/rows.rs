//! Row codec between managed objects and entity tables.
//!
//! # Responsibility
//! - Keep per-entity SQL inside the store boundary.
//! - Convert attribute values to and from SQLite values.
//!
//! # Invariants
//! - Column order always follows the entity's attribute order.
//! - Read paths reject values that do not fit the declared attribute type
//!   instead of masking them.

use super::schema_sync::quote_identifier;
use super::{StoreError, StoreResult};
use crate::model::object::{AttributeValue, ManagedObject, ObjectId};
use crate::model::schema::{AttributeDescription, AttributeType, EntityDescription};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

static NULL_VALUE: AttributeValue = AttributeValue::Null;

pub(crate) fn insert_row(
    conn: &Connection,
    entity: &EntityDescription,
    object: &ManagedObject,
) -> StoreResult<()> {
    let mut columns = vec![quote_identifier("id")];
    let mut placeholders = vec!["?1".to_string()];
    let mut bind_values = vec![Value::Text(object.id.to_string())];

    for attribute in &entity.attributes {
        columns.push(quote_identifier(&attribute.name));
        bind_values.push(to_sql_value(value_of(object, attribute)));
        placeholders.push(format!("?{}", bind_values.len()));
    }

    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({});",
            quote_identifier(&entity.name),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(bind_values),
    )?;
    Ok(())
}

pub(crate) fn update_row(
    conn: &Connection,
    entity: &EntityDescription,
    object: &ManagedObject,
) -> StoreResult<()> {
    if entity.attributes.is_empty() {
        // Nothing to write; still confirm the row exists.
        return match fetch_row(conn, entity, object.id)? {
            Some(_) => Ok(()),
            None => Err(missing_row(entity, object.id)),
        };
    }

    let mut assignments = Vec::with_capacity(entity.attributes.len());
    let mut bind_values = Vec::with_capacity(entity.attributes.len() + 1);
    for attribute in &entity.attributes {
        bind_values.push(to_sql_value(value_of(object, attribute)));
        assignments.push(format!(
            "{} = ?{}",
            quote_identifier(&attribute.name),
            bind_values.len()
        ));
    }
    bind_values.push(Value::Text(object.id.to_string()));

    let changed = conn.execute(
        &format!(
            "UPDATE {} SET {} WHERE \"id\" = ?{};",
            quote_identifier(&entity.name),
            assignments.join(", "),
            bind_values.len()
        ),
        params_from_iter(bind_values),
    )?;

    if changed == 0 {
        return Err(missing_row(entity, object.id));
    }
    Ok(())
}

pub(crate) fn delete_row(
    conn: &Connection,
    entity: &EntityDescription,
    id: ObjectId,
) -> StoreResult<()> {
    let changed = conn.execute(
        &format!(
            "DELETE FROM {} WHERE \"id\" = ?1;",
            quote_identifier(&entity.name)
        ),
        [id.to_string()],
    )?;

    if changed == 0 {
        return Err(missing_row(entity, id));
    }
    Ok(())
}

pub(crate) fn fetch_row(
    conn: &Connection,
    entity: &EntityDescription,
    id: ObjectId,
) -> StoreResult<Option<ManagedObject>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE \"id\" = ?1;",
        select_sql(entity)
    ))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_row(row, entity)?));
    }
    Ok(None)
}

/// All rows of `entity`, ordered by id.
pub(crate) fn fetch_all(
    conn: &Connection,
    entity: &EntityDescription,
) -> StoreResult<Vec<ManagedObject>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY \"id\" ASC;", select_sql(entity)))?;
    let mut rows = stmt.query([])?;
    let mut objects = Vec::new();
    while let Some(row) = rows.next()? {
        objects.push(parse_row(row, entity)?);
    }
    Ok(objects)
}

pub(crate) fn count_rows(conn: &Connection, entity: &EntityDescription) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {};", quote_identifier(&entity.name)),
        [],
        |row| row.get(0),
    )?;
    u64::try_from(count)
        .map_err(|_| StoreError::InvalidData(format!("negative row count {count}")))
}

fn select_sql(entity: &EntityDescription) -> String {
    let mut columns = vec![quote_identifier("id")];
    columns.extend(
        entity
            .attributes
            .iter()
            .map(|attribute| quote_identifier(&attribute.name)),
    );
    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_identifier(&entity.name)
    )
}

fn parse_row(row: &Row<'_>, entity: &EntityDescription) -> StoreResult<ManagedObject> {
    let id_text: String = row.get(0)?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid id `{id_text}` in {}.id", entity.name))
    })?;

    let mut values = BTreeMap::new();
    for (offset, attribute) in entity.attributes.iter().enumerate() {
        let raw: Value = row.get(offset + 1)?;
        let value = from_sql_value(raw, attribute).ok_or_else(|| {
            StoreError::InvalidData(format!(
                "value in {}.{} does not fit type {}",
                entity.name, attribute.name, attribute.kind
            ))
        })?;
        values.insert(attribute.name.clone(), value);
    }

    Ok(ManagedObject {
        id,
        entity: entity.name.clone(),
        values,
    })
}

fn value_of<'a>(object: &'a ManagedObject, attribute: &AttributeDescription) -> &'a AttributeValue {
    object
        .values
        .get(&attribute.name)
        .unwrap_or(&NULL_VALUE)
}

fn to_sql_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Text(text) => Value::Text(text.clone()),
        AttributeValue::Integer(number) | AttributeValue::Date(number) => Value::Integer(*number),
        AttributeValue::Double(number) => Value::Real(*number),
        AttributeValue::Boolean(flag) => Value::Integer(i64::from(*flag)),
        AttributeValue::Binary(bytes) => Value::Blob(bytes.clone()),
    }
}

fn from_sql_value(value: Value, attribute: &AttributeDescription) -> Option<AttributeValue> {
    match (attribute.kind, value) {
        (_, Value::Null) => Some(AttributeValue::Null),
        (AttributeType::String, Value::Text(text)) => Some(AttributeValue::Text(text)),
        (AttributeType::Integer, Value::Integer(number)) => Some(AttributeValue::Integer(number)),
        (AttributeType::Date, Value::Integer(number)) => Some(AttributeValue::Date(number)),
        (AttributeType::Double, Value::Real(number)) => Some(AttributeValue::Double(number)),
        // REAL affinity may hand back integral values as integers.
        (AttributeType::Double, Value::Integer(number)) => {
            Some(AttributeValue::Double(number as f64))
        }
        (AttributeType::Boolean, Value::Integer(0)) => Some(AttributeValue::Boolean(false)),
        (AttributeType::Boolean, Value::Integer(1)) => Some(AttributeValue::Boolean(true)),
        (AttributeType::Binary, Value::Blob(bytes)) => Some(AttributeValue::Binary(bytes)),
        _ => None,
    }
}

fn missing_row(entity: &EntityDescription, id: ObjectId) -> StoreError {
    StoreError::MissingRow {
        entity: entity.name.clone(),
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::{count_rows, delete_row, fetch_all, fetch_row, insert_row, update_row};
    use crate::model::object::{AttributeValue, ManagedObject};
    use crate::model::schema::ObjectModel;
    use crate::store::schema_sync::sync_schema;
    use crate::store::StoreError;
    use rusqlite::Connection;

    fn setup() -> (Connection, ObjectModel) {
        let model = ObjectModel::from_json_str(
            r#"{"entities":[{"name":"Item","attributes":[
                {"name":"label","type":"string"},
                {"name":"weight","type":"double","optional":true},
                {"name":"flag","type":"boolean","default":true},
                {"name":"payload","type":"binary","optional":true},
                {"name":"seen_at","type":"date","optional":true}]}]}"#,
        )
        .expect("test model should parse");
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        sync_schema(&mut conn, &model).expect("schema sync");
        (conn, model)
    }

    #[test]
    fn insert_then_fetch_preserves_every_type() {
        let (conn, model) = setup();
        let entity = model.entity("Item").expect("entity");
        let mut object = ManagedObject::new(entity);
        object.values.insert("label".into(), "crate".into());
        object.values.insert("weight".into(), AttributeValue::Double(2.5));
        object.values.insert("payload".into(), AttributeValue::Binary(vec![0, 1, 2]));
        object.values.insert("seen_at".into(), AttributeValue::Date(1_700_000_000_000));
        insert_row(&conn, entity, &object).expect("insert");

        let loaded = fetch_row(&conn, entity, object.id)
            .expect("fetch")
            .expect("row should exist");
        assert_eq!(loaded, object);
        assert_eq!(count_rows(&conn, entity).expect("count"), 1);
    }

    #[test]
    fn update_and_delete_report_missing_rows() {
        let (conn, model) = setup();
        let entity = model.entity("Item").expect("entity");
        let mut object = ManagedObject::new(entity);
        object.values.insert("label".into(), "a".into());

        let err = update_row(&conn, entity, &object).expect_err("row does not exist yet");
        assert!(matches!(err, StoreError::MissingRow { .. }));

        insert_row(&conn, entity, &object).expect("insert");
        object.values.insert("label".into(), "b".into());
        update_row(&conn, entity, &object).expect("update");
        assert_eq!(
            fetch_all(&conn, entity).expect("fetch all")[0].text("label"),
            Some("b")
        );

        delete_row(&conn, entity, object.id).expect("delete");
        let err = delete_row(&conn, entity, object.id).expect_err("already deleted");
        assert!(matches!(err, StoreError::MissingRow { .. }));
    }

    #[test]
    fn rejects_values_that_do_not_fit_the_schema() {
        let (conn, model) = setup();
        let entity = model.entity("Item").expect("entity");
        conn.execute(
            "INSERT INTO \"Item\" (id, label, flag) VALUES (?1, 'x', 7);",
            [uuid::Uuid::new_v4().to_string()],
        )
        .expect("raw insert");

        let err = fetch_all(&conn, entity).expect_err("flag 7 is not a boolean");
        assert!(matches!(err, StoreError::InvalidData(_)));
    }
}
