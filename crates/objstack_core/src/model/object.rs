//! Managed object record and attribute values.
//!
//! # Responsibility
//! - Define the record shape a context tracks and a store persists.
//! - Convert schema-file JSON defaults into typed values.
//!
//! # Invariants
//! - `id` is stable and never reused for another object.
//! - `entity` names an entity of the model the object was created from.

use crate::model::schema::{AttributeType, EntityDescription};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable identifier of a managed object.
pub type ObjectId = Uuid;

/// One attribute value as held in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Null,
    Text(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Binary(Vec<u8>),
    /// Unix epoch milliseconds.
    Date(i64),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Attribute type this value belongs to; `None` for `Null`.
    pub fn kind(&self) -> Option<AttributeType> {
        match self {
            Self::Null => None,
            Self::Text(_) => Some(AttributeType::String),
            Self::Integer(_) => Some(AttributeType::Integer),
            Self::Double(_) => Some(AttributeType::Double),
            Self::Boolean(_) => Some(AttributeType::Boolean),
            Self::Binary(_) => Some(AttributeType::Binary),
            Self::Date(_) => Some(AttributeType::Date),
        }
    }

    /// Converts a schema-file default into a typed value.
    ///
    /// Returns `None` when `value` does not fit `kind`. Binary attributes
    /// accept only `null` defaults.
    pub fn from_json(kind: AttributeType, value: &serde_json::Value) -> Option<Self> {
        if value.is_null() {
            return Some(Self::Null);
        }
        match kind {
            AttributeType::String => value.as_str().map(|text| Self::Text(text.to_string())),
            AttributeType::Integer => value.as_i64().map(Self::Integer),
            AttributeType::Double => value.as_f64().map(Self::Double),
            AttributeType::Boolean => value.as_bool().map(Self::Boolean),
            AttributeType::Date => value.as_i64().map(Self::Date),
            AttributeType::Binary => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One entity instance tracked by a context or read from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub id: ObjectId,
    pub entity: String,
    pub values: BTreeMap<String, AttributeValue>,
}

impl ManagedObject {
    /// Creates an object with a generated id and schema initial values.
    pub fn new(entity: &EntityDescription) -> Self {
        Self::with_id(Uuid::new_v4(), entity)
    }

    /// Creates an object with a caller-provided id and schema initial values.
    pub fn with_id(id: ObjectId, entity: &EntityDescription) -> Self {
        let values = entity
            .attributes
            .iter()
            .map(|attribute| (attribute.name.clone(), attribute.initial_value()))
            .collect();
        Self {
            id,
            entity: entity.name.clone(),
            values,
        }
    }

    pub fn value(&self, attribute: &str) -> Option<&AttributeValue> {
        self.values.get(attribute)
    }

    pub fn text(&self, attribute: &str) -> Option<&str> {
        match self.values.get(attribute) {
            Some(AttributeValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn integer(&self, attribute: &str) -> Option<i64> {
        match self.values.get(attribute) {
            Some(AttributeValue::Integer(value)) | Some(AttributeValue::Date(value)) => {
                Some(*value)
            }
            _ => None,
        }
    }

    pub fn boolean(&self, attribute: &str) -> Option<bool> {
        match self.values.get(attribute) {
            Some(AttributeValue::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    /// Names of required attributes of `entity` that are still `Null`.
    pub fn missing_required<'a>(&self, entity: &'a EntityDescription) -> Vec<&'a str> {
        entity
            .attributes
            .iter()
            .filter(|attribute| !attribute.optional)
            .filter(|attribute| {
                self.values
                    .get(&attribute.name)
                    .map_or(true, AttributeValue::is_null)
            })
            .map(|attribute| attribute.name.as_str())
            .collect()
    }
}
