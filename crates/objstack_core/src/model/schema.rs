//! Schema descriptor loading and validation.
//!
//! # Responsibility
//! - Parse the JSON schema description file into an `ObjectModel`.
//! - Reject schemas that cannot be mapped onto store tables.
//! - Provide a stable fingerprint used to detect model/store mismatches.
//!
//! # Invariants
//! - Entity and attribute names are ASCII identifiers and unique
//!   (case-insensitive) within their scope.
//! - Attribute name `id` is reserved for the object identifier column.
//! - Declared defaults always type-check against their attribute.

use crate::model::object::AttributeValue;
use log::{error, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use url::Url;

const RESERVED_ATTRIBUTE: &str = "id";
const RESERVED_ENTITY_PREFIXES: &[&str] = &["_", "sqlite_"];
const FILE_URL_SCHEME: &str = "file";

pub type ModelResult<T> = Result<T, ModelError>;

/// Storage type of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Integer,
    Double,
    Boolean,
    Binary,
    /// Unix epoch milliseconds.
    Date,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Date => "date",
        }
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDescription {
    pub name: String,
    /// Serialized as `type` to match the schema file naming.
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(default)]
    pub optional: bool,
    /// `Some(Value::Null)` records an explicit `"default": null`.
    #[serde(
        default,
        deserialize_with = "declared_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<serde_json::Value>,
}

fn declared_default<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl AttributeDescription {
    /// Value a freshly inserted object starts with.
    ///
    /// Returns `AttributeValue::Null` when no default is declared. Defaults
    /// are checked at load time, so a declared default always converts.
    pub fn initial_value(&self) -> AttributeValue {
        self.default
            .as_ref()
            .and_then(|value| AttributeValue::from_json(self.kind, value))
            .unwrap_or(AttributeValue::Null)
    }

    /// Returns whether `value` may be stored in this attribute.
    ///
    /// `Null` is always accepted here; required attributes are enforced at
    /// save time. NaN is rejected; the store would read it back as `Null`.
    pub fn accepts(&self, value: &AttributeValue) -> bool {
        match value {
            AttributeValue::Null => true,
            AttributeValue::Double(number) if number.is_nan() => false,
            other => other.kind() == Some(self.kind),
        }
    }
}

/// One entity (table) of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }
}

/// Immutable schema descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    entities: Vec<EntityDescription>,
}

impl ObjectModel {
    /// Builds a validated model from entity descriptions.
    pub fn new(
        name: Option<String>,
        entities: Vec<EntityDescription>,
    ) -> Result<Self, ModelValidationError> {
        let model = Self { name, entities };
        model.validate()?;
        Ok(model)
    }

    /// Loads and validates a schema description file.
    ///
    /// # Side effects
    /// - Reads `path` from disk.
    /// - Emits `model_load` logging events with duration and status.
    pub fn load(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let started_at = Instant::now();
        info!(
            "event=model_load module=model status=start path={}",
            path.display()
        );

        let result = std::fs::read_to_string(path)
            .map_err(|source| ModelError::Io {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|text| {
                Self::from_json_str(&text).map_err(|err| match err {
                    ModelError::Parse { source, .. } => ModelError::Parse {
                        path: Some(path.to_path_buf()),
                        source,
                    },
                    other => other,
                })
            });

        match &result {
            Ok(model) => info!(
                "event=model_load module=model status=ok duration_ms={} entities={}",
                started_at.elapsed().as_millis(),
                model.entities.len()
            ),
            Err(err) => error!(
                "event=model_load module=model status=error duration_ms={} error_code={} error={}",
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }
        result
    }

    /// Parses and validates a schema description from JSON text.
    pub fn from_json_str(text: &str) -> ModelResult<Self> {
        let model: Self =
            serde_json::from_str(text).map_err(|source| ModelError::Parse { path: None, source })?;
        model.validate()?;
        Ok(model)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// SHA-256 (hex) of the canonical JSON form of this model.
    ///
    /// Two models describing the same entities in the same order share a
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        // Serializing plain structs and a BTreeMap-backed `Value` cannot fail.
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Checks naming, uniqueness and default invariants.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        if self.entities.is_empty() {
            return Err(ModelValidationError::NoEntities);
        }

        let mut entity_names = BTreeSet::new();
        for entity in &self.entities {
            if !is_valid_identifier(&entity.name) || has_reserved_prefix(&entity.name) {
                return Err(ModelValidationError::InvalidEntityName(entity.name.clone()));
            }
            if !entity_names.insert(entity.name.to_ascii_lowercase()) {
                return Err(ModelValidationError::DuplicateEntity(entity.name.clone()));
            }
            validate_attributes(entity)?;
        }

        Ok(())
    }
}

fn validate_attributes(entity: &EntityDescription) -> Result<(), ModelValidationError> {
    let mut attribute_names = BTreeSet::new();
    for attribute in &entity.attributes {
        if !is_valid_identifier(&attribute.name) {
            return Err(ModelValidationError::InvalidAttributeName {
                entity: entity.name.clone(),
                attribute: attribute.name.clone(),
            });
        }
        if attribute.name.eq_ignore_ascii_case(RESERVED_ATTRIBUTE) {
            return Err(ModelValidationError::ReservedAttributeName {
                entity: entity.name.clone(),
                attribute: attribute.name.clone(),
            });
        }
        if !attribute_names.insert(attribute.name.to_ascii_lowercase()) {
            return Err(ModelValidationError::DuplicateAttribute {
                entity: entity.name.clone(),
                attribute: attribute.name.clone(),
            });
        }
        if let Some(default) = &attribute.default {
            let converted = AttributeValue::from_json(attribute.kind, default);
            let allowed = match converted {
                Some(AttributeValue::Null) => attribute.optional,
                Some(_) => true,
                None => false,
            };
            if !allowed {
                return Err(ModelValidationError::InvalidDefault {
                    entity: entity.name.clone(),
                    attribute: attribute.name.clone(),
                    expected: attribute.kind,
                });
            }
        }
    }
    Ok(())
}

fn is_valid_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn has_reserved_prefix(entity_name: &str) -> bool {
    let lowered = entity_name.to_ascii_lowercase();
    RESERVED_ENTITY_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Resolves a schema location given as a plain path or a `file://` URL.
///
/// Percent-escapes in URLs are decoded. Other URL schemes, non-local hosts,
/// query strings and fragments are rejected.
pub fn model_path_from_url(location: &str) -> ModelResult<PathBuf> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(ModelError::InvalidLocation(
            "model location cannot be empty".to_string(),
        ));
    }

    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => return Ok(PathBuf::from(trimmed)),
        Err(err) => {
            return Err(ModelError::InvalidLocation(format!(
                "cannot parse `{trimmed}`: {err}"
            )))
        }
    };

    if url.scheme() != FILE_URL_SCHEME {
        return Err(ModelError::InvalidLocation(format!(
            "unsupported URL scheme `{}`; expected a file path or file:// URL",
            url.scheme()
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ModelError::InvalidLocation(format!(
            "file URL cannot carry a query or fragment, got `{trimmed}`"
        )));
    }

    // `file://localhost/path` is normalized to an empty host by the parser.
    url.to_file_path().map_err(|()| {
        ModelError::InvalidLocation(format!("file URL must name a local path, got `{trimmed}`"))
    })
}

/// Schema-level invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    NoEntities,
    InvalidEntityName(String),
    DuplicateEntity(String),
    InvalidAttributeName {
        entity: String,
        attribute: String,
    },
    ReservedAttributeName {
        entity: String,
        attribute: String,
    },
    DuplicateAttribute {
        entity: String,
        attribute: String,
    },
    InvalidDefault {
        entity: String,
        attribute: String,
        expected: AttributeType,
    },
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEntities => write!(f, "model must declare at least one entity"),
            Self::InvalidEntityName(name) => write!(f, "invalid entity name `{name}`"),
            Self::DuplicateEntity(name) => write!(f, "duplicate entity `{name}`"),
            Self::InvalidAttributeName { entity, attribute } => {
                write!(f, "invalid attribute name `{entity}.{attribute}`")
            }
            Self::ReservedAttributeName { entity, attribute } => {
                write!(f, "attribute name `{entity}.{attribute}` is reserved")
            }
            Self::DuplicateAttribute { entity, attribute } => {
                write!(f, "duplicate attribute `{entity}.{attribute}`")
            }
            Self::InvalidDefault {
                entity,
                attribute,
                expected,
            } => write!(
                f,
                "default for `{entity}.{attribute}` is not a valid {expected} value"
            ),
        }
    }
}

impl Error for ModelValidationError {}

/// Failure to obtain a usable model from its location.
#[derive(Debug)]
pub enum ModelError {
    InvalidLocation(String),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: Option<PathBuf>,
        source: serde_json::Error,
    },
    Invalid(ModelValidationError),
}

impl ModelError {
    /// Stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidLocation(_) => "model_invalid_location",
            Self::Io { .. } => "model_unreadable",
            Self::Parse { .. } => "model_parse_failed",
            Self::Invalid(_) => "model_invalid",
        }
    }
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLocation(message) => write!(f, "invalid model location: {message}"),
            Self::Io { path, source } => {
                write!(f, "failed to read model `{}`: {source}", path.display())
            }
            Self::Parse {
                path: Some(path),
                source,
            } => write!(f, "failed to parse model `{}`: {source}", path.display()),
            Self::Parse { path: None, source } => write!(f, "failed to parse model: {source}"),
            Self::Invalid(err) => write!(f, "invalid model: {err}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidLocation(_) => None,
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Invalid(err) => Some(err),
        }
    }
}

impl From<ModelValidationError> for ModelError {
    fn from(value: ModelValidationError) -> Self {
        Self::Invalid(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{model_path_from_url, ModelError, ModelValidationError, ObjectModel};
    use crate::model::object::AttributeValue;
    use std::path::PathBuf;

    const NOTE_MODEL: &str = r#"{
        "name": "Journal",
        "entities": [
            {
                "name": "Note",
                "attributes": [
                    { "name": "title", "type": "string" },
                    { "name": "rank", "type": "integer", "optional": true },
                    { "name": "pinned", "type": "boolean", "default": false }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_entities_and_defaults() {
        let model = ObjectModel::from_json_str(NOTE_MODEL).expect("model should parse");
        assert_eq!(model.name(), Some("Journal"));

        let note = model.entity("Note").expect("Note entity should exist");
        assert_eq!(note.attributes.len(), 3);
        assert_eq!(
            note.attribute("pinned").map(|attr| attr.initial_value()),
            Some(AttributeValue::Boolean(false))
        );
        assert_eq!(
            note.attribute("rank").map(|attr| attr.initial_value()),
            Some(AttributeValue::Null)
        );
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_changes() {
        let first = ObjectModel::from_json_str(NOTE_MODEL).expect("model should parse");
        let second = ObjectModel::from_json_str(NOTE_MODEL).expect("model should parse");
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let changed = ObjectModel::from_json_str(&NOTE_MODEL.replace("rank", "score"))
            .expect("changed model should parse");
        assert_ne!(first.fingerprint(), changed.fingerprint());
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let reserved = r#"{"entities":[{"name":"Note","attributes":[{"name":"ID","type":"string"}]}]}"#;
        let err = ObjectModel::from_json_str(reserved).expect_err("id must be reserved");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::ReservedAttributeName { .. })
        ));

        let duplicate = r#"{"entities":[{"name":"Note"},{"name":"note"}]}"#;
        let err = ObjectModel::from_json_str(duplicate).expect_err("duplicates must fail");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::DuplicateEntity(_))
        ));

        let internal = r#"{"entities":[{"name":"_objstack_metadata"}]}"#;
        let err = ObjectModel::from_json_str(internal).expect_err("prefix must be reserved");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::InvalidEntityName(_))
        ));
    }

    #[test]
    fn rejects_defaults_that_do_not_match_type() {
        let bad_default = r#"{"entities":[{"name":"Note","attributes":[
            {"name":"rank","type":"integer","default":"high"}]}]}"#;
        let err = ObjectModel::from_json_str(bad_default).expect_err("default must type-check");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::InvalidDefault { .. })
        ));

        let null_required = r#"{"entities":[{"name":"Note","attributes":[
            {"name":"rank","type":"integer","default":null}]}]}"#;
        let err = ObjectModel::from_json_str(null_required).expect_err("null default on required");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::InvalidDefault { .. })
        ));

        let null_optional = r#"{"entities":[{"name":"Note","attributes":[
            {"name":"rank","type":"integer","optional":true,"default":null}]}]}"#;
        let model = ObjectModel::from_json_str(null_optional).expect("null default on optional");
        let rank = model
            .entity("Note")
            .and_then(|note| note.attribute("rank"))
            .expect("rank attribute");
        assert_eq!(rank.default, Some(serde_json::Value::Null));
        assert_eq!(rank.initial_value(), AttributeValue::Null);
    }

    #[test]
    fn accepts_rejects_nan_doubles() {
        let model = ObjectModel::from_json_str(
            r#"{"entities":[{"name":"Tag","attributes":[{"name":"weight","type":"double"}]}]}"#,
        )
        .expect("model should parse");
        let weight = model
            .entity("Tag")
            .and_then(|tag| tag.attribute("weight"))
            .expect("weight attribute");

        assert!(weight.accepts(&AttributeValue::Double(0.5)));
        assert!(weight.accepts(&AttributeValue::Double(f64::INFINITY)));
        assert!(weight.accepts(&AttributeValue::Null));
        assert!(!weight.accepts(&AttributeValue::Double(f64::NAN)));
        assert!(!weight.accepts(&AttributeValue::Integer(1)));
    }

    #[test]
    fn rejects_empty_model_and_unknown_fields() {
        let err = ObjectModel::from_json_str(r#"{"entities":[]}"#).expect_err("empty model");
        assert!(matches!(
            err,
            ModelError::Invalid(ModelValidationError::NoEntities)
        ));

        let err = ObjectModel::from_json_str(r#"{"entities":[{"name":"A"}],"extra":1}"#)
            .expect_err("unknown fields must be rejected");
        assert!(matches!(err, ModelError::Parse { path: None, .. }));
    }

    #[test]
    fn resolves_paths_and_file_urls() {
        assert_eq!(
            model_path_from_url("/tmp/model.json").expect("plain path"),
            PathBuf::from("/tmp/model.json")
        );
        assert_eq!(
            model_path_from_url("file:///tmp/My%20Models/model.json").expect("file url"),
            PathBuf::from("/tmp/My Models/model.json")
        );
        assert_eq!(
            model_path_from_url("FILE://localhost/tmp/model.json").expect("localhost url"),
            PathBuf::from("/tmp/model.json")
        );
    }

    #[test]
    fn rejects_unsupported_locations() {
        assert!(matches!(
            model_path_from_url("https://example.com/model.json"),
            Err(ModelError::InvalidLocation(_))
        ));
        assert!(matches!(
            model_path_from_url("   "),
            Err(ModelError::InvalidLocation(_))
        ));
        assert!(matches!(
            model_path_from_url("file://fileserver/share/model.json"),
            Err(ModelError::InvalidLocation(_))
        ));
        assert!(matches!(
            model_path_from_url("file:///tmp/model.json?v=1"),
            Err(ModelError::InvalidLocation(_))
        ));
        assert!(matches!(
            model_path_from_url("file:///tmp/model.json#x"),
            Err(ModelError::InvalidLocation(_))
        ));
    }

    #[test]
    fn malformed_escapes_stay_literal() {
        assert_eq!(
            model_path_from_url("file:///tmp/a%+1.json").expect("file url"),
            PathBuf::from("/tmp/a%+1.json")
        );
        assert_eq!(
            model_path_from_url("file:///tmp/bad%zz.json").expect("file url"),
            PathBuf::from("/tmp/bad%zz.json")
        );
    }
}
