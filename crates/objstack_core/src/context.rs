//! Unit-of-work context over a store coordinator.
//!
//! # Responsibility
//! - Track pending inserts, updates and deletes in memory.
//! - Present persisted objects merged with pending changes.
//! - Write all pending changes in one store transaction on save.
//!
//! # Invariants
//! - Nothing reaches the store before `save`.
//! - A failed save keeps every pending change; a successful one clears them.
//! - An object id appears in at most one of the pending sets.
//! - No undo tracking: `rollback` is the only way to drop changes.

use crate::model::object::{AttributeValue, ManagedObject, ObjectId};
use crate::model::schema::{AttributeType, EntityDescription};
use crate::store::{RowChange, StoreCoordinator, StoreError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

pub type ContextResult<T> = Result<T, ContextError>;

/// Sizes of the pending change sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Result of a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Context had no pending changes; the store was not touched.
    NoChanges,
    Saved(PendingCounts),
}

#[derive(Debug, Default)]
struct PendingChanges {
    inserted: BTreeMap<ObjectId, ManagedObject>,
    updated: BTreeMap<ObjectId, ManagedObject>,
    /// Deleted object id -> entity name.
    deleted: BTreeMap<ObjectId, String>,
}

impl PendingChanges {
    fn counts(&self) -> PendingCounts {
        PendingCounts {
            inserted: self.inserted.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Accumulates object changes until explicitly saved.
///
/// Not `Send`: a context is used on the thread that created it.
#[derive(Debug)]
pub struct ObjectContext {
    coordinator: Rc<StoreCoordinator>,
    pending: RefCell<PendingChanges>,
}

impl ObjectContext {
    pub fn new(coordinator: Rc<StoreCoordinator>) -> Self {
        Self {
            coordinator,
            pending: RefCell::new(PendingChanges::default()),
        }
    }

    pub fn coordinator(&self) -> &Rc<StoreCoordinator> {
        &self.coordinator
    }

    /// Registers a new object of `entity` pre-filled with schema defaults.
    pub fn insert(&self, entity: &str) -> ContextResult<ObjectId> {
        let description = self.entity(entity)?;
        let object = ManagedObject::new(description);
        let id = object.id;
        self.pending.borrow_mut().inserted.insert(id, object);
        Ok(id)
    }

    /// Sets one attribute of a pending or persisted object.
    ///
    /// `Null` is accepted for every attribute; required attributes are
    /// checked on save.
    pub fn set(
        &self,
        id: ObjectId,
        attribute: &str,
        value: impl Into<AttributeValue>,
    ) -> ContextResult<()> {
        let value = value.into();
        let mut pending = self.pending.borrow_mut();
        if pending.deleted.contains_key(&id) {
            return Err(ContextError::Deleted(id));
        }

        if let Some(object) = pending.inserted.get_mut(&id) {
            let description = self.entity(&object.entity)?;
            return assign(object, description, attribute, value);
        }
        if let Some(object) = pending.updated.get_mut(&id) {
            let description = self.entity(&object.entity)?;
            return assign(object, description, attribute, value);
        }

        let mut object = self
            .coordinator
            .find_object(id)?
            .ok_or(ContextError::NotFound(id))?;
        let description = self.entity(&object.entity)?;
        assign(&mut object, description, attribute, value)?;
        pending.updated.insert(id, object);
        Ok(())
    }

    /// Marks an object for deletion. Idempotent for already deleted ids.
    ///
    /// Deleting an object that was inserted in this context just forgets it.
    pub fn delete(&self, id: ObjectId) -> ContextResult<()> {
        let mut pending = self.pending.borrow_mut();
        if pending.deleted.contains_key(&id) || pending.inserted.remove(&id).is_some() {
            return Ok(());
        }

        let entity = match pending.updated.remove(&id) {
            Some(object) => object.entity,
            None => {
                self.coordinator
                    .find_object(id)?
                    .ok_or(ContextError::NotFound(id))?
                    .entity
            }
        };
        pending.deleted.insert(id, entity);
        Ok(())
    }

    /// Current view of one object: pending state wins over persisted state.
    pub fn get(&self, id: ObjectId) -> ContextResult<Option<ManagedObject>> {
        let pending = self.pending.borrow();
        if pending.deleted.contains_key(&id) {
            return Ok(None);
        }
        if let Some(object) = pending.inserted.get(&id).or_else(|| pending.updated.get(&id)) {
            return Ok(Some(object.clone()));
        }
        Ok(self.coordinator.find_object(id)?)
    }

    /// All objects of `entity` as this context sees them, ordered by id.
    pub fn fetch_all(&self, entity: &str) -> ContextResult<Vec<ManagedObject>> {
        self.entity(entity)?;
        let mut merged: BTreeMap<ObjectId, ManagedObject> = self
            .coordinator
            .fetch_entity(entity)?
            .into_iter()
            .map(|object| (object.id, object))
            .collect();

        let pending = self.pending.borrow();
        for id in pending.deleted.keys() {
            merged.remove(id);
        }
        let touched = pending.updated.values().chain(pending.inserted.values());
        for object in touched.filter(|object| object.entity == entity) {
            merged.insert(object.id, object.clone());
        }

        Ok(merged.into_values().collect())
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    pub fn pending_counts(&self) -> PendingCounts {
        self.pending.borrow().counts()
    }

    /// Discards every pending change.
    pub fn rollback(&self) {
        *self.pending.borrow_mut() = PendingChanges::default();
    }

    /// Writes pending changes to the store in one transaction.
    ///
    /// Returns `SaveOutcome::NoChanges` without touching the store when
    /// nothing is pending.
    pub fn save(&self) -> ContextResult<SaveOutcome> {
        let mut pending = self.pending.borrow_mut();
        if pending.is_empty() {
            return Ok(SaveOutcome::NoChanges);
        }

        for object in pending.inserted.values().chain(pending.updated.values()) {
            let description = self.entity(&object.entity)?;
            if let Some(attribute) = object.missing_required(description).first() {
                return Err(ContextError::MissingRequired {
                    entity: object.entity.clone(),
                    attribute: (*attribute).to_string(),
                    id: object.id,
                });
            }
        }

        let mut changes = Vec::with_capacity(pending.counts().total());
        changes.extend(pending.inserted.values().map(RowChange::Insert));
        changes.extend(pending.updated.values().map(RowChange::Update));
        changes.extend(pending.deleted.iter().map(|(id, entity)| RowChange::Delete {
            entity: entity.as_str(),
            id: *id,
        }));
        self.coordinator.apply_changes(&changes)?;
        drop(changes);

        let counts = pending.counts();
        *pending = PendingChanges::default();
        Ok(SaveOutcome::Saved(counts))
    }

    fn entity(&self, name: &str) -> ContextResult<&EntityDescription> {
        self.coordinator
            .model()
            .entity(name)
            .ok_or_else(|| ContextError::UnknownEntity(name.to_string()))
    }
}

fn assign(
    object: &mut ManagedObject,
    entity: &EntityDescription,
    attribute: &str,
    value: AttributeValue,
) -> ContextResult<()> {
    let description = entity
        .attribute(attribute)
        .ok_or_else(|| ContextError::UnknownAttribute {
            entity: entity.name.clone(),
            attribute: attribute.to_string(),
        })?;
    if matches!(value, AttributeValue::Double(number) if number.is_nan()) {
        return Err(ContextError::NotANumber {
            entity: entity.name.clone(),
            attribute: attribute.to_string(),
        });
    }
    if !description.accepts(&value) {
        return Err(ContextError::TypeMismatch {
            entity: entity.name.clone(),
            attribute: attribute.to_string(),
            expected: description.kind,
        });
    }
    object.values.insert(description.name.clone(), value);
    Ok(())
}

#[derive(Debug)]
pub enum ContextError {
    UnknownEntity(String),
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
    TypeMismatch {
        entity: String,
        attribute: String,
        expected: AttributeType,
    },
    /// NaN cannot be stored; SQLite reads it back as NULL.
    NotANumber {
        entity: String,
        attribute: String,
    },
    MissingRequired {
        entity: String,
        attribute: String,
        id: ObjectId,
    },
    NotFound(ObjectId),
    /// Object is pending deletion in this context.
    Deleted(ObjectId),
    Store(StoreError),
}

impl ContextError {
    /// Stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownEntity(_) => "context_unknown_entity",
            Self::UnknownAttribute { .. } => "context_unknown_attribute",
            Self::TypeMismatch { .. } => "context_type_mismatch",
            Self::NotANumber { .. } => "context_not_a_number",
            Self::MissingRequired { .. } => "context_missing_required",
            Self::NotFound(_) => "context_not_found",
            Self::Deleted(_) => "context_deleted",
            Self::Store(err) => err.code(),
        }
    }
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(name) => write!(f, "entity `{name}` is not part of the model"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::TypeMismatch {
                entity,
                attribute,
                expected,
            } => write!(f, "`{entity}.{attribute}` expects a {expected} value"),
            Self::NotANumber { entity, attribute } => {
                write!(f, "`{entity}.{attribute}` cannot hold NaN")
            }
            Self::MissingRequired {
                entity,
                attribute,
                id,
            } => write!(f, "required `{entity}.{attribute}` is not set on {id}"),
            Self::NotFound(id) => write!(f, "object not found: {id}"),
            Self::Deleted(id) => write!(f, "object is pending deletion: {id}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ContextError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
