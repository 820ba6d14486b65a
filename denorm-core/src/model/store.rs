//! Storage collaborator contract
//!
//! The engine never owns entities. Everything it knows about the world it
//! learns through [`Store`]: field reads and writes, relation traversal in
//! every direction the engine supports, and cardinality queries for the
//! count fast path.
//!
//! # Relation conventions
//!
//! - A foreign key is an ordinary field holding [`Value::Ref`].
//! - Many-to-many membership is owned by one side (`owner.field`).
//! - A generic (polymorphic) key is a pair of fields on the owner: a type
//!   field holding the target kind as [`Value::Text`] and an id field
//!   holding the target id as [`Value::Int`].
//!
//! The trait is object safe; the engine works against `&dyn Store`.

use thiserror::Error;

use super::entity::{EntityId, EntityRef, FieldName, Kind};
use super::value::Value;

/// A finite, restartable sequence of related entities. Calling the
/// traversal again restarts it.
pub type EntityIter<'a> = Box<dyn Iterator<Item = EntityRef> + 'a>;

/// Errors reported by a storage collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("entity {entity} does not exist")]
    MissingEntity { entity: EntityRef },

    #[error("unknown field '{field}' on {kind}")]
    UnknownField { kind: Kind, field: FieldName },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A stored-field change reported by the storage collaborator.
///
/// `previous` is the value before the write. For relation-carrying fields
/// it lets the engine dirty the old target as well as the new one.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: FieldName,
    pub previous: Option<Value>,
}

impl FieldChange {
    /// A change where the previous value is unknown.
    pub fn named(field: &str) -> Self {
        Self {
            field: FieldName::new(field),
            previous: None,
        }
    }

    pub fn with_previous(field: &str, previous: Value) -> Self {
        Self {
            field: FieldName::new(field),
            previous: Some(previous),
        }
    }
}

/// The storage collaborator.
pub trait Store: Send + Sync {
    /// Whether the entity has a persisted identity.
    fn exists(&self, entity: &EntityRef) -> bool;

    /// Read a field. Unset fields read as `Null`.
    fn get(&self, entity: &EntityRef, field: &str) -> Result<Value, StoreError>;

    /// Write a field.
    fn set(&self, entity: &EntityRef, field: &str, value: Value) -> Result<(), StoreError>;

    /// All entities of a kind.
    fn entities(&self, kind: &Kind) -> Result<EntityIter<'_>, StoreError>;

    /// Entities of `owner` kind whose foreign key `fk` points at `target`.
    fn related_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        fk: &str,
    ) -> Result<EntityIter<'_>, StoreError>;

    /// Members of the many-to-many relation `owner.field`.
    fn related_many(&self, owner: &EntityRef, field: &str) -> Result<EntityIter<'_>, StoreError>;

    /// Entities of `owner` kind whose many-to-many `field` contains `target`.
    fn related_many_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        field: &str,
    ) -> Result<EntityIter<'_>, StoreError>;

    /// Entities of `owner` kind whose generic key points at `target`.
    fn related_generic(
        &self,
        target: &EntityRef,
        owner: &Kind,
        type_field: &str,
        id_field: &str,
    ) -> Result<EntityIter<'_>, StoreError>;

    /// Follow foreign key `fk`. Dangling keys resolve to `None`.
    fn related_forward(&self, entity: &EntityRef, fk: &str) -> Result<Option<EntityRef>, StoreError> {
        match self.get(entity, fk)? {
            Value::Ref(target) if self.exists(&target) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Resolve a `(kind, id)` pair to an existing entity.
    fn resolve(&self, kind: &Kind, id: EntityId) -> Option<EntityRef> {
        let entity = EntityRef::new(kind.clone(), id);
        self.exists(&entity).then_some(entity)
    }

    /// Follow the generic key `(type_field, id_field)` of `entity`.
    fn resolve_generic(
        &self,
        entity: &EntityRef,
        type_field: &str,
        id_field: &str,
    ) -> Result<Option<EntityRef>, StoreError> {
        let kind = self.get(entity, type_field)?;
        let id = self.get(entity, id_field)?;
        Ok(generic_target(&kind, &id).and_then(|(kind, id)| self.resolve(&kind, id)))
    }

    /// Cardinality of [`Store::related_reverse`].
    fn count_reverse(&self, target: &EntityRef, owner: &Kind, fk: &str) -> Result<usize, StoreError> {
        Ok(self.related_reverse(target, owner, fk)?.count())
    }

    /// Cardinality of [`Store::related_many`].
    fn count_many(&self, owner: &EntityRef, field: &str) -> Result<usize, StoreError> {
        Ok(self.related_many(owner, field)?.count())
    }
}

/// Decode a generic key pair into `(kind, id)`.
pub fn generic_target(kind: &Value, id: &Value) -> Option<(Kind, EntityId)> {
    let kind = kind.as_text()?;
    let id = u64::try_from(id.as_int()?).ok()?;
    Some((Kind::new(kind), EntityId::new(id)))
}
