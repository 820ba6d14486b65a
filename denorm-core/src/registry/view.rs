//! Related view
//!
//! The read-only window a compute function gets onto its entity and
//! everything reachable from it. Every hop to another entity increments a
//! depth counter; going past the configured guard fails with
//! [`ComputeError::RecursionLimit`] instead of walking forever.

use crate::error::ComputeError;
use crate::model::{EntityId, EntityRef, Kind, Store, Value};

/// A view of one entity, positioned inside a store.
#[derive(Clone)]
pub struct View<'a> {
    store: &'a dyn Store,
    entity: EntityRef,
    depth: usize,
    limit: usize,
}

impl<'a> View<'a> {
    pub fn new(store: &'a dyn Store, entity: EntityRef, limit: usize) -> Self {
        Self {
            store,
            entity,
            depth: 0,
            limit,
        }
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    pub fn kind(&self) -> &Kind {
        &self.entity.kind
    }

    /// Whether the entity exists in storage yet. Entities mid-creation
    /// report `false`; aggregates should short-circuit to their baseline.
    pub fn is_persisted(&self) -> bool {
        self.store.exists(&self.entity)
    }

    pub fn get(&self, field: &str) -> Result<Value, ComputeError> {
        Ok(self.store.get(&self.entity, field)?)
    }

    /// Read a text field; `Null` reads as the empty string.
    pub fn text(&self, field: &str) -> Result<String, ComputeError> {
        match self.get(field)? {
            Value::Null => Ok(String::new()),
            Value::Text(s) => Ok(s),
            other => Err(ComputeError::failed(format!(
                "{}.{field} is not text: {other}",
                self.entity
            ))),
        }
    }

    /// Read an integer field; `Null` reads as zero.
    pub fn int(&self, field: &str) -> Result<i64, ComputeError> {
        match self.get(field)? {
            Value::Null => Ok(0),
            Value::Int(i) => Ok(i),
            other => Err(ComputeError::failed(format!(
                "{}.{field} is not an integer: {other}",
                self.entity
            ))),
        }
    }

    /// Follow a foreign key. Missing or deleted targets yield `None`.
    pub fn forward(&self, fk: &str) -> Result<Option<View<'a>>, ComputeError> {
        match self.store.related_forward(&self.entity, fk)? {
            Some(target) => Ok(Some(self.step(target)?)),
            None => Ok(None),
        }
    }

    /// Entities of `owner` kind whose `fk` points here.
    pub fn reverse(&self, owner: &str, fk: &str) -> Result<Vec<View<'a>>, ComputeError> {
        let related = self
            .store
            .related_reverse(&self.entity, &Kind::new(owner), fk)?;
        self.step_all(related)
    }

    /// Members of this entity's many-to-many `field`.
    pub fn many(&self, field: &str) -> Result<Vec<View<'a>>, ComputeError> {
        let related = self.store.related_many(&self.entity, field)?;
        self.step_all(related)
    }

    /// Entities of `owner` kind whose many-to-many `field` contains this one.
    pub fn many_reverse(&self, owner: &str, field: &str) -> Result<Vec<View<'a>>, ComputeError> {
        let related = self
            .store
            .related_many_reverse(&self.entity, &Kind::new(owner), field)?;
        self.step_all(related)
    }

    /// Follow this entity's generic key.
    pub fn generic(&self, type_field: &str, id_field: &str) -> Result<Option<View<'a>>, ComputeError> {
        match self.store.resolve_generic(&self.entity, type_field, id_field)? {
            Some(target) => Ok(Some(self.step(target)?)),
            None => Ok(None),
        }
    }

    /// Entities of `owner` kind whose generic key points here.
    pub fn generic_reverse(
        &self,
        owner: &str,
        type_field: &str,
        id_field: &str,
    ) -> Result<Vec<View<'a>>, ComputeError> {
        let related =
            self.store
                .related_generic(&self.entity, &Kind::new(owner), type_field, id_field)?;
        self.step_all(related)
    }

    /// Cardinality of [`View::reverse`] without loading the entities.
    pub fn count_reverse(&self, owner: &str, fk: &str) -> Result<usize, ComputeError> {
        Ok(self.store.count_reverse(&self.entity, &Kind::new(owner), fk)?)
    }

    /// Cardinality of [`View::many`] without loading the entities.
    pub fn count_many(&self, field: &str) -> Result<usize, ComputeError> {
        Ok(self.store.count_many(&self.entity, field)?)
    }

    fn step(&self, entity: EntityRef) -> Result<View<'a>, ComputeError> {
        let depth = self.depth + 1;
        if depth > self.limit {
            return Err(ComputeError::RecursionLimit { limit: self.limit });
        }
        Ok(View {
            store: self.store,
            entity,
            depth,
            limit: self.limit,
        })
    }

    fn step_all(
        &self,
        related: impl Iterator<Item = EntityRef>,
    ) -> Result<Vec<View<'a>>, ComputeError> {
        related.map(|entity| self.step(entity)).collect()
    }
}

impl std::fmt::Debug for View<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("entity", &self.entity)
            .field("depth", &self.depth)
            .finish()
    }
}
