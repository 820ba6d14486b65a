//! Transactional write mode
//!
//! While a batch runs in transactional mode, computed-field writes land
//! in an [`Overlay`] instead of the store. Reads go through the overlay,
//! so later steps of the batch see earlier results. When the batch
//! finishes the overlay turns into [`StagedWrites`]: commit them to make
//! them durable, drop them to roll back.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use super::locks::InstanceLocks;
use crate::model::{EntityIter, EntityRef, FieldName, Kind, Store, StoreError, Value};

#[derive(Debug, Clone)]
struct StagedWrite {
    previous: Value,
    value: Value,
}

/// A store view with pending computed writes layered on top.
pub struct Overlay<'s> {
    store: &'s dyn Store,
    writes: Mutex<IndexMap<(EntityRef, FieldName), StagedWrite>>,
}

impl<'s> Overlay<'s> {
    pub fn new(store: &'s dyn Store) -> Self {
        Self {
            store,
            writes: Mutex::new(IndexMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }

    /// Stop staging and hand over the pending writes.
    pub fn into_writes(self) -> StagedWrites {
        let writes = self
            .writes
            .into_inner()
            .into_iter()
            .map(|((entity, field), write)| (entity, field, write.value))
            .collect();
        StagedWrites { writes }
    }
}

impl Store for Overlay<'_> {
    fn exists(&self, entity: &EntityRef) -> bool {
        self.store.exists(entity)
    }

    fn get(&self, entity: &EntityRef, field: &str) -> Result<Value, StoreError> {
        let staged = self
            .writes
            .lock()
            .get(&(entity.clone(), FieldName::new(field)))
            .map(|write| write.value.clone());
        match staged {
            Some(value) => Ok(value),
            None => self.store.get(entity, field),
        }
    }

    fn set(&self, entity: &EntityRef, field: &str, value: Value) -> Result<(), StoreError> {
        if !self.store.exists(entity) {
            return Err(StoreError::MissingEntity {
                entity: entity.clone(),
            });
        }
        let key = (entity.clone(), FieldName::new(field));
        let mut writes = self.writes.lock();
        if let Some(write) = writes.get_mut(&key) {
            if write.previous == value {
                writes.shift_remove(&key);
            } else {
                write.value = value;
            }
            return Ok(());
        }
        let previous = self.store.get(entity, field)?;
        if previous != value {
            writes.insert(key, StagedWrite { previous, value });
        }
        Ok(())
    }

    fn entities(&self, kind: &Kind) -> Result<EntityIter<'_>, StoreError> {
        self.store.entities(kind)
    }

    fn related_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        fk: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        self.store.related_reverse(target, owner, fk)
    }

    fn related_many(&self, owner: &EntityRef, field: &str) -> Result<EntityIter<'_>, StoreError> {
        self.store.related_many(owner, field)
    }

    fn related_many_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        field: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        self.store.related_many_reverse(target, owner, field)
    }

    fn related_generic(
        &self,
        target: &EntityRef,
        owner: &Kind,
        type_field: &str,
        id_field: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        self.store
            .related_generic(target, owner, type_field, id_field)
    }

    fn count_reverse(&self, target: &EntityRef, owner: &Kind, fk: &str) -> Result<usize, StoreError> {
        self.store.count_reverse(target, owner, fk)
    }

    fn count_many(&self, owner: &EntityRef, field: &str) -> Result<usize, StoreError> {
        self.store.count_many(owner, field)
    }
}

/// Computed writes of a finished batch, not yet applied.
#[must_use = "staged writes are discarded unless committed"]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedWrites {
    writes: Vec<(EntityRef, FieldName, Value)>,
}

impl StagedWrites {
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityRef, &FieldName, &Value)> {
        self.writes.iter().map(|(entity, field, value)| (entity, field, value))
    }

    /// The staged value of `entity.field`, if any.
    pub fn get(&self, entity: &EntityRef, field: &str) -> Option<&Value> {
        self.writes
            .iter()
            .find(|(e, f, _)| e == entity && *f == *field)
            .map(|(_, _, value)| value)
    }

    /// Apply every write, one instance lock at a time in entity order.
    /// Returns the number of fields written.
    pub fn commit(self, store: &dyn Store, locks: &InstanceLocks) -> Result<usize, StoreError> {
        let mut by_entity: BTreeMap<EntityRef, Vec<(FieldName, Value)>> = BTreeMap::new();
        for (entity, field, value) in self.writes {
            by_entity.entry(entity).or_default().push((field, value));
        }

        let mut written = 0;
        for (entity, fields) in by_entity {
            locks.with_lock(&entity, || -> Result<(), StoreError> {
                for (field, value) in fields {
                    store.set(&entity, &field, value)?;
                    written += 1;
                }
                Ok(())
            })?;
        }
        debug!(written, "committed staged writes");
        Ok(written)
    }
}
