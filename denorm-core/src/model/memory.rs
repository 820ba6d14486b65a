//! In-memory storage collaborator.
//!
//! A reference [`Store`] backed by an insertion-ordered map. Reverse and
//! generic lookups are linear scans; the count queries scan without
//! collecting the related entities.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use super::entity::{EntityId, EntityRef, FieldName, Kind};
use super::store::{generic_target, EntityIter, FieldChange, Store, StoreError};
use super::value::Value;

#[derive(Debug, Default, Clone)]
struct Record {
    fields: IndexMap<FieldName, Value>,
    links: IndexMap<FieldName, IndexSet<EntityRef>>,
}

impl Record {
    fn field(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    fn points_at(&self, fk: &str, target: &EntityRef) -> bool {
        matches!(self.fields.get(fk), Some(Value::Ref(entity)) if entity == target)
    }

    fn generic_points_at(&self, type_field: &str, id_field: &str, target: &EntityRef) -> bool {
        generic_target(self.field(type_field), self.field(id_field))
            .is_some_and(|(kind, id)| kind == target.kind && id == target.id)
    }

    fn links_to(&self, field: &str, target: &EntityRef) -> bool {
        self.links.get(field).is_some_and(|set| set.contains(target))
    }
}

/// Entities held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<IndexMap<EntityRef, Record>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entity and return its reference. Ids start at 1.
    pub fn insert<'f>(
        &self,
        kind: &str,
        fields: impl IntoIterator<Item = (&'f str, Value)>,
    ) -> EntityRef {
        let id = EntityId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let entity = EntityRef::new(kind, id);
        let record = Record {
            fields: fields
                .into_iter()
                .map(|(name, value)| (FieldName::new(name), value))
                .collect(),
            links: IndexMap::new(),
        };
        self.records.write().insert(entity.clone(), record);
        entity
    }

    /// Overwrite stored fields. Returns one change per field whose value
    /// actually differed, carrying the previous value.
    pub fn update<'f>(
        &self,
        entity: &EntityRef,
        fields: impl IntoIterator<Item = (&'f str, Value)>,
    ) -> Result<Vec<FieldChange>, StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(entity)
            .ok_or_else(|| StoreError::MissingEntity { entity: entity.clone() })?;

        let mut changes = Vec::new();
        for (name, value) in fields {
            let previous = record.fields.insert(FieldName::new(name), value.clone());
            let previous = previous.unwrap_or_default();
            if previous != value {
                changes.push(FieldChange::with_previous(name, previous));
            }
        }
        Ok(changes)
    }

    /// Remove an entity. Many-to-many memberships pointing at it are
    /// dropped; foreign keys pointing at it are left dangling.
    pub fn remove(&self, entity: &EntityRef) -> Result<(), StoreError> {
        let mut records = self.records.write();
        records
            .shift_remove(entity)
            .ok_or_else(|| StoreError::MissingEntity { entity: entity.clone() })?;
        for record in records.values_mut() {
            for members in record.links.values_mut() {
                members.shift_remove(entity);
            }
        }
        Ok(())
    }

    /// Add `target` to `owner.field`. Returns whether membership changed.
    pub fn link(&self, owner: &EntityRef, field: &str, target: &EntityRef) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        if !records.contains_key(target) {
            return Err(StoreError::MissingEntity { entity: target.clone() });
        }
        let record = records
            .get_mut(owner)
            .ok_or_else(|| StoreError::MissingEntity { entity: owner.clone() })?;
        Ok(record
            .links
            .entry(FieldName::new(field))
            .or_default()
            .insert(target.clone()))
    }

    /// Remove `target` from `owner.field`. Returns whether membership changed.
    pub fn unlink(&self, owner: &EntityRef, field: &str, target: &EntityRef) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(owner)
            .ok_or_else(|| StoreError::MissingEntity { entity: owner.clone() })?;
        Ok(record
            .links
            .get_mut(field)
            .is_some_and(|members| members.shift_remove(target)))
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn scan<F>(&self, owner: &Kind, keep: F) -> Vec<EntityRef>
    where
        F: Fn(&Record) -> bool,
    {
        self.records
            .read()
            .iter()
            .filter(|(entity, record)| entity.is_kind(owner) && keep(*record))
            .map(|(entity, _)| entity.clone())
            .collect()
    }
}

impl Store for MemoryStore {
    fn exists(&self, entity: &EntityRef) -> bool {
        self.records.read().contains_key(entity)
    }

    fn get(&self, entity: &EntityRef, field: &str) -> Result<Value, StoreError> {
        self.records
            .read()
            .get(entity)
            .map(|record| record.field(field).clone())
            .ok_or_else(|| StoreError::MissingEntity { entity: entity.clone() })
    }

    fn set(&self, entity: &EntityRef, field: &str, value: Value) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(entity)
            .ok_or_else(|| StoreError::MissingEntity { entity: entity.clone() })?;
        record.fields.insert(FieldName::new(field), value);
        Ok(())
    }

    fn entities(&self, kind: &Kind) -> Result<EntityIter<'_>, StoreError> {
        Ok(Box::new(self.scan(kind, |_| true).into_iter()))
    }

    fn related_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        fk: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        Ok(Box::new(
            self.scan(owner, |record| record.points_at(fk, target)).into_iter(),
        ))
    }

    fn related_many(&self, owner: &EntityRef, field: &str) -> Result<EntityIter<'_>, StoreError> {
        let records = self.records.read();
        let record = records
            .get(owner)
            .ok_or_else(|| StoreError::MissingEntity { entity: owner.clone() })?;
        let members: Vec<EntityRef> = record
            .links
            .get(field)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        Ok(Box::new(members.into_iter()))
    }

    fn related_many_reverse(
        &self,
        target: &EntityRef,
        owner: &Kind,
        field: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        Ok(Box::new(
            self.scan(owner, |record| record.links_to(field, target)).into_iter(),
        ))
    }

    fn related_generic(
        &self,
        target: &EntityRef,
        owner: &Kind,
        type_field: &str,
        id_field: &str,
    ) -> Result<EntityIter<'_>, StoreError> {
        Ok(Box::new(
            self.scan(owner, |record| record.generic_points_at(type_field, id_field, target))
                .into_iter(),
        ))
    }

    fn count_reverse(&self, target: &EntityRef, owner: &Kind, fk: &str) -> Result<usize, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|(entity, record)| entity.is_kind(owner) && record.points_at(fk, target))
            .count())
    }

    fn count_many(&self, owner: &EntityRef, field: &str) -> Result<usize, StoreError> {
        self.records
            .read()
            .get(owner)
            .map(|record| record.links.get(field).map_or(0, IndexSet::len))
            .ok_or_else(|| StoreError::MissingEntity { entity: owner.clone() })
    }
}
