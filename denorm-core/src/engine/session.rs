//! Reference write path.
//!
//! A [`Session`] owns a [`MemoryStore`] and drives the engine the way a
//! storage layer would: every write is followed by its notification and
//! one processed batch, so callers only ever observe consistent state.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{EntityRef, FieldKey, Kind, MemoryStore, Store, StoreError, Value};
use crate::registry::Registry;

use super::{BatchReport, Denormalizer};

#[derive(Debug)]
pub struct Session<'r> {
    store: MemoryStore,
    engine: Denormalizer<'r>,
}

impl<'r> Session<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: &'r Registry, config: EngineConfig) -> Self {
        Self {
            store: MemoryStore::new(),
            engine: Denormalizer::with_config(registry, config),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn engine(&self) -> &Denormalizer<'r> {
        &self.engine
    }

    pub fn get(&self, entity: &EntityRef, field: &str) -> Result<Value, StoreError> {
        self.store.get(entity, field)
    }

    /// Insert an entity and bring every affected computed field up to date.
    pub fn create<'f>(
        &self,
        kind: &str,
        fields: impl IntoIterator<Item = (&'f str, Value)>,
    ) -> Result<EntityRef, EngineError> {
        let fields: Vec<_> = fields.into_iter().collect();
        self.reject_computed(kind, fields.iter().map(|(name, _)| *name))?;
        let entity = self.store.insert(kind, fields);
        let batch = self.engine.on_create(&self.store, &entity)?;
        self.engine.process(&self.store, &batch)?;
        Ok(entity)
    }

    /// Write stored fields. Unchanged values produce no batch.
    pub fn update<'f>(
        &self,
        entity: &EntityRef,
        fields: impl IntoIterator<Item = (&'f str, Value)>,
    ) -> Result<BatchReport, EngineError> {
        let fields: Vec<_> = fields.into_iter().collect();
        self.reject_computed(entity.kind.as_str(), fields.iter().map(|(name, _)| *name))?;
        let changes = self.store.update(entity, fields)?;
        if changes.is_empty() {
            return Ok(BatchReport::default());
        }
        let batch = self.engine.on_update(&self.store, entity, &changes)?;
        self.engine.process(&self.store, &batch)
    }

    pub fn delete(&self, entity: &EntityRef) -> Result<BatchReport, EngineError> {
        let batch = self.engine.before_delete(&self.store, entity)?;
        self.store.remove(entity)?;
        self.engine.process(&self.store, &batch)
    }

    /// Add `target` to the many-to-many `owner.field`.
    pub fn link(&self, owner: &EntityRef, field: &str, target: &EntityRef) -> Result<BatchReport, EngineError> {
        if !self.store.link(owner, field, target)? {
            return Ok(BatchReport::default());
        }
        let batch = self
            .engine
            .on_link_change(owner, field, std::slice::from_ref(target));
        self.engine.process(&self.store, &batch)
    }

    /// Remove `target` from the many-to-many `owner.field`.
    pub fn unlink(&self, owner: &EntityRef, field: &str, target: &EntityRef) -> Result<BatchReport, EngineError> {
        if !self.store.unlink(owner, field, target)? {
            return Ok(BatchReport::default());
        }
        let batch = self
            .engine
            .on_link_change(owner, field, std::slice::from_ref(target));
        self.engine.process(&self.store, &batch)
    }

    fn reject_computed<'f>(
        &self,
        kind: &str,
        mut names: impl Iterator<Item = &'f str>,
    ) -> Result<(), EngineError> {
        let registry = self.engine.registry();
        let kind = Kind::new(kind);
        match names.find(|name| registry.is_computed(&kind, name)) {
            Some(name) => Err(EngineError::ComputedFieldWrite {
                key: FieldKey::new(kind, name),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueType;
    use crate::registry::DependencySpec;

    fn registry() -> Registry {
        let mut builder = Registry::builder();
        builder.foreign_key("Post", "forum", "Forum");
        builder
            .register("Forum", "post_count", ValueType::Int, |forum| {
                Ok(Value::from(forum.count_reverse("Post", "forum")?))
            })
            .unwrap()
            .depends_on(DependencySpec::on("Post").existence());
        builder.seal().unwrap()
    }

    #[test]
    fn computed_fields_cannot_be_written() {
        let registry = registry();
        let session = Session::new(&registry);
        let err = session
            .create("Forum", [("post_count", Value::Int(9))])
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::ComputedFieldWrite {
                key: FieldKey::new("Forum", "post_count")
            }
        );
        assert!(session.store().is_empty());
    }

    #[test]
    fn writes_keep_counts_current() {
        let registry = registry();
        let session = Session::new(&registry);
        let forum = session.create("Forum", [("title", Value::from("news"))]).unwrap();
        assert_eq!(session.get(&forum, "post_count").unwrap(), Value::Int(0));

        let post = session
            .create("Post", [("forum", Value::from(forum.clone()))])
            .unwrap();
        assert_eq!(session.get(&forum, "post_count").unwrap(), Value::Int(1));

        let report = session.update(&post, [("title", Value::from("hi"))]).unwrap();
        assert!(report.is_noop());

        session.delete(&post).unwrap();
        assert_eq!(session.get(&forum, "post_count").unwrap(), Value::Int(0));
    }
}
