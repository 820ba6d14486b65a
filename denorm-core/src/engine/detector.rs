//! Change Detector
//!
//! Maps storage notifications to the batch of `(instance, field)` pairs
//! they affect. One notification yields exactly one deduplicated
//! [`Batch`]; transitive cascades are left to the scheduler.

use tracing::trace;

use super::batch::Batch;
use crate::error::EngineError;
use crate::graph::Trigger;
use crate::model::{EntityRef, FieldChange, Store, Value};
use crate::registry::Registry;

pub struct ChangeDetector<'e> {
    registry: &'e Registry,
    limit: usize,
}

impl<'e> ChangeDetector<'e> {
    pub fn new(registry: &'e Registry, limit: usize) -> Self {
        Self { registry, limit }
    }

    /// `entity` was just created: every computed field of its own, plus
    /// whatever reads its existence.
    pub fn on_create(&self, store: &dyn Store, entity: &EntityRef) -> Result<Batch, EngineError> {
        let graph = self.registry.graph();
        let mut batch = Batch::new();
        for node in graph.nodes_of(&entity.kind) {
            batch.push(entity.clone(), *node);
        }
        let loops = graph.expand(store, entity, Trigger::Existence, self.limit, &mut |e, n| {
            batch.push(e, n);
        })?;
        batch.note_loops(loops);
        trace!(entity = %entity, pairs = batch.len(), "create detected");
        Ok(batch)
    }

    /// Stored fields of `entity` changed.
    pub fn on_update(
        &self,
        store: &dyn Store,
        entity: &EntityRef,
        changes: &[FieldChange],
    ) -> Result<Batch, EngineError> {
        let graph = self.registry.graph();
        let mut batch = Batch::new();
        if changes.is_empty() {
            return Ok(batch);
        }
        for node in graph.own_affected(&entity.kind, changes) {
            batch.push(entity.clone(), node);
        }
        let loops = graph.expand(store, entity, Trigger::Fields(changes), self.limit, &mut |e, n| {
            batch.push(e, n);
        })?;
        batch.note_loops(loops);
        trace!(entity = %entity, changes = changes.len(), pairs = batch.len(), "update detected");
        Ok(batch)
    }

    /// `entity` is about to be deleted. Call this while it still exists so
    /// its relations can be walked; process the batch after removal.
    ///
    /// Every entity whose foreign key points at `entity` loses that
    /// relation, so it is expanded as if the key had been cleared.
    pub fn before_delete(&self, store: &dyn Store, entity: &EntityRef) -> Result<Batch, EngineError> {
        let graph = self.registry.graph();
        let mut batch = Batch::new();
        let mut push = |e: EntityRef, n| {
            if e != *entity {
                batch.push(e, n);
            }
        };
        let mut loops = graph.expand(store, entity, Trigger::Existence, self.limit, &mut push)?;

        let mut referrers = 0;
        for (owner, fk) in self.registry.foreign_keys_into(&entity.kind) {
            let changes = [FieldChange::with_previous(fk.as_str(), Value::from(entity.clone()))];
            for referrer in store.related_reverse(entity, owner, fk.as_str())? {
                if referrer == *entity {
                    continue;
                }
                referrers += 1;
                for node in graph.own_affected(&referrer.kind, &changes) {
                    push(referrer.clone(), node);
                }
                loops += graph.expand(store, &referrer, Trigger::Fields(&changes), self.limit, &mut push)?;
            }
        }
        batch.note_loops(loops);
        trace!(entity = %entity, referrers, pairs = batch.len(), "delete detected");
        Ok(batch)
    }

    /// Membership of the many-to-many `owner.field` changed for `targets`.
    pub fn on_link_change(&self, owner: &EntityRef, field: &str, targets: &[EntityRef]) -> Batch {
        let mut batch = Batch::new();
        self.registry
            .graph()
            .expand_link(owner, field, targets, &mut |e, n| {
                batch.push(e, n);
            });
        trace!(owner = %owner, field, pairs = batch.len(), "link change detected");
        batch
    }
}
