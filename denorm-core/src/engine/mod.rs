//! Denormalization engine
//!
//! [`Denormalizer`] is the entry point a storage layer calls from its
//! write path. It wires the [`ChangeDetector`] to the
//! [`RecomputeScheduler`] over one sealed [`Registry`]:
//!
//! ```rust,ignore
//! let engine = Denormalizer::new(&registry);
//! let batch = engine.on_update(&store, &member, &changes)?;
//! let report = engine.process(&store, &batch)?;
//! ```
//!
//! Deletions are two-phase: collect the batch with
//! [`Denormalizer::before_delete`] while the entity still exists, remove
//! it, then process.

mod batch;
mod detector;
mod locks;
mod scheduler;
mod session;
mod staged;

pub use batch::{Batch, Pair};
pub use detector::ChangeDetector;
pub use locks::InstanceLocks;
pub use scheduler::{BatchReport, ComputeFailure, RecomputeScheduler};
pub use session::Session;
pub use staged::{Overlay, StagedWrites};

use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::{EntityRef, FieldChange, FieldKey, Store, StoreError, Value};
use crate::registry::{Registry, View};

/// The denormalization engine for one registry.
#[derive(Debug)]
pub struct Denormalizer<'r> {
    registry: &'r Registry,
    config: EngineConfig,
    locks: InstanceLocks,
}

impl<'r> Denormalizer<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: &'r Registry, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            locks: InstanceLocks::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &InstanceLocks {
        &self.locks
    }

    pub fn detector(&self) -> ChangeDetector<'r> {
        ChangeDetector::new(self.registry, self.config.max_depth)
    }

    pub fn scheduler(&self) -> RecomputeScheduler<'_> {
        RecomputeScheduler::new(self.registry, &self.config, &self.locks)
    }

    pub fn on_create(&self, store: &dyn Store, entity: &EntityRef) -> Result<Batch, EngineError> {
        self.detector().on_create(store, entity)
    }

    pub fn on_update(
        &self,
        store: &dyn Store,
        entity: &EntityRef,
        changes: &[FieldChange],
    ) -> Result<Batch, EngineError> {
        self.detector().on_update(store, entity, changes)
    }

    pub fn before_delete(&self, store: &dyn Store, entity: &EntityRef) -> Result<Batch, EngineError> {
        self.detector().before_delete(store, entity)
    }

    pub fn on_link_change(&self, owner: &EntityRef, field: &str, targets: &[EntityRef]) -> Batch {
        self.detector().on_link_change(owner, field, targets)
    }

    /// Recompute a batch. Returns once every affected field is consistent.
    pub fn process(&self, store: &dyn Store, batch: &Batch) -> Result<BatchReport, EngineError> {
        self.scheduler().process(store, batch)
    }

    /// Recompute a batch but keep the writes staged. Commit them with
    /// [`Denormalizer::commit`]; dropping them rolls the batch back.
    pub fn process_staged(
        &self,
        store: &dyn Store,
        batch: &Batch,
    ) -> Result<(BatchReport, StagedWrites), EngineError> {
        self.scheduler().process_staged(store, batch)
    }

    pub fn commit(&self, store: &dyn Store, writes: StagedWrites) -> Result<usize, StoreError> {
        writes.commit(store, &self.locks)
    }

    /// Evaluate a computed field from scratch, without writing it.
    pub fn evaluate(&self, store: &dyn Store, entity: &EntityRef, field: &str) -> Result<Value, EngineError> {
        let computed = self
            .registry
            .field(&entity.kind, field)
            .ok_or_else(|| EngineError::UnknownField {
                key: FieldKey::new(entity.kind.as_str(), field),
            })?;
        let view = View::new(store, entity.clone(), self.config.max_depth);
        computed.evaluate(&view).map_err(|source| EngineError::Compute {
            entity: entity.clone(),
            field: computed.key().field.clone(),
            source,
        })
    }

    /// Recompute every computed field of the given entities.
    pub fn rebuild(
        &self,
        store: &dyn Store,
        entities: impl IntoIterator<Item = EntityRef>,
    ) -> Result<BatchReport, EngineError> {
        let graph = self.registry.graph();
        let mut batch = Batch::new();
        for entity in entities {
            for node in graph.nodes_of(&entity.kind) {
                batch.push(entity.clone(), *node);
            }
        }
        self.process(store, &batch)
    }

    /// Recompute every computed field of every stored entity.
    pub fn rebuild_all(&self, store: &dyn Store) -> Result<BatchReport, EngineError> {
        let mut entities = Vec::new();
        for kind in self.registry.kinds() {
            if !self.registry.graph().nodes_of(kind).is_empty() {
                entities.extend(store.entities(kind)?);
            }
        }
        let report = self.rebuild(store, entities)?;
        info!(recomputed = report.recomputed, written = report.written, "rebuild finished");
        Ok(report)
    }
}
