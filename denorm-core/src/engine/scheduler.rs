//! Recompute Scheduler
//!
//! The scheduler determines which `(instance, field)` pairs to recompute
//! and in which order. It ensures that upstream pairs are always
//! recomputed before the pairs that read them.
//!
//! # Algorithm
//!
//! 1. Mark every seed of the batch as dirty.
//! 2. Expand transitively: each queued pair may change, so every pair
//!    reading it is queued as "maybe dirty". A pair is queued at most once
//!    per batch; the instance edge is recorded either way.
//! 3. Order the expanded set with Kahn's algorithm over the instance
//!    edges, ties broken by kind-level rank then discovery order.
//! 4. Process each pair in order:
//!    - "maybe dirty" pairs are skipped unless an upstream pair changed
//!    - dirty pairs are recomputed and compared to the stored value
//!    - if the value changed, it is written and downstream pairs become
//!      dirty
//!
//! Loops in self-referential data leave pairs that Kahn's algorithm never
//! releases. The lowest-ranked one is then released by force and the
//! break is logged.
//!
//! This "push-pull" approach minimizes unnecessary recomputation.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, error, instrument, trace, warn};

use super::batch::{Batch, Pair};
use super::locks::InstanceLocks;
use super::staged::{Overlay, StagedWrites};
use crate::config::EngineConfig;
use crate::error::{ComputeError, EngineError};
use crate::graph::{DirtyState, Trigger};
use crate::model::{EntityRef, FieldName, Store};
use crate::registry::{Registry, View};

/// A compute function that failed during a batch. The stored value was
/// left as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeFailure {
    pub entity: EntityRef,
    pub field: FieldName,
    pub error: ComputeError,
}

/// Outcome of one processed batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Pairs handed in by the change detector.
    pub seeded: usize,
    /// Pairs after transitive expansion.
    pub expanded: usize,
    /// Compute functions invoked.
    pub recomputed: usize,
    /// Values that changed and were written.
    pub written: usize,
    /// Pairs not recomputed: missing instances and clean "maybe dirty" pairs.
    pub skipped: usize,
    /// Pairs released by force because the data loops.
    pub cycles_broken: usize,
    /// Self-relation walks, while detecting or expanding, that stopped at
    /// an instance they had already visited. Nonzero means the data loops.
    pub loops_detected: usize,
    pub failures: Vec<ComputeFailure>,
}

impl BatchReport {
    /// Whether the batch changed nothing and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.failures.is_empty()
    }
}

#[derive(Debug)]
struct Slot {
    state: DirtyState,
    depth: usize,
    upstream: usize,
    downstream: SmallVec<[usize; 4]>,
}

/// Orders and recomputes batches.
pub struct RecomputeScheduler<'e> {
    registry: &'e Registry,
    config: &'e EngineConfig,
    locks: &'e InstanceLocks,
}

impl<'e> RecomputeScheduler<'e> {
    pub fn new(registry: &'e Registry, config: &'e EngineConfig, locks: &'e InstanceLocks) -> Self {
        Self {
            registry,
            config,
            locks,
        }
    }

    /// Recompute a batch. In transactional mode the writes are staged and
    /// committed only once every pair has been processed.
    #[instrument(skip_all, fields(seeds = batch.len()))]
    pub fn process(&self, store: &dyn Store, batch: &Batch) -> Result<BatchReport, EngineError> {
        if self.config.transactional {
            let (report, writes) = self.process_staged(store, batch)?;
            writes.commit(store, self.locks)?;
            Ok(report)
        } else {
            self.run(store, batch)
        }
    }

    /// Recompute a batch against an overlay and hand back the writes
    /// without applying them.
    pub fn process_staged(
        &self,
        store: &dyn Store,
        batch: &Batch,
    ) -> Result<(BatchReport, StagedWrites), EngineError> {
        let overlay = Overlay::new(store);
        let report = self.run(&overlay, batch)?;
        Ok((report, overlay.into_writes()))
    }

    fn run(&self, store: &dyn Store, batch: &Batch) -> Result<BatchReport, EngineError> {
        let mut report = BatchReport {
            seeded: batch.len(),
            loops_detected: batch.loops(),
            ..BatchReport::default()
        };

        let mut pairs: IndexMap<Pair, Slot> = IndexMap::with_capacity(batch.len());
        for pair in batch.iter() {
            if !store.exists(&pair.entity) {
                report.skipped += 1;
                continue;
            }
            pairs.insert(
                pair.clone(),
                Slot {
                    state: DirtyState::Dirty,
                    depth: 0,
                    upstream: 0,
                    downstream: SmallVec::new(),
                },
            );
        }

        report.loops_detected += self.expand(store, &mut pairs)?;
        report.expanded = pairs.len();

        let order = self.order(&pairs, &mut report);
        for index in order {
            self.recompute(store, &mut pairs, index, &mut report)?;
        }

        debug!(
            seeded = report.seeded,
            expanded = report.expanded,
            loops = report.loops_detected,
            recomputed = report.recomputed,
            written = report.written,
            failures = report.failures.len(),
            "batch processed"
        );
        Ok(report)
    }

    /// Queue everything downstream of the queued pairs, to a fixed point.
    /// Returns how many self-relation walks stopped on looping data.
    fn expand(&self, store: &dyn Store, pairs: &mut IndexMap<Pair, Slot>) -> Result<usize, EngineError> {
        let graph = self.registry.graph();
        let limit = self.config.max_depth;
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        let mut cursor = 0;
        let mut loops = 0;

        while let Some((pair, slot)) = pairs.get_index(cursor) {
            let Pair { entity, node } = pair.clone();
            let depth = slot.depth;
            let field = graph.node(node).key().field.clone();

            let mut reached: Vec<(EntityRef, _)> = graph
                .own_dependents(node)
                .into_iter()
                .map(|dependent| (entity.clone(), dependent))
                .collect();
            loops += graph.expand(store, &entity, Trigger::Computed(&field), limit, &mut |e, n| {
                reached.push((e, n))
            })?;

            for (target, target_node) in reached {
                let pair = Pair::new(target, target_node);
                let index = match pairs.get_index_of(&pair) {
                    Some(index) => index,
                    None => {
                        if !store.exists(&pair.entity) {
                            continue;
                        }
                        if depth + 1 > limit {
                            return Err(EngineError::RecursionLimitExceeded {
                                limit,
                                entity: pair.entity,
                                field: graph.node(pair.node).key().field.clone(),
                            });
                        }
                        let (index, _) = pairs.insert_full(
                            pair,
                            Slot {
                                state: DirtyState::MaybeDirty,
                                depth: depth + 1,
                                upstream: 0,
                                downstream: SmallVec::new(),
                            },
                        );
                        index
                    }
                };
                if index != cursor && edges.insert((cursor, index)) {
                    pairs[cursor].downstream.push(index);
                    pairs[index].upstream += 1;
                }
            }
            cursor += 1;
        }
        Ok(loops)
    }

    /// Kahn's algorithm over the instance edges. Pairs left on a data
    /// loop are released lowest rank first.
    fn order(&self, pairs: &IndexMap<Pair, Slot>, report: &mut BatchReport) -> Vec<usize> {
        let graph = self.registry.graph();
        let rank = |pairs: &IndexMap<Pair, Slot>, index: usize| {
            pairs
                .get_index(index)
                .map_or(0, |(pair, _)| graph.node(pair.node).rank())
        };

        let mut in_degree: Vec<usize> = pairs.values().map(|slot| slot.upstream).collect();
        let mut released = vec![false; pairs.len()];
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse((rank(pairs, index), index)))
            .collect();

        let mut order = Vec::with_capacity(pairs.len());
        while order.len() < pairs.len() {
            let index = match ready.pop() {
                Some(Reverse((_, index))) => index,
                None => {
                    let Some(stuck) = (0..pairs.len())
                        .filter(|index| !released[*index])
                        .min_by_key(|index| (rank(pairs, *index), *index))
                    else {
                        break;
                    };
                    if let Some((pair, _)) = pairs.get_index(stuck) {
                        warn!(
                            entity = %pair.entity,
                            field = %graph.node(pair.node).key().field,
                            "self relation loops in the data; breaking the cycle"
                        );
                    }
                    report.cycles_broken += 1;
                    stuck
                }
            };
            if released[index] {
                continue;
            }
            released[index] = true;
            order.push(index);
            for &next in &pairs[index].downstream {
                in_degree[next] = in_degree[next].saturating_sub(1);
                if in_degree[next] == 0 && !released[next] {
                    ready.push(Reverse((rank(pairs, next), next)));
                }
            }
        }
        order
    }

    fn recompute(
        &self,
        store: &dyn Store,
        pairs: &mut IndexMap<Pair, Slot>,
        index: usize,
        report: &mut BatchReport,
    ) -> Result<(), EngineError> {
        let Some((pair, slot)) = pairs.get_index(index) else {
            return Ok(());
        };
        let entity = pair.entity.clone();
        let field = self.registry.field_at(pair.node);
        let name = &field.key().field;

        if slot.state == DirtyState::MaybeDirty && self.config.push_pull {
            trace!(entity = %entity, field = %name, "upstream unchanged; skipping");
            report.skipped += 1;
            return Ok(());
        }
        if !store.exists(&entity) {
            report.skipped += 1;
            return Ok(());
        }

        let view = View::new(store, entity.clone(), self.config.max_depth);
        report.recomputed += 1;
        let value = match field.evaluate(&view) {
            Ok(value) => value,
            Err(ComputeError::RecursionLimit { limit }) => {
                return Err(EngineError::RecursionLimitExceeded {
                    limit,
                    entity,
                    field: name.clone(),
                });
            }
            Err(err) => {
                error!(entity = %entity, field = %name, error = %err, "compute failed; keeping stale value");
                report.failures.push(ComputeFailure {
                    entity,
                    field: name.clone(),
                    error: err,
                });
                pairs[index].state.mark_clean();
                return Ok(());
            }
        };

        let current = store.get(&entity, name)?;
        trace!(entity = %entity, field = %name, value = %value, "recomputed");
        if value != current {
            self.locks
                .with_lock(&entity, || store.set(&entity, name, value))?;
            report.written += 1;
            let downstream = pairs[index].downstream.clone();
            for next in downstream {
                pairs[next].state.mark_dirty();
            }
        }
        pairs[index].state.mark_clean();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryStore, Value, ValueType};
    use crate::registry::{DependencySpec, Direction};

    fn reply_registry() -> Registry {
        let mut builder = Registry::builder();
        builder.foreign_key("Post", "response_to", "Post");
        builder
            .register("Post", "response_count", ValueType::Int, |post| {
                if !post.is_persisted() {
                    return Ok(Value::Int(0));
                }
                let mut total = 0;
                for reply in post.reverse("Post", "response_to")? {
                    total += 1 + reply.int("response_count")?;
                }
                Ok(Value::Int(total))
            })
            .unwrap()
            .depends_on(DependencySpec::on_self(Direction::Backward));
        builder.seal().unwrap()
    }

    #[test]
    fn cascades_up_a_reply_chain_once_per_pair() {
        let registry = reply_registry();
        let config = EngineConfig::default();
        let locks = InstanceLocks::new();
        let scheduler = RecomputeScheduler::new(&registry, &config, &locks);
        let node = registry.node_id(&"Post".into(), "response_count").unwrap();

        let store = MemoryStore::new();
        let a = store.insert("Post", []);
        let b = store.insert("Post", [("response_to", Value::from(a.clone()))]);
        let c = store.insert(
            "Post",
            [("response_to", Value::from(b.clone())), ("response_count", Value::Int(0))],
        );

        // What the change detector hands over when `c` is created.
        let mut batch = Batch::new();
        for post in [&c, &b, &a] {
            batch.push(post.clone(), node);
        }
        let report = scheduler.process(&store, &batch).unwrap();

        assert_eq!(store.get(&a, "response_count").unwrap(), Value::Int(2));
        assert_eq!(store.get(&b, "response_count").unwrap(), Value::Int(1));
        assert_eq!(report.expanded, 3);
        assert_eq!(report.recomputed, 3);
        assert_eq!(report.written, 2);
    }

    #[test]
    fn maybe_dirty_pairs_are_skipped_when_upstream_is_stable() {
        let registry = reply_registry();
        let config = EngineConfig::default();
        let locks = InstanceLocks::new();
        let scheduler = RecomputeScheduler::new(&registry, &config, &locks);
        let node = registry.node_id(&"Post".into(), "response_count").unwrap();

        let store = MemoryStore::new();
        let a = store.insert("Post", [("response_count", Value::Int(1))]);
        let b = store.insert(
            "Post",
            [("response_to", Value::from(a)), ("response_count", Value::Int(0))],
        );

        let mut batch = Batch::new();
        batch.push(b, node);
        let report = scheduler.process(&store, &batch).unwrap();
        assert_eq!(report.recomputed, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.is_noop());
    }

    #[test]
    fn missing_seeds_are_skipped() {
        let registry = reply_registry();
        let config = EngineConfig::default();
        let locks = InstanceLocks::new();
        let scheduler = RecomputeScheduler::new(&registry, &config, &locks);
        let node = registry.node_id(&"Post".into(), "response_count").unwrap();

        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.push(EntityRef::new("Post", 40), node);
        let report = scheduler.process(&store, &batch).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.expanded, 0);
    }
}
