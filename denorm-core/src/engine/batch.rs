//! Recompute batches.

use indexmap::IndexSet;

use crate::graph::NodeId;
use crate::model::EntityRef;

/// One computed field on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub entity: EntityRef,
    pub node: NodeId,
}

impl Pair {
    pub fn new(entity: EntityRef, node: NodeId) -> Self {
        Self { entity, node }
    }
}

/// The deduplicated set of pairs triggered by one storage write, in
/// discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pairs: IndexSet<Pair>,
    /// Self-relation walks that stopped on looping data while detecting.
    loops: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pair. Returns `false` if it was already queued.
    pub fn push(&mut self, entity: EntityRef, node: NodeId) -> bool {
        self.pairs.insert(Pair::new(entity, node))
    }

    /// Record self-relation walks stopped on looping data.
    pub fn note_loops(&mut self, loops: usize) {
        self.loops += loops;
    }

    pub fn loops(&self) -> usize {
        self.loops
    }

    pub fn contains(&self, entity: &EntityRef, node: NodeId) -> bool {
        self.pairs.contains(&Pair::new(entity.clone(), node))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pair> {
        self.pairs.iter()
    }

    /// Fold another batch into this one, keeping first-seen order.
    pub fn merge(&mut self, other: Batch) {
        self.pairs.extend(other.pairs);
        self.loops += other.loops;
    }
}

impl Extend<Pair> for Batch {
    fn extend<I: IntoIterator<Item = Pair>>(&mut self, iter: I) {
        self.pairs.extend(iter);
    }
}

impl FromIterator<Pair> for Batch {
    fn from_iter<I: IntoIterator<Item = Pair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
            loops: 0,
        }
    }
}

impl IntoIterator for Batch {
    type Item = Pair;
    type IntoIter = indexmap::set::IntoIter<Pair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}
