//! Graph Nodes
//!
//! One node per computed field `(kind, field)`. Edges are kind-level:
//! an edge from A to B means "recompute B when A changes".

use indexmap::IndexSet;

use crate::model::FieldKey;
use crate::registry::{Dependency, FieldFilter, Path};

/// Identifier of a computed field in the dependency graph.
///
/// Ids are dense: they index the registry's fields in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the raw index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Dirty state of one `(instance, field)` pair during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The stored value is up-to-date.
    Clean,

    /// Reached only through other computed fields. Needs recomputing only
    /// if one of those actually changed.
    MaybeDirty,

    /// Definitely needs recomputing: a stored input changed, or an
    /// upstream computed value did.
    Dirty,
}

impl DirtyState {
    /// Mark as definitely dirty.
    pub fn mark_dirty(&mut self) {
        *self = DirtyState::Dirty;
    }

    pub fn mark_clean(&mut self) {
        *self = DirtyState::Clean;
    }
}

/// A computed field in the kind-level graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    key: FieldKey,

    /// Resolved dependencies, own-instance reads first.
    relations: Vec<Dependency>,

    /// Computed fields this node reads through non-self relations.
    dependencies: IndexSet<NodeId>,

    /// Computed fields that read this node through non-self relations.
    dependents: IndexSet<NodeId>,

    /// Position in topological order; dependencies have lower ranks.
    rank: usize,
}

impl Node {
    pub(crate) fn new(id: NodeId, key: FieldKey, relations: Vec<Dependency>) -> Self {
        Self {
            id,
            key,
            relations,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            rank: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn relations(&self) -> &[Dependency] {
        &self.relations
    }

    /// The own-instance read filter.
    pub fn own_filter(&self) -> &FieldFilter {
        static STORED: FieldFilter = FieldFilter::Stored;
        self.relations
            .iter()
            .find(|dep| dep.path == Path::Own)
            .map_or(&STORED, |dep| &dep.fields)
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub(crate) fn set_rank(&mut self, rank: usize) {
        self.rank = rank;
    }
}
