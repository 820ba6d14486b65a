//! Dependency Graph Builder
//!
//! Compiles the registry's declarations into the kind-level graph:
//!
//! 1. Resolve each [`DependencySpec`] against the declared relations.
//! 2. Add an edge `g -> f` whenever computed field `f` reads computed
//!    field `g` through a non-self relation (or its own instance).
//! 3. Rank the nodes with Kahn's algorithm. Anything left over sits on a
//!    cycle, which is reported by name.
//! 4. Index the resolved dependencies by the kind they read, so a change
//!    to an instance of that kind finds its watchers directly.

use std::collections::{HashMap, VecDeque};

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::node::{Node, NodeId};
use crate::error::RegistryError;
use crate::model::{FieldKey, Kind};
use crate::registry::{
    ComputedField, Dependency, DependencySpec, Direction, FieldFilter, Path, RelationDef, Target,
};

/// A resolved dependency of `node`, indexed under the kind it reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Watch {
    pub(crate) node: NodeId,
    pub(crate) dependency: usize,
}

/// The static kind-level dependency graph.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    by_kind: HashMap<Kind, SmallVec<[NodeId; 4]>>,
    watchers: HashMap<Kind, Vec<Watch>>,
    order: Vec<NodeId>,
}

impl DependencyGraph {
    pub(crate) fn build(
        kinds: &IndexSet<Kind>,
        relations: &[RelationDef],
        fields: &IndexMap<FieldKey, ComputedField>,
    ) -> Result<Self, RegistryError> {
        let mut nodes = Vec::with_capacity(fields.len());
        let mut by_kind: HashMap<Kind, SmallVec<[NodeId; 4]>> = HashMap::new();

        for (index, (key, field)) in fields.iter().enumerate() {
            let id = NodeId::new(index);
            let mut resolved = Vec::with_capacity(field.specs().len() + 1);
            if let Some(reads) = field.reads() {
                resolved.push(Dependency {
                    target: key.kind.clone(),
                    path: Path::Own,
                    fields: FieldFilter::Only(reads.iter().cloned().collect()),
                });
            }
            for spec in field.specs() {
                resolved.push(resolve(key, spec, kinds, relations)?);
            }
            nodes.push(Node::new(id, key.clone(), resolved));
            by_kind.entry(key.kind.clone()).or_default().push(id);
        }

        let mut graph = Self {
            nodes,
            by_kind,
            watchers: HashMap::new(),
            order: Vec::new(),
        };
        graph.link();
        graph.rank()?;
        graph.index_watchers();
        Ok(graph)
    }

    /// Add kind-level edges between computed fields.
    fn link(&mut self) {
        let mut edges = Vec::new();
        for node in &self.nodes {
            for dep in node.relations() {
                if dep.path.is_self() {
                    continue;
                }
                for source in self.nodes_of(&dep.target) {
                    let field = &self.nodes[source.index()].key().field;
                    if dep.fields.matches(field.as_str(), true) {
                        edges.push((*source, node.id()));
                    }
                }
            }
        }
        for (from, to) in edges {
            self.nodes[from.index()].add_dependent(to);
            self.nodes[to.index()].add_dependency(from);
        }
    }

    /// Kahn's algorithm over the non-self edges.
    fn rank(&mut self) -> Result<(), RegistryError> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies().len()).collect();
        let mut queue: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.dependencies().is_empty())
            .map(Node::id)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for dependent in self.nodes[id.index()].dependents() {
                let degree = &mut in_degree[dependent.index()];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck: IndexSet<NodeId> = self
                .nodes
                .iter()
                .map(Node::id)
                .filter(|id| in_degree[id.index()] > 0)
                .collect();
            return Err(RegistryError::CyclicDependency {
                cycle: self.find_cycle(&stuck),
            });
        }

        for (rank, id) in order.iter().enumerate() {
            self.nodes[id.index()].set_rank(rank);
        }
        self.order = order;
        Ok(())
    }

    /// Walk upstream inside the stuck set until a node repeats. Every stuck
    /// node has a stuck dependency, so the walk always closes.
    fn find_cycle(&self, stuck: &IndexSet<NodeId>) -> Vec<String> {
        let Some(&start) = stuck.first() else {
            return Vec::new();
        };
        let mut walk: IndexSet<NodeId> = IndexSet::new();
        let mut current = start;
        while walk.insert(current) {
            let next = self.nodes[current.index()]
                .dependencies()
                .iter()
                .copied()
                .find(|dep| stuck.contains(dep));
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        let from = walk.get_index_of(&current).unwrap_or(0);
        let mut cycle: Vec<String> = walk
            .iter()
            .skip(from)
            .rev()
            .map(|id| self.nodes[id.index()].key().to_string())
            .collect();
        if let Some(first) = cycle.first().cloned() {
            cycle.push(first);
        }
        cycle
    }

    fn index_watchers(&mut self) {
        for node in &self.nodes {
            for (index, dep) in node.relations().iter().enumerate() {
                if dep.path == Path::Own {
                    continue;
                }
                self.watchers.entry(dep.target.clone()).or_default().push(Watch {
                    node: node.id(),
                    dependency: index,
                });
            }
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.dependents().len()).sum()
    }

    /// Computed fields of `kind`, in registration order.
    pub fn nodes_of(&self, kind: &Kind) -> &[NodeId] {
        self.by_kind.get(kind).map(|ids| ids.as_slice()).unwrap_or(&[])
    }

    pub fn node_of(&self, kind: &Kind, field: &str) -> Option<NodeId> {
        self.nodes_of(kind)
            .iter()
            .copied()
            .find(|id| self.nodes[id.index()].key().field == *field)
    }

    pub fn is_computed(&self, kind: &Kind, field: &str) -> bool {
        self.node_of(kind, field).is_some()
    }

    /// Nodes in topological order (dependencies first).
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Resolved dependencies reading `kind`, with the node owning each.
    pub fn watchers_of<'g>(&'g self, kind: &Kind) -> impl Iterator<Item = (NodeId, &'g Dependency)> + 'g {
        self.watches(kind)
            .iter()
            .map(move |watch| (watch.node, self.dependency(*watch)))
    }

    pub(crate) fn watches(&self, kind: &Kind) -> &[Watch] {
        self.watchers.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn dependency(&self, watch: Watch) -> &Dependency {
        &self.nodes[watch.node.index()].relations()[watch.dependency]
    }
}

/// Resolve one declared spec of `key` into a concrete path.
fn resolve(
    key: &FieldKey,
    spec: &DependencySpec,
    kinds: &IndexSet<Kind>,
    relations: &[RelationDef],
) -> Result<Dependency, RegistryError> {
    let dependent = &key.kind;
    let target = match &spec.target {
        Target::SelfKind => dependent.clone(),
        Target::Kind(kind) => {
            if !kinds.contains(kind) {
                return Err(RegistryError::UnknownKind { kind: kind.clone() });
            }
            kind.clone()
        }
    };

    let named = |relation: &RelationDef| {
        spec.foreign_key
            .as_ref()
            .map_or(true, |fk| relation.names(fk))
    };

    let mut candidates: Vec<(Path, &RelationDef)> = Vec::new();
    if &target == dependent {
        let direction = spec
            .direction
            .ok_or_else(|| RegistryError::MissingDirection { key: key.clone() })?;
        for relation in relations.iter().filter(|r| named(*r)) {
            if let RelationDef::ForeignKey {
                owner,
                field,
                target: to,
            } = relation
            {
                if owner == dependent && to == dependent {
                    let fk = field.clone();
                    let path = match direction {
                        Direction::Forward => Path::Ancestor { fk },
                        Direction::Backward => Path::Descendant { fk },
                    };
                    candidates.push((path, relation));
                }
            }
        }
    } else {
        for relation in relations.iter().filter(|r| named(*r)) {
            let path = match relation {
                RelationDef::ForeignKey {
                    owner,
                    field,
                    target: to,
                } if owner == dependent && to == &target => Path::Direct { fk: field.clone() },
                RelationDef::ForeignKey {
                    owner,
                    field,
                    target: to,
                } if owner == &target && to == dependent => Path::Reverse { fk: field.clone() },
                RelationDef::ManyToMany {
                    owner,
                    field,
                    target: to,
                } if owner == dependent && to == &target => Path::ManyOwned {
                    field: field.clone(),
                },
                RelationDef::ManyToMany {
                    owner,
                    field,
                    target: to,
                } if owner == &target && to == dependent => Path::ManyTarget {
                    field: field.clone(),
                },
                RelationDef::GenericKey {
                    owner,
                    type_field,
                    id_field,
                } if owner == &target => Path::Generic {
                    type_field: type_field.clone(),
                    id_field: id_field.clone(),
                },
                _ => continue,
            };
            candidates.push((path, relation));
        }
    }

    match candidates.len() {
        0 => Err(RegistryError::UnknownRelation {
            key: key.clone(),
            target,
            foreign_key: spec.foreign_key.clone(),
        }),
        1 => {
            let (path, _) = candidates.remove(0);
            Ok(Dependency {
                target,
                path,
                fields: spec.fields.clone(),
            })
        }
        _ => Err(RegistryError::AmbiguousRelation {
            key: key.clone(),
            target,
            candidates: candidates.iter().map(|(_, r)| r.to_string()).collect(),
        }),
    }
}
