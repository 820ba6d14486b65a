//! Instance-level expansion
//!
//! The kind-level graph says *which computed fields* a change can reach.
//! Expansion answers the runtime question: for this changed instance,
//! *which instances* of those fields are affected. Each resolved
//! [`Path`] knows how to walk from a changed target back to its
//! dependents through the [`Store`].
//!
//! Self paths walk the whole chain (all ancestors or all descendants) with
//! a visited set. A revisited instance means the data itself contains a
//! loop; the walk stops there, logs it and counts it.

use std::collections::{HashSet, VecDeque};

use smallvec::SmallVec;
use tracing::warn;

use super::builder::DependencyGraph;
use super::node::NodeId;
use crate::error::EngineError;
use crate::model::{generic_target, EntityId, EntityRef, FieldChange, FieldName, Kind, Store, Value};
use crate::registry::{Dependency, Path};

/// What happened to the source instance.
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'t> {
    /// The instance was created or is about to be deleted.
    Existence,
    /// Stored fields of the instance changed.
    Fields(&'t [FieldChange]),
    /// A computed field of the instance was recomputed.
    Computed(&'t FieldName),
}

impl Trigger<'_> {
    fn fires(&self, dep: &Dependency) -> bool {
        match self {
            Trigger::Existence => true,
            Trigger::Fields(changes) => changes
                .iter()
                .any(|change| dep.watches(change.field.as_str(), false)),
            Trigger::Computed(field) => dep.fields.matches(field.as_str(), true),
        }
    }

    /// The value `field` held before the change, if reported.
    fn previous(&self, field: &str) -> Option<&Value> {
        match self {
            Trigger::Fields(changes) => changes
                .iter()
                .find(|change| change.field == *field)
                .and_then(|change| change.previous.as_ref()),
            _ => None,
        }
    }
}

impl DependencyGraph {
    /// Computed fields of `kind` that must be recomputed on the changed
    /// instance itself: their own-read filter matches, or a changed field
    /// is one of their outgoing relation keys.
    pub fn own_affected(&self, kind: &Kind, changes: &[FieldChange]) -> SmallVec<[NodeId; 4]> {
        self.nodes_of(kind)
            .iter()
            .copied()
            .filter(|id| {
                let node = self.node(*id);
                changes.iter().any(|change| {
                    let field = change.field.as_str();
                    node.own_filter().matches(field, false)
                        || node
                            .relations()
                            .iter()
                            .any(|dep| dep.path.own_carrier().is_some_and(|fk| *fk == *field))
                })
            })
            .collect()
    }

    /// Computed fields on the same instance that read `node`.
    pub fn own_dependents(&self, node: NodeId) -> SmallVec<[NodeId; 4]> {
        let key = self.node(node).key();
        self.nodes_of(&key.kind)
            .iter()
            .copied()
            .filter(|id| *id != node && self.node(*id).own_filter().matches(key.field.as_str(), true))
            .collect()
    }

    /// Emit every `(instance, field)` pair on other instances reached by a
    /// change to `source`. Returns how many self-relation walks stopped at
    /// an instance they had already visited.
    pub fn expand(
        &self,
        store: &dyn Store,
        source: &EntityRef,
        trigger: Trigger<'_>,
        limit: usize,
        emit: &mut dyn FnMut(EntityRef, NodeId),
    ) -> Result<usize, EngineError> {
        let mut loops = 0;
        for watch in self.watches(&source.kind) {
            let dep = self.dependency(*watch);
            if !trigger.fires(dep) {
                continue;
            }
            let node = watch.node;
            let dependent = &self.node(node).key().kind;
            match &dep.path {
                Path::Own => {}
                Path::Direct { fk } => {
                    for entity in store.related_reverse(source, dependent, fk)? {
                        emit(entity, node);
                    }
                }
                Path::Reverse { fk } => {
                    let current = store.get(source, fk)?;
                    for value in [Some(&current), trigger.previous(fk)].into_iter().flatten() {
                        if let Value::Ref(entity) = value {
                            if entity.is_kind(dependent) {
                                emit(entity.clone(), node);
                            }
                        }
                    }
                }
                Path::ManyOwned { field } => {
                    for entity in store.related_many_reverse(source, dependent, field)? {
                        emit(entity, node);
                    }
                }
                Path::ManyTarget { field } => {
                    for entity in store.related_many(source, field)? {
                        if entity.is_kind(dependent) {
                            emit(entity, node);
                        }
                    }
                }
                Path::Generic {
                    type_field,
                    id_field,
                } => {
                    let kind = store.get(source, type_field)?;
                    let id = store.get(source, id_field)?;
                    let mut targets: SmallVec<[(Kind, EntityId); 2]> = SmallVec::new();
                    targets.extend(generic_target(&kind, &id));
                    let old_kind = trigger.previous(type_field);
                    let old_id = trigger.previous(id_field);
                    if old_kind.is_some() || old_id.is_some() {
                        let old = generic_target(old_kind.unwrap_or(&kind), old_id.unwrap_or(&id));
                        if let Some(old) = old {
                            if !targets.contains(&old) {
                                targets.push(old);
                            }
                        }
                    }
                    for (kind, id) in targets {
                        if kind == *dependent {
                            emit(EntityRef::new(kind, id), node);
                        }
                    }
                }
                Path::Ancestor { fk } => {
                    let field = &self.node(node).key().field;
                    loops += self.walk_down(store, source, fk, limit, field, &mut |entity| {
                        emit(entity, node)
                    })?;
                }
                Path::Descendant { fk } => {
                    let field = &self.node(node).key().field;
                    let current = store.get(source, fk)?;
                    let previous = trigger.previous(fk).filter(|old| **old != current);
                    for start in [Some(&current), previous].into_iter().flatten() {
                        if let Value::Ref(parent) = start {
                            loops += self.walk_up(store, source, parent, fk, limit, field, &mut |entity| {
                                emit(entity, node)
                            })?;
                        }
                    }
                }
            }
        }
        Ok(loops)
    }

    /// Emit the owner and the members affected by a many-to-many
    /// membership edit of `owner.field`.
    pub fn expand_link(
        &self,
        owner: &EntityRef,
        field: &str,
        targets: &[EntityRef],
        emit: &mut dyn FnMut(EntityRef, NodeId),
    ) {
        for id in self.nodes_of(&owner.kind) {
            let owned = self
                .node(*id)
                .relations()
                .iter()
                .any(|dep| matches!(&dep.path, Path::ManyOwned { field: f } if *f == *field));
            if owned {
                emit(owner.clone(), *id);
            }
        }
        for watch in self.watches(&owner.kind) {
            let dep = self.dependency(*watch);
            if !matches!(&dep.path, Path::ManyTarget { field: f } if *f == *field) {
                continue;
            }
            let dependent = &self.node(watch.node).key().kind;
            for target in targets.iter().filter(|t| t.is_kind(dependent)) {
                emit(target.clone(), watch.node);
            }
        }
    }

    /// Every descendant of `source` along the self key `fk`.
    fn walk_down(
        &self,
        store: &dyn Store,
        source: &EntityRef,
        fk: &str,
        limit: usize,
        field: &FieldName,
        emit: &mut dyn FnMut(EntityRef),
    ) -> Result<usize, EngineError> {
        let mut visited = HashSet::from([source.clone()]);
        let mut queue = VecDeque::from([(source.clone(), 0usize)]);
        let mut loops = 0;
        while let Some((entity, depth)) = queue.pop_front() {
            for child in store.related_reverse(&entity, &source.kind, fk)? {
                if !visited.insert(child.clone()) {
                    warn!(entity = %child, fk, "self relation loops back; stopping walk");
                    loops += 1;
                    continue;
                }
                if depth + 1 > limit {
                    return Err(EngineError::RecursionLimitExceeded {
                        limit,
                        entity: child,
                        field: field.clone(),
                    });
                }
                emit(child.clone());
                queue.push_back((child, depth + 1));
            }
        }
        Ok(loops)
    }

    /// `parent` and every ancestor above it along the self key `fk`.
    #[allow(clippy::too_many_arguments)]
    fn walk_up(
        &self,
        store: &dyn Store,
        source: &EntityRef,
        parent: &EntityRef,
        fk: &str,
        limit: usize,
        field: &FieldName,
        emit: &mut dyn FnMut(EntityRef),
    ) -> Result<usize, EngineError> {
        let mut visited = HashSet::from([source.clone()]);
        let mut next = Some(parent.clone());
        let mut depth = 0;
        while let Some(entity) = next.take() {
            if !entity.is_kind(&source.kind) {
                break;
            }
            if !visited.insert(entity.clone()) {
                warn!(entity = %entity, fk, "self relation loops back; stopping walk");
                return Ok(1);
            }
            depth += 1;
            if depth > limit {
                return Err(EngineError::RecursionLimitExceeded {
                    limit,
                    entity,
                    field: field.clone(),
                });
            }
            if store.exists(&entity) {
                if let Value::Ref(up) = store.get(&entity, fk)? {
                    next = Some(up);
                }
            }
            emit(entity);
        }
        Ok(0)
    }
}
