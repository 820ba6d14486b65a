//! Dependency Declaration Registry
//!
//! Schema code declares kinds, relations and computed fields on a
//! [`RegistryBuilder`]. [`RegistryBuilder::seal`] resolves every
//! dependency, builds the kind-level [`DependencyGraph`] and returns an
//! immutable [`Registry`]. Nothing can be registered after sealing, so a
//! sealed registry is shared freely across threads.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut builder = Registry::builder();
//! builder.foreign_key("Post", "author", "Member");
//! builder
//!     .register("Post", "author_name", ValueType::Text, |post| {
//!         Ok(match post.forward("author")? {
//!             Some(author) => author.text("name")?.into(),
//!             None => Value::from(""),
//!         })
//!     })?
//!     .depends_on(DependencySpec::on("Member").fields(["name"]));
//! let registry = builder.seal()?;
//! ```

mod computation;
mod spec;
mod view;

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::{IndexMap, IndexSet};
use tracing::info;

use crate::error::{ComputeError, RegistryError};
use crate::graph::{DependencyGraph, NodeId};
use crate::model::{FieldKey, FieldName, Kind, Value, ValueType};

pub use computation::Computation;
pub use spec::{Dependency, DependencySpec, Direction, FieldFilter, Path, RelationDef};
pub use view::View;

pub(crate) use spec::Target;

/// Declaration of one computed field.
pub struct ComputedField {
    key: FieldKey,
    value_type: ValueType,
    default: Option<Value>,
    computation: Arc<dyn Computation>,
    specs: Vec<DependencySpec>,
    reads: Option<Vec<FieldName>>,
}

impl ComputedField {
    pub fn key(&self) -> &FieldKey {
        &self.key
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Declared dependency specs, in declaration order.
    pub fn specs(&self) -> &[DependencySpec] {
        &self.specs
    }

    /// Own fields read by the compute function, if declared.
    pub fn reads(&self) -> Option<&[FieldName]> {
        self.reads.as_deref()
    }

    /// Run the compute function, substitute the default for `Null` and
    /// check the declared type.
    pub fn evaluate(&self, view: &View<'_>) -> Result<Value, ComputeError> {
        let mut value = self.computation.compute(view)?;
        if value.is_null() {
            if let Some(default) = &self.default {
                value = default.clone();
            }
        }
        match value.value_type() {
            Some(found) if !self.value_type.accepts(&value) => Err(ComputeError::TypeMismatch {
                expected: self.value_type,
                found,
            }),
            _ => Ok(value),
        }
    }
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField")
            .field("key", &self.key)
            .field("value_type", &self.value_type)
            .field("default", &self.default)
            .field("specs", &self.specs)
            .field("reads", &self.reads)
            .finish_non_exhaustive()
    }
}

/// Chaining handle returned by [`RegistryBuilder::register`].
pub struct FieldDecl<'b> {
    field: &'b mut ComputedField,
}

impl FieldDecl<'_> {
    /// Add a dependency. Specs stack; a field may read several relations.
    pub fn depends_on(self, spec: DependencySpec) -> Self {
        self.field.specs.push(spec);
        self
    }

    /// Declare which of its own instance's fields the compute reads.
    /// Without this, any stored-field update of the instance dirties it.
    pub fn reads<'a>(self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.field.reads = Some(fields.into_iter().map(FieldName::new).collect());
        self
    }

    /// Value stored when the compute yields `Null`.
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        self.field.default = Some(value.into());
        self
    }
}

/// Mutable registration phase.
#[derive(Default)]
pub struct RegistryBuilder {
    kinds: IndexSet<Kind>,
    relations: Vec<RelationDef>,
    fields: IndexMap<FieldKey, ComputedField>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&mut self, name: &str) -> &mut Self {
        self.kinds.insert(Kind::new(name));
        self
    }

    /// `owner.field` holds a reference to a `target`.
    pub fn foreign_key(&mut self, owner: &str, field: &str, target: &str) -> &mut Self {
        self.kind(owner).kind(target);
        self.relations.push(RelationDef::ForeignKey {
            owner: Kind::new(owner),
            field: FieldName::new(field),
            target: Kind::new(target),
        });
        self
    }

    /// `owner.field` is a set of `target`s.
    pub fn many_to_many(&mut self, owner: &str, field: &str, target: &str) -> &mut Self {
        self.kind(owner).kind(target);
        self.relations.push(RelationDef::ManyToMany {
            owner: Kind::new(owner),
            field: FieldName::new(field),
            target: Kind::new(target),
        });
        self
    }

    /// `owner.(type_field, id_field)` points at an entity of any kind.
    pub fn generic_key(&mut self, owner: &str, type_field: &str, id_field: &str) -> &mut Self {
        self.kind(owner);
        self.relations.push(RelationDef::GenericKey {
            owner: Kind::new(owner),
            type_field: FieldName::new(type_field),
            id_field: FieldName::new(id_field),
        });
        self
    }

    /// Register a computed field backed by a closure.
    pub fn register<F>(
        &mut self,
        kind: &str,
        field: &str,
        value_type: ValueType,
        compute: F,
    ) -> Result<FieldDecl<'_>, RegistryError>
    where
        F: Fn(&View<'_>) -> Result<Value, ComputeError> + Send + Sync + 'static,
    {
        self.register_computation(kind, field, value_type, compute)
    }

    /// Register a computed field backed by any [`Computation`].
    pub fn register_computation(
        &mut self,
        kind: &str,
        field: &str,
        value_type: ValueType,
        computation: impl Computation + 'static,
    ) -> Result<FieldDecl<'_>, RegistryError> {
        let key = FieldKey::new(kind, field);
        if self.fields.contains_key(&key) {
            return Err(RegistryError::DuplicateField { key });
        }
        self.kind(kind);
        let entry = self.fields.entry(key.clone()).or_insert(ComputedField {
            key,
            value_type,
            default: None,
            computation: Arc::new(computation),
            specs: Vec::new(),
            reads: None,
        });
        Ok(FieldDecl { field: entry })
    }

    /// Resolve and validate every declaration. This is the sealed
    /// transition: the returned registry is immutable.
    pub fn seal(self) -> Result<Registry, RegistryError> {
        let graph = DependencyGraph::build(&self.kinds, &self.relations, &self.fields)?;
        info!(
            kinds = self.kinds.len(),
            fields = self.fields.len(),
            edges = graph.edge_count(),
            "registry sealed"
        );
        Ok(Registry {
            kinds: self.kinds,
            relations: self.relations,
            fields: self.fields,
            graph,
        })
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// A sealed set of computed-field declarations and their graph.
///
/// Field indices and graph [`NodeId`]s coincide: the n-th registered field
/// is node n.
pub struct Registry {
    kinds: IndexSet<Kind>,
    relations: Vec<RelationDef>,
    fields: IndexMap<FieldKey, ComputedField>,
    graph: DependencyGraph,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Install this registry for the whole process.
    pub fn install(self) -> Result<&'static Registry, RegistryError> {
        let mut fresh = false;
        let installed = GLOBAL.get_or_init(|| {
            fresh = true;
            self
        });
        if fresh {
            Ok(installed)
        } else {
            Err(RegistryError::AlreadyInstalled)
        }
    }

    /// The process-wide registry, once installed.
    pub fn global() -> Option<&'static Registry> {
        GLOBAL.get()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &Kind> {
        self.kinds.iter()
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Foreign keys whose target is `target`, as `(owner kind, field)`.
    pub fn foreign_keys_into<'r>(
        &'r self,
        target: &'r Kind,
    ) -> impl Iterator<Item = (&'r Kind, &'r FieldName)> + 'r {
        self.relations.iter().filter_map(move |relation| match relation {
            RelationDef::ForeignKey { owner, field, target: to } if to == target => Some((owner, field)),
            _ => None,
        })
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, kind: &Kind, field: &str) -> Option<&ComputedField> {
        self.node_id(kind, field).map(|id| self.field_at(id))
    }

    pub fn node_id(&self, kind: &Kind, field: &str) -> Option<NodeId> {
        self.graph.node_of(kind, field)
    }

    pub(crate) fn field_at(&self, id: NodeId) -> &ComputedField {
        &self.fields[id.index()]
    }

    pub fn is_computed(&self, kind: &Kind, field: &str) -> bool {
        self.node_id(kind, field).is_some()
    }

    /// Declared specs of a computed field.
    pub fn specs_for(&self, kind: &Kind, field: &str) -> Option<&[DependencySpec]> {
        self.field(kind, field).map(ComputedField::specs)
    }

    /// Every resolved dependency that reads `kind`, as
    /// `(dependent field, dependency)`.
    pub fn specs_depending_on<'r>(
        &'r self,
        kind: &'r Kind,
    ) -> impl Iterator<Item = (&'r FieldKey, &'r Dependency)> + 'r {
        self.graph
            .watchers_of(kind)
            .map(move |(node, dependency)| (self.field_at(node).key(), dependency))
    }

    /// Computed fields declared on `kind`, in registration order.
    pub fn fields_of<'r>(&'r self, kind: &'r Kind) -> impl Iterator<Item = &'r ComputedField> + 'r {
        self.graph
            .nodes_of(kind)
            .iter()
            .map(move |id| self.field_at(*id))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds)
            .field("relations", &self.relations)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(view: &View<'_>) -> Result<Value, ComputeError> {
        let _ = view;
        Ok(Value::Int(1))
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut builder = Registry::builder();
        builder.register("Forum", "post_count", ValueType::Int, constant).unwrap();
        let err = builder
            .register("Forum", "post_count", ValueType::Int, constant)
            .err()
            .unwrap();
        assert_eq!(
            err,
            RegistryError::DuplicateField {
                key: FieldKey::new("Forum", "post_count")
            }
        );
    }

    #[test]
    fn sealed_registry_answers_lookups() {
        let mut builder = Registry::builder();
        builder.foreign_key("Post", "forum", "Forum");
        builder
            .register("Forum", "post_count", ValueType::Int, constant)
            .unwrap()
            .depends_on(DependencySpec::on("Post").existence());
        let registry = builder.seal().unwrap();

        let forum = Kind::new("Forum");
        let post = Kind::new("Post");
        assert!(registry.is_computed(&forum, "post_count"));
        assert!(!registry.is_computed(&forum, "title"));
        assert_eq!(registry.specs_for(&forum, "post_count").unwrap().len(), 1);

        let readers: Vec<_> = registry.specs_depending_on(&post).collect();
        assert_eq!(readers.len(), 1);
        assert_eq!(readers[0].0, &FieldKey::new("Forum", "post_count"));
        assert_eq!(readers[0].1.path, Path::Reverse { fk: "forum".into() });

        let into_forum: Vec<_> = registry.foreign_keys_into(&forum).collect();
        assert_eq!(into_forum, vec![(&post, &FieldName::new("forum"))]);
        assert_eq!(registry.foreign_keys_into(&post).count(), 0);
    }

    #[test]
    fn evaluate_substitutes_default_and_checks_type() {
        use crate::model::MemoryStore;

        let mut builder = Registry::builder();
        builder
            .register("Post", "score", ValueType::Int, |_view| Ok(Value::Null))
            .unwrap()
            .default_value(0_i64);
        builder
            .register("Post", "broken", ValueType::Int, |_view| Ok(Value::from("x")))
            .unwrap();
        let registry = builder.seal().unwrap();

        let store = MemoryStore::new();
        let post = store.insert("Post", []);
        let view = View::new(&store, post, 4);
        let kind = Kind::new("Post");
        assert_eq!(
            registry.field(&kind, "score").unwrap().evaluate(&view).unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            registry.field(&kind, "broken").unwrap().evaluate(&view).unwrap_err(),
            ComputeError::TypeMismatch {
                expected: ValueType::Int,
                found: ValueType::Text
            }
        );
    }
}
