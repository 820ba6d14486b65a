//! Dependency declarations
//!
//! A [`DependencySpec`] is what schema code writes: "this computed field
//! reads kind `T`". Sealing resolves each spec against the declared
//! [`RelationDef`]s into a [`Dependency`] carrying a concrete [`Path`].

use std::fmt;

use smallvec::SmallVec;

use crate::model::{FieldName, Kind};

/// Traversal mode of a self-referential dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A child reads its ancestor (e.g. a materialized path).
    Forward,
    /// An ancestor reads its descendants (e.g. a recursive count).
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Kind(Kind),
    SelfKind,
}

/// Which fields of the target a dependency watches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldFilter {
    /// Every field, stored or computed.
    #[default]
    All,
    /// Every stored field. Changes to computed fields are ignored.
    Stored,
    /// Only the named fields (relation carriers are always watched).
    Only(SmallVec<[FieldName; 4]>),
}

impl FieldFilter {
    pub fn matches(&self, field: &str, computed: bool) -> bool {
        match self {
            FieldFilter::All => true,
            FieldFilter::Stored => !computed,
            FieldFilter::Only(fields) => fields.iter().any(|f| *f == *field),
        }
    }
}

/// A declared dependency of one computed field.
///
/// ```rust,ignore
/// DependencySpec::on("Member").foreign_key("author").fields(["name"])
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub(crate) target: Target,
    pub(crate) direction: Option<Direction>,
    pub(crate) foreign_key: Option<FieldName>,
    pub(crate) fields: FieldFilter,
}

impl DependencySpec {
    /// Depend on another kind. The relation is found from the schema.
    pub fn on(kind: &str) -> Self {
        Self {
            target: Target::Kind(Kind::new(kind)),
            direction: None,
            foreign_key: None,
            fields: FieldFilter::All,
        }
    }

    /// Depend on the same kind through a self foreign key.
    pub fn on_self(direction: Direction) -> Self {
        Self {
            target: Target::SelfKind,
            direction: Some(direction),
            foreign_key: None,
            fields: FieldFilter::All,
        }
    }

    /// Disambiguate between several relations to the same kind.
    pub fn foreign_key(mut self, name: &str) -> Self {
        self.foreign_key = Some(FieldName::new(name));
        self
    }

    /// Watch only these fields of the target.
    pub fn fields<'a>(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.fields = FieldFilter::Only(fields.into_iter().map(FieldName::new).collect());
        self
    }

    /// Watch only existence and relinks, never field values.
    pub fn existence(mut self) -> Self {
        self.fields = FieldFilter::Only(SmallVec::new());
        self
    }
}

/// A relation declared in the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDef {
    ForeignKey {
        owner: Kind,
        field: FieldName,
        target: Kind,
    },
    ManyToMany {
        owner: Kind,
        field: FieldName,
        target: Kind,
    },
    /// `(type_field, id_field)` on `owner` may point at any kind.
    GenericKey {
        owner: Kind,
        type_field: FieldName,
        id_field: FieldName,
    },
}

impl RelationDef {
    pub fn owner(&self) -> &Kind {
        match self {
            RelationDef::ForeignKey { owner, .. }
            | RelationDef::ManyToMany { owner, .. }
            | RelationDef::GenericKey { owner, .. } => owner,
        }
    }

    pub(crate) fn names(&self, name: &FieldName) -> bool {
        match self {
            RelationDef::ForeignKey { field, .. } | RelationDef::ManyToMany { field, .. } => {
                field == name
            }
            RelationDef::GenericKey {
                type_field,
                id_field,
                ..
            } => type_field == name || id_field == name,
        }
    }
}

impl fmt::Display for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationDef::ForeignKey {
                owner,
                field,
                target,
            } => write!(f, "{owner}.{field} -> {target}"),
            RelationDef::ManyToMany {
                owner,
                field,
                target,
            } => write!(f, "{owner}.{field} <-> {target}"),
            RelationDef::GenericKey {
                owner,
                type_field,
                id_field,
            } => write!(f, "{owner}.({type_field}, {id_field}) -> *"),
        }
    }
}

/// How a dependent instance is reached from a changed target instance.
///
/// "Dependent" is the kind owning the computed field, "target" is the kind
/// it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Path {
    /// The dependent reads its own fields.
    Own,
    /// `dependent.fk -> target`.
    Direct { fk: FieldName },
    /// `target.fk -> dependent`; the dependent reads the set pointing at it.
    Reverse { fk: FieldName },
    /// `dependent.field` is a many-to-many set of targets.
    ManyOwned { field: FieldName },
    /// `target.field` is a many-to-many set containing the dependent.
    ManyTarget { field: FieldName },
    /// The target's generic key points at the dependent.
    Generic {
        type_field: FieldName,
        id_field: FieldName,
    },
    /// Self `Forward`: `child.fk -> parent`, the child reads its parent.
    Ancestor { fk: FieldName },
    /// Self `Backward`: `child.fk -> parent`, the parent reads its children.
    Descendant { fk: FieldName },
}

impl Path {
    pub fn is_self(&self) -> bool {
        matches!(self, Path::Ancestor { .. } | Path::Descendant { .. })
    }

    /// Fields on the target whose change relinks the relation. Moving an
    /// ancestor moves every descendant, so self paths carry on both ends.
    pub fn target_carriers(&self) -> SmallVec<[&FieldName; 2]> {
        match self {
            Path::Reverse { fk } | Path::Descendant { fk } | Path::Ancestor { fk } => {
                SmallVec::from_slice(&[fk])
            }
            Path::Generic {
                type_field,
                id_field,
            } => SmallVec::from_slice(&[type_field, id_field]),
            _ => SmallVec::new(),
        }
    }

    /// Field on the dependent whose change relinks the relation.
    pub fn own_carrier(&self) -> Option<&FieldName> {
        match self {
            Path::Direct { fk } | Path::Ancestor { fk } => Some(fk),
            _ => None,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::Own => f.write_str("own"),
            Path::Direct { fk } => write!(f, "direct({fk})"),
            Path::Reverse { fk } => write!(f, "reverse({fk})"),
            Path::ManyOwned { field } => write!(f, "many({field})"),
            Path::ManyTarget { field } => write!(f, "many-reverse({field})"),
            Path::Generic {
                type_field,
                id_field,
            } => write!(f, "generic({type_field}, {id_field})"),
            Path::Ancestor { fk } => write!(f, "self-forward({fk})"),
            Path::Descendant { fk } => write!(f, "self-backward({fk})"),
        }
    }
}

/// A resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: Kind,
    pub path: Path,
    pub fields: FieldFilter,
}

impl Dependency {
    /// Whether a change of `field` on a target instance must dirty the
    /// dependent.
    pub fn watches(&self, field: &str, computed: bool) -> bool {
        self.fields.matches(field, computed)
            || self.path.target_carriers().iter().any(|c| **c == *field)
    }
}
