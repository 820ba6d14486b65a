//! Aggregate Helpers
//!
//! Count fields ask the store for a cardinality instead of loading the
//! related set. The result always equals the length of the matching
//! traversal; only the cost differs.

use crate::error::{ComputeError, RegistryError};
use crate::model::{EntityRef, FieldName, Kind, Store, StoreError, Value, ValueType};
use crate::registry::{Computation, DependencySpec, FieldDecl, RegistryBuilder, View};

/// A computation counting related entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountField {
    /// Entities of `owner` kind whose foreign key `fk` points here.
    Reverse { owner: Kind, fk: FieldName },
    /// Members of this entity's many-to-many `field`.
    Many { field: FieldName },
}

impl CountField {
    pub fn reverse(owner: &str, fk: &str) -> Self {
        CountField::Reverse {
            owner: Kind::new(owner),
            fk: FieldName::new(fk),
        }
    }

    pub fn many(field: &str) -> Self {
        CountField::Many {
            field: FieldName::new(field),
        }
    }
}

impl Computation for CountField {
    fn compute(&self, view: &View<'_>) -> Result<Value, ComputeError> {
        // Rows without an identity have nothing pointing at them yet.
        if !view.is_persisted() {
            return Ok(Value::Int(0));
        }
        let count = match self {
            CountField::Reverse { owner, fk } => view.count_reverse(owner.as_str(), fk)?,
            CountField::Many { field } => view.count_many(field)?,
        };
        Ok(Value::from(count))
    }
}

impl RegistryBuilder {
    /// Register `kind.field` as the number of `owner_kind` entities whose
    /// foreign key `fk` points at it. Defaults to 0.
    pub fn count_field(
        &mut self,
        kind: &str,
        field: &str,
        owner_kind: &str,
        fk: &str,
    ) -> Result<FieldDecl<'_>, RegistryError> {
        Ok(self
            .register_computation(kind, field, ValueType::Int, CountField::reverse(owner_kind, fk))?
            .depends_on(DependencySpec::on(owner_kind).foreign_key(fk).existence())
            .default_value(0_i64))
    }
}

/// Number of `owner` entities whose foreign key `fk` points at `entity`.
pub fn count(store: &dyn Store, entity: &EntityRef, owner: &str, fk: &str) -> Result<usize, StoreError> {
    store.count_reverse(entity, &Kind::new(owner), fk)
}
