//! Error types.
//!
//! Startup errors ([`RegistryError`]) are configuration bugs and fatal.
//! Per-field [`ComputeError`]s are caught by the scheduler and logged.
//! [`EngineError`]s are surfaced to whoever drove the batch.

use thiserror::Error;

use crate::model::{EntityRef, FieldKey, FieldName, Kind, StoreError, ValueType};

/// Errors raised while declaring or sealing the registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    /// The same computed field was registered twice.
    #[error("computed field {key} is registered twice")]
    DuplicateField { key: FieldKey },

    /// Computed fields depend on each other through non-self relations.
    #[error("cyclic dependency between computed fields: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("unknown entity kind '{kind}'")]
    UnknownKind { kind: Kind },

    /// No relation connects the dependent kind to the target kind.
    #[error("{key} depends on {target} but no relation connects them{}", foreign_key.as_ref().map(|fk| format!(" via '{fk}'")).unwrap_or_default())]
    UnknownRelation {
        key: FieldKey,
        target: Kind,
        foreign_key: Option<FieldName>,
    },

    /// Several relations connect the kinds and no foreign key was named.
    #[error("{key} depends on {target} through several relations ({}); name one with a foreign key", candidates.join(", "))]
    AmbiguousRelation {
        key: FieldKey,
        target: Kind,
        candidates: Vec<String>,
    },

    /// A self-referential dependency was declared without a direction.
    #[error("{key} depends on its own kind but declares no direction")]
    MissingDirection { key: FieldKey },

    /// A process-wide registry was already installed.
    #[error("a registry is already installed for this process")]
    AlreadyInstalled,
}

/// Errors raised by a single compute function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("computed value has type {found}, declared {expected}")]
    TypeMismatch { expected: ValueType, found: ValueType },

    /// A relation traversal went deeper than the configured guard.
    #[error("relation traversal exceeded depth {limit}")]
    RecursionLimit { limit: usize },

    #[error("{0}")]
    Failed(String),
}

impl ComputeError {
    pub fn failed(message: impl Into<String>) -> Self {
        ComputeError::Failed(message.into())
    }
}

/// Errors surfaced to the caller of the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A cascade or traversal went deeper than the configured guard. The
    /// batch is aborted and none of its writes are applied.
    #[error("recursion limit {limit} exceeded at {entity}.{field}")]
    RecursionLimitExceeded {
        limit: usize,
        entity: EntityRef,
        field: FieldName,
    },

    #[error("{key} is not a computed field")]
    UnknownField { key: FieldKey },

    /// Application code tried to write an engine-owned field.
    #[error("{key} is computed and cannot be written directly")]
    ComputedFieldWrite { key: FieldKey },

    #[error("computing {entity}.{field} failed: {source}")]
    Compute {
        entity: EntityRef,
        field: FieldName,
        source: ComputeError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
