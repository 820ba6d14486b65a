//! Denorm Core
//!
//! This crate provides a denormalization engine: entities declare computed
//! fields derived from related entities, and the engine keeps every
//! computed field consistent as the underlying data changes.
//! It implements:
//!
//! - A declaration registry for computed fields and the relations they read
//! - A kind-level dependency graph, validated for cycles when sealed
//! - Change detection mapping storage writes to affected instances
//! - A recompute scheduler with ordering, deduplication and staged writes
//! - Count fast paths that avoid loading related sets
//!
//! The engine owns no data. It talks to storage through the
//! [`Store`](model::Store) trait; [`MemoryStore`](model::MemoryStore) is
//! the in-process reference implementation.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `model`: Entities, values and the storage contract
//! - `registry`: Computed-field declarations and the related view
//! - `graph`: Kind-level dependency graph and instance expansion
//! - `engine`: Change detector, recompute scheduler and write path
//! - `aggregate`: Count helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use denorm_core::{DependencySpec, Registry, Session, Value};
//!
//! let mut builder = Registry::builder();
//! builder.foreign_key("Post", "forum", "Forum");
//! builder.count_field("Forum", "post_count", "Post", "forum")?;
//! let registry = builder.seal()?;
//!
//! let session = Session::new(&registry);
//! let forum = session.create("Forum", [("title", Value::from("News"))])?;
//! session.create("Post", [("forum", Value::from(forum.clone()))])?;
//! assert_eq!(session.get(&forum, "post_count")?, Value::Int(1));
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod registry;

pub use aggregate::{count, CountField};
pub use config::EngineConfig;
pub use engine::{Batch, BatchReport, Denormalizer, Session, StagedWrites};
pub use error::{ComputeError, EngineError, RegistryError};
pub use model::{EntityRef, FieldChange, FieldKey, Kind, MemoryStore, Store, Value, ValueType};
pub use registry::{DependencySpec, Direction, Registry, RegistryBuilder, View};
