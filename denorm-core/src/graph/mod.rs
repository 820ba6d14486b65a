//! Dependency Graph
//!
//! This module compiles the registry's declarations into the kind-level
//! dependency graph and expands it against concrete instances at runtime.
//!
//! # Overview
//!
//! The kind-level graph is a directed acyclic graph where:
//!
//! - Nodes are computed fields `(kind, field)`
//! - Edges are "recompute B when A changes": if B reads A through a
//!   non-self relation, there is an edge from A to B
//!
//! Self relations (trees, reply chains) never add edges. They may loop in
//! the data, which is handled per instance by the scheduler.
//!
//! When an instance changes, [`DependencyGraph::expand`] walks the
//! resolved relation paths to find the affected `(instance, field)` pairs.
//!
//! # Design Decisions
//!
//! 1. The graph is built once when the registry is sealed and never
//!    mutated, so it is shared across batches without locking.
//!
//! 2. Node ids are dense indices, so lookups are O(1).
//!
//! 3. Resolved dependencies are indexed by the kind they read, so a change
//!    finds its watchers without scanning every computed field.

mod builder;
mod expand;
mod node;

pub use builder::DependencyGraph;
pub use expand::Trigger;
pub use node::{DirtyState, Node, NodeId};
