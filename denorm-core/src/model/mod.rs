//! Entity & Relation Model
//!
//! The data shapes the engine reasons about. Entities are addressed by
//! [`EntityRef`]; their fields hold [`Value`]s; everything else is reached
//! through the [`Store`] collaborator.

mod entity;
mod memory;
mod store;
mod value;

pub use entity::{EntityId, EntityRef, FieldKey, FieldName, Kind};
pub use memory::MemoryStore;
pub use store::{generic_target, EntityIter, FieldChange, Store, StoreError};
pub use value::{Value, ValueType};
