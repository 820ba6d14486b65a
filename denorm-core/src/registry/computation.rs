//! Compute functions.
//!
//! Each computed field owns exactly one [`Computation`]. Plain closures
//! taking a [`View`] implement it; the count fast path is a dedicated
//! implementation in [`crate::aggregate`].

use super::view::View;
use crate::error::ComputeError;
use crate::model::Value;

/// Derives a computed field's value from its entity's related view.
///
/// Implementations must be pure: the result may only depend on what the
/// field's declared dependencies cover. The engine cannot detect reads
/// outside that set; such reads silently go stale.
pub trait Computation: Send + Sync {
    fn compute(&self, view: &View<'_>) -> Result<Value, ComputeError>;
}

impl<F> Computation for F
where
    F: Fn(&View<'_>) -> Result<Value, ComputeError> + Send + Sync,
{
    fn compute(&self, view: &View<'_>) -> Result<Value, ComputeError> {
        self(view)
    }
}
