//! Selection policy trait
//!
//! Provides the [`SelectionPolicy`] trait for pluggable parent selection over
//! the archived-variant pool.

use crate::error::SelectionError;
use evo_archive::{Candidate, VariantId};
use rand::RngCore;

/// Chooses parents for the next generation
///
/// # Determinism
/// Implementations must draw all randomness from `rng`, in a fixed order, so
/// that the same seed and the same pool give the same selection.
pub trait SelectionPolicy: Send + Sync + std::fmt::Debug {
    /// Draw exactly `k` parents (with replacement) from `pool`
    ///
    /// # Errors
    /// `SelectionError::EmptyPool` if `pool` is empty.
    fn select(
        &self,
        pool: &[Candidate],
        k: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<VariantId>, SelectionError>;

    /// Strategy name (for logging/serialization)
    fn name(&self) -> &'static str;
}

pub(crate) fn ensure_non_empty(pool: &[Candidate]) -> Result<(), SelectionError> {
    if pool.is_empty() {
        Err(SelectionError::EmptyPool)
    } else {
        Ok(())
    }
}
