//! Selection errors

/// Errors from parent selection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    /// No archived variant to choose from
    #[error("empty candidate pool")]
    EmptyPool,

    /// Policy constructed with an out-of-range parameter
    #[error("invalid selection parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Sampling weights could not form a distribution
    #[error("invalid sampling weights: {0}")]
    InvalidWeights(String),

    /// Strategy name not known to the registry
    #[error("unknown selection strategy: {0}")]
    UnknownStrategy(String),
}

impl SelectionError {
    /// Whether the scheduler must stop the run
    ///
    /// `EmptyPool` is only recoverable for generation 0, which the scheduler
    /// seeds from the root without calling a policy.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }
}
