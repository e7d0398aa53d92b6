//! Error types for the scheduler and its collaborators
//!
//! Two families live here. Adapter and apply errors are attempt-level: the
//! pipeline classifies them into a terminal variant status and they never
//! leave an attempt. Scheduler and config errors are run-level and stop it.

use evo_archive::{StatusError, StoreError, VariantStatus};
use evo_selection::SelectionError;
use std::path::PathBuf;

/// Failure reported by an external collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// The call (or the adapter on its own behalf) ran out of time
    #[error("{0} timed out")]
    Timeout(String),

    /// Backend not reachable
    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    /// Infrastructure flake that may succeed on retry
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Anything else
    #[error("adapter failure: {0}")]
    Other(String),
}

impl AdapterError {
    /// Whether a bounded infrastructure retry is allowed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Terminal status an attempt ends in when this error stops it
    #[inline]
    #[must_use]
    pub fn terminal_status(&self) -> VariantStatus {
        match self {
            Self::Timeout(_) => VariantStatus::TimedOut,
            Self::Unavailable(_) | Self::Transient(_) | Self::Other(_) => VariantStatus::Error,
        }
    }
}

/// Patch application failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    /// Hunks do not apply to the parent tree
    #[error("patch conflict: {0}")]
    Conflict(String),

    /// Diff could not be parsed
    #[error("malformed patch: {0}")]
    Malformed(String),

    /// The sandbox itself failed while applying
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Run configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A field holds an unusable value
    #[error("invalid config {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// What is wrong
        reason: String,
    },

    /// TOML could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// Selection parameters rejected
    #[error("invalid selection config: {0}")]
    Selection(#[from] SelectionError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Run-level failures; any of these stops the scheduler
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Variant store invariant or journal failure
    #[error("variant store failure: {0}")]
    Store(#[from] StoreError),

    /// Parent selection failed after generation 0
    #[error("selection failed in generation {generation}: {source}")]
    Selection {
        /// Generation being seeded
        generation: u32,
        /// Cause
        #[source]
        source: SelectionError,
    },

    /// Baseline variant could not be evaluated
    #[error("baseline evaluation failed: {0}")]
    Baseline(String),

    /// Invalid run configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Status state machine violated
    #[error(transparent)]
    Status(#[from] StatusError),
}

impl SchedulerError {
    /// Every scheduler error ends the run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Whether the error indicates lineage or durability corruption
    #[must_use]
    pub fn is_store_corruption(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}
