//! Error types for the variant archive
//!
//! Store and journal errors indicate corruption of lineage or durability,
//! never an agent failure. They are fatal to a run.

use crate::id::VariantId;
use crate::status::VariantStatus;
use std::path::PathBuf;

/// Variant store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Parent id not present in the store
    #[error("orphan variant: parent {parent} is not in the store")]
    OrphanVariant {
        /// The unknown parent
        parent: VariantId,
    },

    /// Variant id not present in the store
    #[error("variant not found: {0}")]
    NotFound(VariantId),

    /// A parentless variant was committed into a non-empty store
    #[error("root variant already exists")]
    RootExists,

    /// Only terminal outcomes may be committed
    #[error("cannot commit variant in non-terminal status {0}")]
    NotTerminal(VariantStatus),

    /// Parent links do not terminate at the root
    #[error("lineage of {0} does not terminate at the root")]
    BrokenLineage(VariantId),

    /// Journal write or replay failed
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

impl StoreError {
    /// Store errors always stop the run
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        true
    }

    /// Whether the error reflects an invariant the scheduler should have upheld
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::OrphanVariant { .. }
                | Self::NotFound(_)
                | Self::RootExists
                | Self::NotTerminal(_)
                | Self::BrokenLineage(_)
        )
    }
}

/// Journal persistence errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Underlying file I/O failed
    #[error("journal I/O on {path}: {source}")]
    Io {
        /// Journal file
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// A line could not be encoded or decoded
    #[error("journal encoding at line {line}: {source}")]
    Encoding {
        /// 1-based line number
        line: usize,
        /// Cause
        #[source]
        source: serde_json::Error,
    },

    /// Hash chain, sequence or lineage check failed
    #[error("journal corrupt at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number
        line: usize,
        /// What failed
        reason: String,
    },
}

impl JournalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            line,
            reason: reason.into(),
        }
    }

    /// Whether the journal content itself is damaged
    #[inline]
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::Encoding { .. })
    }
}

/// Status state machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// Transition not in the allowed table
    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        /// Current status
        from: VariantStatus,
        /// Requested status
        to: VariantStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::OrphanVariant {
            parent: VariantId(9),
        };
        assert!(err.to_string().contains("orphan variant"));
        assert!(err.to_string().contains("v9"));
        assert!(err.is_fatal());
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn journal_errors_are_fatal_but_not_invariant_violations() {
        let err = StoreError::from(JournalError::corrupt(3, "hash mismatch"));
        assert!(err.is_fatal());
        assert!(!err.is_invariant_violation());
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn status_error_display() {
        let err = StatusError::IllegalTransition {
            from: VariantStatus::Archived,
            to: VariantStatus::Pending,
        };
        assert_eq!(err.to_string(), "illegal status transition archived -> pending");
    }
}
