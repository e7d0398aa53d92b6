//! Variant status state machine
//!
//! Statuses only move forward:
//! `pending -> evaluating_shallow -> evaluating_deep -> {archived | discarded}`,
//! and any non-terminal status may jump to `failed_compile`, `timed_out`
//! or `error`. Terminal statuses have no outgoing transitions.

use crate::error::StatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantStatus {
    /// Created, not yet evaluated
    Pending,
    /// Running the fast task subset
    EvaluatingShallow,
    /// Running the full task suite
    EvaluatingDeep,
    /// Kept; eligible as a parent
    Archived,
    /// Evaluated but not kept
    Discarded,
    /// Patch did not apply
    FailedCompile,
    /// Attempt or adapter call exceeded its time bound
    TimedOut,
    /// Unclassified adapter failure
    Error,
}

impl VariantStatus {
    /// Every status, in declaration order
    pub const ALL: [VariantStatus; 8] = [
        Self::Pending,
        Self::EvaluatingShallow,
        Self::EvaluatingDeep,
        Self::Archived,
        Self::Discarded,
        Self::FailedCompile,
        Self::TimedOut,
        Self::Error,
    ];

    /// Terminal statuses, in reporting order
    pub const TERMINAL: [VariantStatus; 5] = [
        Self::Archived,
        Self::Discarded,
        Self::FailedCompile,
        Self::TimedOut,
        Self::Error,
    ];

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Archived | Self::Discarded | Self::FailedCompile | Self::TimedOut | Self::Error
        )
    }

    /// Whether this terminal status is a failure rather than a scored outcome
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::FailedCompile | Self::TimedOut | Self::Error)
    }

    /// Position along the forward-only order
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::EvaluatingShallow => 1,
            Self::EvaluatingDeep => 2,
            _ => 3,
        }
    }

    /// Stable snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::EvaluatingShallow => "evaluating_shallow",
            Self::EvaluatingDeep => "evaluating_deep",
            Self::Archived => "archived",
            Self::Discarded => "discarded",
            Self::FailedCompile => "failed_compile",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: VariantStatus) -> &'static [VariantStatus] {
    use VariantStatus::*;
    match from {
        Pending => &[EvaluatingShallow, Discarded, FailedCompile, TimedOut, Error],
        EvaluatingShallow => &[EvaluatingDeep, Archived, Discarded, FailedCompile, TimedOut, Error],
        EvaluatingDeep => &[Archived, Discarded, FailedCompile, TimedOut, Error],
        Archived | Discarded | FailedCompile | TimedOut | Error => &[],
    }
}

/// Validates a status transition.
///
/// Illegal transitions are returned as errors; with the `strict-debug`
/// feature they panic instead.
pub fn validate_transition(from: VariantStatus, to: VariantStatus) -> Result<(), StatusError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal status transition attempted: {from:?} -> {to:?}");

        #[cfg(not(feature = "strict-debug"))]
        Err(StatusError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        use VariantStatus::*;
        assert!(validate_transition(Pending, EvaluatingShallow).is_ok());
        assert!(validate_transition(EvaluatingShallow, EvaluatingDeep).is_ok());
        assert!(validate_transition(EvaluatingDeep, Archived).is_ok());
        assert!(validate_transition(EvaluatingShallow, Discarded).is_ok());
    }

    #[test]
    fn terminal_has_no_exits() {
        for status in VariantStatus::TERMINAL {
            assert!(allowed_transitions(status).is_empty());
            assert!(validate_transition(status, VariantStatus::Pending).is_err());
        }
    }

    #[test]
    fn regression_is_rejected() {
        assert!(validate_transition(VariantStatus::EvaluatingDeep, VariantStatus::EvaluatingShallow)
            .is_err());
        assert!(validate_transition(VariantStatus::Pending, VariantStatus::Pending).is_err());
    }

    #[test]
    fn allowed_transitions_never_lower_rank() {
        for from in VariantStatus::ALL {
            for to in allowed_transitions(from) {
                assert!(to.rank() > from.rank(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn serde_names_are_snake_case() {
        let json = serde_json::to_string(&VariantStatus::FailedCompile).unwrap();
        assert_eq!(json, "\"failed_compile\"");
        assert_eq!(VariantStatus::TimedOut.to_string(), "timed_out");
    }
}
