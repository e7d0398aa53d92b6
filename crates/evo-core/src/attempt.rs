//! Attempt state machine
//!
//! An attempt walks `selected -> provisioned -> diagnosed -> patched ->
//! applied -> eval_shallow -> [eval_deep] -> scored` and ends in exactly one
//! terminal state. Any non-terminal state may jump to `failed_compile`,
//! `timed_out` or `error`. A no-op patch skips evaluation and is discarded
//! straight from `applied`.

use evo_archive::{AttemptId, NewVariant, VariantId, VariantStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline position of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Parent chosen, child record created
    Selected,
    /// Sandbox acquired with the parent's tree
    Provisioned,
    /// Diagnosis obtained
    Diagnosed,
    /// Patch obtained
    Patched,
    /// Patch applied (or recognised as a no-op)
    Applied,
    /// Shallow evaluation done
    EvalShallow,
    /// Deep evaluation done
    EvalDeep,
    /// Final score decided
    Scored,
    /// Kept
    Archived,
    /// Not kept
    Discarded,
    /// Patch did not apply
    FailedCompile,
    /// Time bound exceeded
    TimedOut,
    /// Unclassified adapter failure
    Error,
}

impl AttemptState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Archived | Self::Discarded | Self::FailedCompile | Self::TimedOut | Self::Error
        )
    }

    /// Terminal state matching a terminal variant status
    #[must_use]
    pub fn from_status(status: VariantStatus) -> Option<Self> {
        match status {
            VariantStatus::Archived => Some(Self::Archived),
            VariantStatus::Discarded => Some(Self::Discarded),
            VariantStatus::FailedCompile => Some(Self::FailedCompile),
            VariantStatus::TimedOut => Some(Self::TimedOut),
            VariantStatus::Error => Some(Self::Error),
            VariantStatus::Pending
            | VariantStatus::EvaluatingShallow
            | VariantStatus::EvaluatingDeep => None,
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: AttemptState) -> &'static [AttemptState] {
    use AttemptState::*;
    match from {
        Selected => &[Provisioned, FailedCompile, TimedOut, Error],
        Provisioned => &[Diagnosed, FailedCompile, TimedOut, Error],
        Diagnosed => &[Patched, FailedCompile, TimedOut, Error],
        Patched => &[Applied, FailedCompile, TimedOut, Error],
        Applied => &[EvalShallow, Discarded, FailedCompile, TimedOut, Error],
        EvalShallow => &[EvalDeep, Scored, FailedCompile, TimedOut, Error],
        EvalDeep => &[Scored, FailedCompile, TimedOut, Error],
        Scored => &[Archived, Discarded, FailedCompile, TimedOut, Error],
        Archived | Discarded | FailedCompile | TimedOut | Error => &[],
    }
}

/// Ordered record of the states an attempt passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTrail {
    states: Vec<AttemptState>,
}

impl Default for AttemptTrail {
    fn default() -> Self {
        Self {
            states: vec![AttemptState::Selected],
        }
    }
}

impl AttemptTrail {
    /// Current state
    #[must_use]
    pub fn current(&self) -> AttemptState {
        self.states
            .last()
            .copied()
            .unwrap_or(AttemptState::Selected)
    }

    /// Every state so far
    #[must_use]
    pub fn states(&self) -> &[AttemptState] {
        &self.states
    }

    /// Move forward; returns false (and stays put) on an illegal step
    pub fn advance(&mut self, to: AttemptState) -> bool {
        let from = self.current();
        if allowed_transitions(from).contains(&to) {
            tracing::trace!(%from, %to, "attempt transition");
            self.states.push(to);
            true
        } else {
            tracing::error!(%from, %to, "illegal attempt transition");
            false
        }
    }
}

/// Everything an attempt needs to know about its slot in a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTicket {
    /// Attempt id
    pub attempt_id: AttemptId,
    /// Parent variant
    pub parent_id: VariantId,
    /// Generation the child belongs to
    pub generation: u32,
}

impl AttemptTicket {
    /// Fresh ticket
    #[must_use]
    pub fn new(parent_id: VariantId, generation: u32) -> Self {
        Self {
            attempt_id: AttemptId::new(),
            parent_id,
            generation,
        }
    }
}

/// A finished attempt: a terminal child record plus its pipeline trail
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Ticket the attempt ran under
    pub ticket: AttemptTicket,
    /// Child record, in a terminal status
    pub variant: NewVariant,
    /// Pipeline states visited
    pub trail: AttemptTrail,
}

impl AttemptOutcome {
    /// Terminal record for an attempt that never ran to completion
    #[must_use]
    pub fn abandoned(ticket: AttemptTicket, status: VariantStatus, reason: impl Into<String>) -> Self {
        let mut variant = NewVariant::child(ticket.parent_id, ticket.generation, ticket.attempt_id);
        variant.reason = Some(reason.into());
        let mut trail = AttemptTrail::default();
        if let Err(err) = variant.advance(status) {
            tracing::error!(error = %err, "abandoned attempt given a non-terminal status");
        }
        if let Some(state) = AttemptState::from_status(variant.status()) {
            trail.advance(state);
        }
        Self {
            ticket,
            variant,
            trail,
        }
    }

    /// Terminal status of the child
    #[inline]
    #[must_use]
    pub fn status(&self) -> VariantStatus {
        self.variant.status()
    }
}
