//! Variant records
//!
//! A [`NewVariant`] is the in-memory, child-in-progress record owned by an
//! attempt. The store turns it into a committed [`Variant`] exactly once, at
//! which point it receives its id and becomes immutable.

use crate::digest::PatchDigest;
use crate::error::StatusError;
use crate::evaluation::EvaluationResult;
use crate::id::{AttemptId, VariantId};
use crate::patch::Patch;
use crate::status::{validate_transition, VariantStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Store-assigned id
    pub id: VariantId,
    /// Parent variant; `None` only for the root
    pub parent_id: Option<VariantId>,
    /// Generation in which the variant was created
    pub generation: u32,
    /// Terminal status
    pub status: VariantStatus,
    /// Fast-subset evaluation, if it ran
    pub shallow_result: Option<EvaluationResult>,
    /// Full-suite evaluation, if it ran
    pub deep_result: Option<EvaluationResult>,
    /// Digest of `patch`
    pub patch_reference: PatchDigest,
    /// Diff relative to the parent's resolved tree
    pub patch: Patch,
    /// Why the variant ended where it did
    pub reason: Option<String>,
    /// Diagnosis text that motivated the patch
    pub diagnosis: Option<String>,
    /// Attempt that produced the variant (none for the root)
    pub attempt_id: Option<AttemptId>,
    /// Every status the variant passed through, in order
    pub status_trail: Vec<VariantStatus>,
    /// When the child-in-progress record was created
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Whether this is the baseline variant
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether the variant is eligible for selection
    #[inline]
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.status == VariantStatus::Archived
    }

    /// Deep result if present, else shallow
    #[inline]
    #[must_use]
    pub fn final_result(&self) -> Option<&EvaluationResult> {
        self.deep_result.as_ref().or(self.shallow_result.as_ref())
    }

    /// Final score, if the variant was evaluated
    #[inline]
    #[must_use]
    pub fn score(&self) -> Option<f64> {
        self.final_result().map(|r| r.score)
    }
}

/// A variant that has not been committed yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewVariant {
    /// Parent variant; `None` only for the root
    pub parent_id: Option<VariantId>,
    /// Generation in which the variant is created
    pub generation: u32,
    /// Diff relative to the parent's resolved tree
    pub patch: Patch,
    /// Fast-subset evaluation
    pub shallow_result: Option<EvaluationResult>,
    /// Full-suite evaluation
    pub deep_result: Option<EvaluationResult>,
    /// Outcome reason
    pub reason: Option<String>,
    /// Diagnosis text
    pub diagnosis: Option<String>,
    /// Producing attempt
    pub attempt_id: Option<AttemptId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    status: VariantStatus,
    status_trail: Vec<VariantStatus>,
}

impl NewVariant {
    fn blank(parent_id: Option<VariantId>, generation: u32) -> Self {
        Self {
            parent_id,
            generation,
            patch: Patch::empty(),
            shallow_result: None,
            deep_result: None,
            reason: None,
            diagnosis: None,
            attempt_id: None,
            created_at: Utc::now(),
            status: VariantStatus::Pending,
            status_trail: vec![VariantStatus::Pending],
        }
    }

    /// The hand-written baseline: no parent, empty patch, generation 0
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self::blank(None, 0)
    }

    /// A child-in-progress derived from `parent`
    #[inline]
    #[must_use]
    pub fn child(parent: VariantId, generation: u32, attempt_id: AttemptId) -> Self {
        let mut variant = Self::blank(Some(parent), generation);
        variant.attempt_id = Some(attempt_id);
        variant
    }

    /// Current status
    #[inline]
    #[must_use]
    pub fn status(&self) -> VariantStatus {
        self.status
    }

    /// Statuses observed so far
    #[inline]
    #[must_use]
    pub fn status_trail(&self) -> &[VariantStatus] {
        &self.status_trail
    }

    /// Move the status forward
    ///
    /// # Errors
    /// `StatusError::IllegalTransition` if `to` is not reachable from the
    /// current status.
    pub fn advance(&mut self, to: VariantStatus) -> Result<(), StatusError> {
        validate_transition(self.status, to)?;
        self.status = to;
        self.status_trail.push(to);
        Ok(())
    }

    /// Deep result if present, else shallow
    #[inline]
    #[must_use]
    pub fn final_result(&self) -> Option<&EvaluationResult> {
        self.deep_result.as_ref().or(self.shallow_result.as_ref())
    }

    /// Seal the record under its store-assigned id
    #[must_use]
    pub(crate) fn into_variant(self, id: VariantId) -> Variant {
        Variant {
            id,
            parent_id: self.parent_id,
            generation: self.generation,
            status: self.status,
            shallow_result: self.shallow_result,
            deep_result: self.deep_result,
            patch_reference: self.patch.digest(),
            patch: self.patch,
            reason: self.reason,
            diagnosis: self.diagnosis,
            attempt_id: self.attempt_id,
            status_trail: self.status_trail,
            created_at: self.created_at,
        }
    }
}

/// A variant's full state, expressed as the ordered patch chain from the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTree {
    /// Variant ids from the root to the tip
    pub lineage: Vec<VariantId>,
    /// Non-empty patches in application order
    pub patches: Vec<Patch>,
}

impl SourceTree {
    /// Tree of the baseline
    #[inline]
    #[must_use]
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Tree with `patch` applied on top; empty patches leave it unchanged
    #[must_use]
    pub fn with_patch(&self, patch: &Patch) -> Self {
        let mut tree = self.clone();
        if !patch.is_blank() {
            tree.patches.push(patch.clone());
        }
        tree
    }

    /// Content fingerprint over the patch chain
    #[must_use]
    pub fn fingerprint(&self) -> PatchDigest {
        let digests: Vec<PatchDigest> = self.patches.iter().map(Patch::digest).collect();
        PatchDigest::chain(digests.iter())
    }

    /// The last variant on the chain
    #[inline]
    #[must_use]
    pub fn tip(&self) -> Option<VariantId> {
        self.lineage.last().copied()
    }
}
