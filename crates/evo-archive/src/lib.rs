//! Evo Archive - lineage records and the variant store
//!
//! Every candidate agent produced by the evolutionary search is recorded here:
//! - [`Variant`]: an immutable-once-committed record (patch, lineage, results)
//! - [`EvaluationResult`]: per-task outcomes and aggregate score
//! - [`VariantStatus`]: forward-only status state machine
//! - [`VariantStore`]: serialized, append-only store with optional journal
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_archive::{NewVariant, Patch, VariantStatus, VariantStore};
//!
//! let store = VariantStore::in_memory();
//! let mut root = NewVariant::root();
//! root.advance(VariantStatus::EvaluatingShallow)?;
//! root.advance(VariantStatus::Archived)?;
//! let root_id = store.commit(root)?;
//!
//! assert_eq!(store.archived_variants().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod digest;
pub mod error;
pub mod evaluation;
pub mod id;
pub mod journal;
pub mod patch;
pub mod status;
pub mod store;
pub mod variant;

pub use digest::PatchDigest;
pub use error::{JournalError, StatusError, StoreError};
pub use evaluation::{AggregationPolicy, EvaluationResult, TaskOutcome};
pub use id::{AttemptId, VariantId};
pub use journal::{read_journal, verify_journal, Journal, JournalCheck, JournalEntry};
pub use patch::Patch;
pub use status::{allowed_transitions, validate_transition, VariantStatus};
pub use store::{Candidate, VariantStore};
pub use variant::{NewVariant, SourceTree, Variant};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
