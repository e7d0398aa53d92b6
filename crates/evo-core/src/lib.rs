//! Evo Core - evolutionary scheduler over agent variants
//!
//! Runs generations of attempts: each attempt takes an archived parent,
//! provisions a sandbox, asks the patch author for a diagnosis and a patch,
//! applies it, evaluates the result in a shallow and optionally a deep tier,
//! and commits a terminal child record to the variant store.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──select──> SelectionPolicy (evo-selection)
//!     │
//!     ├──spawn W workers──> AttemptPipeline ──> SandboxAdapter
//!     │                                   ├──> PatchAuthor
//!     │                                   └──> EvaluatorAdapter
//!     │
//!     └──commit──> VariantStore (evo-archive)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_core::{simulated_adapters, RunConfig, Scheduler, SimulationConfig};
//! use evo_archive::VariantStore;
//! use std::sync::Arc;
//!
//! let (adapters, _sandbox) = simulated_adapters(&SimulationConfig::default())?;
//! let store = Arc::new(VariantStore::in_memory());
//! let mut scheduler = Scheduler::new(RunConfig::default(), store, adapters)?;
//! let report = scheduler.run().await?;
//! println!("{}", report.totals());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod adapter;
pub mod attempt;
pub mod config;
pub mod error;
pub mod patch;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod simulation;
pub mod summary;

pub use adapter::{
    Adapters, EvalStage, EvaluationRequest, EvaluatorAdapter, PatchAuthor, SandboxAdapter,
    SandboxHandle,
};
pub use attempt::{AttemptOutcome, AttemptState, AttemptTicket, AttemptTrail};
pub use config::{
    numbered_tasks, ArchiveRule, EvaluationConfig, EvaluationMode, PatchPolicy, RunConfig,
    TimeoutConfig, SCORE_EPSILON,
};
pub use error::{AdapterError, ApplyError, ConfigError, SchedulerError};
pub use patch::{inspect_patch, PatchInspection, PatchOutcome};
pub use pipeline::{AttemptInput, AttemptPipeline};
pub use report::{GenerationReport, RunReport, StatusCounts};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, StopHandle};
pub use simulation::{
    simulated_adapters, SimulatedAuthor, SimulatedEvaluator, SimulatedSandbox, SimulationConfig,
};
pub use summary::{BestVariant, GenerationSummary, ImprovementSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
