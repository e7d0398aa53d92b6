//! External collaborator contracts
//!
//! The scheduler consumes three adapters and never looks inside them:
//! - [`SandboxAdapter`]: isolated environment per attempt
//! - [`EvaluatorAdapter`]: benchmark runs against a task subset
//! - [`PatchAuthor`]: diagnosis and patch authoring
//!
//! Every call is awaited under a timeout by the pipeline, so implementations
//! may block for as long as they need.

use crate::error::{AdapterError, ApplyError};
use evo_archive::{AggregationPolicy, EvaluationResult, Patch, SourceTree, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque sandbox instance handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle(pub u64);

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox-{}", self.0)
    }
}

/// Which tier an evaluation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStage {
    /// Fast subset
    Shallow,
    /// Full suite
    Deep,
}

impl EvalStage {
    /// Stable name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Deep => "deep",
        }
    }
}

/// One evaluation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    /// Tier
    pub stage: EvalStage,
    /// Task ids to run
    pub tasks: Vec<String>,
    /// Independent runs to fold together
    pub run_count: u32,
    /// How per-task outcomes of several runs are merged
    pub aggregation: AggregationPolicy,
}

/// Provisions, patches and tears down isolated environments
#[async_trait::async_trait]
pub trait SandboxAdapter: Send + Sync {
    /// Acquire a fresh sandbox pre-loaded with `tree`
    async fn provision(&self, tree: &SourceTree) -> Result<SandboxHandle, AdapterError>;

    /// Apply `patch` on top of the sandbox's tree
    async fn apply_patch(&self, handle: SandboxHandle, patch: &Patch) -> Result<(), ApplyError>;

    /// Release the sandbox; safe to call on an already torn-down handle
    async fn teardown(&self, handle: SandboxHandle) -> Result<(), AdapterError>;
}

/// Runs benchmark tasks inside a sandbox
#[async_trait::async_trait]
pub trait EvaluatorAdapter: Send + Sync {
    /// Evaluate the sandbox's tree; with `run_count > 1` the result is the
    /// aggregate of the runs (mean score, per-task by the aggregation policy)
    async fn evaluate(
        &self,
        handle: SandboxHandle,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResult, AdapterError>;
}

/// Diagnoses a parent and writes the next patch
#[async_trait::async_trait]
pub trait PatchAuthor: Send + Sync {
    /// Describe what should be improved; an empty diagnosis is fine
    async fn diagnose(&self, parent: &Variant, failure_logs: &[String]) -> Result<String, AdapterError>;

    /// Produce a patch relative to the parent; an empty patch is fine
    async fn author_patch(&self, parent: &Variant, diagnosis: &str) -> Result<Patch, AdapterError>;
}

/// The three collaborators an attempt needs
#[derive(Clone)]
pub struct Adapters {
    /// Sandbox runtime
    pub sandbox: Arc<dyn SandboxAdapter>,
    /// Benchmark harness
    pub evaluator: Arc<dyn EvaluatorAdapter>,
    /// Diagnosis and patch authoring
    pub author: Arc<dyn PatchAuthor>,
}

impl Adapters {
    /// Bundle adapters
    #[must_use]
    pub fn new(
        sandbox: Arc<dyn SandboxAdapter>,
        evaluator: Arc<dyn EvaluatorAdapter>,
        author: Arc<dyn PatchAuthor>,
    ) -> Self {
        Self {
            sandbox,
            evaluator,
            author,
        }
    }
}

impl fmt::Debug for Adapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapters").finish_non_exhaustive()
    }
}
