//! Testing utilities for the evo workspace
//!
//! Scripted adapters whose behaviour a test spells out call by call, plus
//! fixtures for run configs and pre-populated stores.

#![allow(missing_docs)]

use evo_archive::{
    AttemptId, EvaluationResult, NewVariant, Patch, SourceTree, TaskOutcome, Variant, VariantId,
    VariantStatus, VariantStore,
};
use evo_core::simulation::CONFLICT_MARKER;
use evo_core::{
    numbered_tasks, AdapterError, Adapters, ApplyError, EvaluationConfig, EvaluationMode,
    EvaluationRequest, EvaluatorAdapter, PatchAuthor, RetryPolicy, RunConfig, SandboxAdapter,
    SandboxHandle, SimulatedSandbox, TimeoutConfig,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tasks every scripted evaluation runs; scores are multiples of 1/20
pub const SCRIPTED_TASKS: usize = 20;

/// What the scripted author does on one `author_patch` call
#[derive(Debug, Clone)]
pub enum Directive {
    /// Source patch that the scripted evaluator scores at the given value
    Score(f64),
    /// Verbatim patch text
    Patch(String),
    /// Blank patch
    Empty,
    /// Patch touching only test files
    TestOnly,
    /// Source patch the sandbox refuses to apply
    Conflict,
    /// Never return
    Hang,
    /// Return this error
    Fail(AdapterError),
    /// Panic inside the adapter call
    Panic,
}

/// Source patch carrying a score line for [`ScriptedEvaluator`]
pub fn score_patch(score: f64, salt: u64) -> String {
    format!("--- a/src/agent.rs\n+++ b/src/agent.rs\n@@ -1,0 +1,2 @@\n+# score={score}\n+# salt={salt}\n")
}

/// Author that replays a queue of directives, then a fallback
#[derive(Debug)]
pub struct ScriptedAuthor {
    script: Mutex<VecDeque<Directive>>,
    fallback: Directive,
    calls: AtomicU64,
}

impl ScriptedAuthor {
    pub fn new(script: impl IntoIterator<Item = Directive>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Directive::Empty,
            calls: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Directive) -> Self {
        self.fallback = fallback;
        self
    }

    /// `author_patch` calls so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Directives not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait::async_trait]
impl PatchAuthor for ScriptedAuthor {
    async fn diagnose(&self, parent: &Variant, failure_logs: &[String]) -> Result<String, AdapterError> {
        Ok(format!("{} fails {} tasks", parent.id, failure_logs.len()))
    }

    async fn author_patch(&self, _parent: &Variant, _diagnosis: &str) -> Result<Patch, AdapterError> {
        let salt = self.calls.fetch_add(1, Ordering::SeqCst);
        let directive = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match directive {
            Directive::Score(score) => Ok(Patch::new(score_patch(score, salt))),
            Directive::Patch(text) => Ok(Patch::new(text)),
            Directive::Empty => Ok(Patch::empty()),
            Directive::TestOnly => Ok(Patch::new(format!(
                "--- a/tests/test_agent.py\n+++ b/tests/test_agent.py\n@@ -1,0 +1,1 @@\n+# check {salt}\n"
            ))),
            Directive::Conflict => Ok(Patch::new(format!(
                "--- a/src/agent.rs\n+++ b/src/agent.rs\n@@ -1,0 +1,1 @@\n+{CONFLICT_MARKER} {salt}\n"
            ))),
            Directive::Hang => std::future::pending().await,
            Directive::Fail(err) => Err(err),
            Directive::Panic => panic!("scripted author panic"),
        }
    }
}

/// Evaluator that reads the score from the newest `# score=` line in the tree
///
/// Passes the first `round(score * n)` requested tasks, so the reported score
/// is exact for multiples of `1/n`.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    sandbox: Arc<SimulatedSandbox>,
    baseline: f64,
    calls: AtomicU64,
}

impl ScriptedEvaluator {
    pub fn new(sandbox: Arc<SimulatedSandbox>, baseline: f64) -> Self {
        Self {
            sandbox,
            baseline,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_score(&self, tree: &SourceTree) -> f64 {
        tree.patches
            .iter()
            .rev()
            .find_map(|p| {
                p.as_str()
                    .lines()
                    .find_map(|l| l.strip_prefix("+# score="))
                    .and_then(|s| s.trim().parse::<f64>().ok())
            })
            .unwrap_or(self.baseline)
    }
}

#[async_trait::async_trait]
impl EvaluatorAdapter for ScriptedEvaluator {
    async fn evaluate(
        &self,
        handle: SandboxHandle,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tree = self
            .sandbox
            .tree(handle)
            .ok_or_else(|| AdapterError::Unavailable(format!("{handle} is not live")))?;
        let score = self.scripted_score(&tree);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let passing = (score * request.tasks.len() as f64).round() as usize;
        let per_task: BTreeMap<String, TaskOutcome> = request
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let outcome = if i < passing { TaskOutcome::Pass } else { TaskOutcome::Fail };
                (t.clone(), outcome)
            })
            .collect();
        Ok(EvaluationResult::from_outcomes(per_task, Duration::ZERO))
    }
}

/// Sandbox that fails the first `failures` provisions with a transient error
#[derive(Debug)]
pub struct FlakySandbox {
    inner: Arc<SimulatedSandbox>,
    failures: u32,
    provisions: AtomicU32,
}

impl FlakySandbox {
    pub fn new(inner: Arc<SimulatedSandbox>, failures: u32) -> Self {
        Self {
            inner,
            failures,
            provisions: AtomicU32::new(0),
        }
    }

    /// Provision calls so far, failed ones included
    pub fn provisions(&self) -> u32 {
        self.provisions.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SandboxAdapter for FlakySandbox {
    async fn provision(&self, tree: &SourceTree) -> Result<SandboxHandle, AdapterError> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(AdapterError::Transient(format!("provision #{n} refused")));
        }
        self.inner.provision(tree).await
    }

    async fn apply_patch(&self, handle: SandboxHandle, patch: &Patch) -> Result<(), ApplyError> {
        self.inner.apply_patch(handle, patch).await
    }

    async fn teardown(&self, handle: SandboxHandle) -> Result<(), AdapterError> {
        self.inner.teardown(handle).await
    }
}

/// How [`FaultyTeardown`] misbehaves on its chosen call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownFault {
    /// Never return
    Hang,
    /// Panic inside the adapter call
    Panic,
}

/// Sandbox whose `nth` teardown call (1-based) hangs or panics
#[derive(Debug)]
pub struct FaultyTeardown {
    inner: Arc<SimulatedSandbox>,
    nth: u32,
    fault: TeardownFault,
    teardowns: AtomicU32,
}

impl FaultyTeardown {
    pub fn new(inner: Arc<SimulatedSandbox>, nth: u32, fault: TeardownFault) -> Self {
        Self {
            inner,
            nth,
            fault,
            teardowns: AtomicU32::new(0),
        }
    }

    /// Teardown calls so far, the faulty one included
    pub fn teardowns(&self) -> u32 {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SandboxAdapter for FaultyTeardown {
    async fn provision(&self, tree: &SourceTree) -> Result<SandboxHandle, AdapterError> {
        self.inner.provision(tree).await
    }

    async fn apply_patch(&self, handle: SandboxHandle, patch: &Patch) -> Result<(), ApplyError> {
        self.inner.apply_patch(handle, patch).await
    }

    async fn teardown(&self, handle: SandboxHandle) -> Result<(), AdapterError> {
        let call = self.teardowns.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.nth {
            match self.fault {
                TeardownFault::Hang => std::future::pending::<()>().await,
                TeardownFault::Panic => panic!("teardown of {handle} panicked"),
            }
        }
        self.inner.teardown(handle).await
    }
}

/// Scripted collaborators wired together
pub struct ScriptedRig {
    pub adapters: Adapters,
    pub sandbox: Arc<SimulatedSandbox>,
    pub author: Arc<ScriptedAuthor>,
    pub evaluator: Arc<ScriptedEvaluator>,
}

impl ScriptedRig {
    /// Baseline scoring `baseline`, author replaying `script`
    pub fn new(baseline: f64, script: impl IntoIterator<Item = Directive>) -> Self {
        Self::with_author(baseline, ScriptedAuthor::new(script))
    }

    pub fn with_author(baseline: f64, author: ScriptedAuthor) -> Self {
        let sandbox = Arc::new(SimulatedSandbox::new());
        let evaluator = Arc::new(ScriptedEvaluator::new(Arc::clone(&sandbox), baseline));
        let author = Arc::new(author);
        let adapters = Adapters::new(
            Arc::clone(&sandbox) as Arc<dyn SandboxAdapter>,
            Arc::clone(&evaluator) as Arc<dyn EvaluatorAdapter>,
            Arc::clone(&author) as Arc<dyn PatchAuthor>,
        );
        Self {
            adapters,
            sandbox,
            author,
            evaluator,
        }
    }
}

/// Small, fast run: scripted task list, second-scale timeouts, 1ms retry backoff
pub fn test_config(generations: u32, attempts: usize, workers: usize) -> RunConfig {
    let tasks = numbered_tasks("task", SCRIPTED_TASKS);
    RunConfig::new()
        .with_generations(generations)
        .with_attempts(attempts)
        .with_workers(workers)
        .with_seed(42)
        .with_evaluation(EvaluationConfig {
            mode: EvaluationMode::default(),
            shallow_tasks: tasks.clone(),
            deep_tasks: tasks,
            ..EvaluationConfig::default()
        })
        .with_timeouts(TimeoutConfig::from_durations(
            Duration::from_secs(5),
            Duration::from_secs(20),
            Duration::from_secs(60),
        ))
        .with_provision_retry(RetryPolicy {
            max_attempts: 3,
            backoff: 1,
        })
}

/// Single-run result passing the first `round(score * SCRIPTED_TASKS)` tasks
pub fn scripted_result(score: f64) -> EvaluationResult {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let passing = (score * SCRIPTED_TASKS as f64).round() as usize;
    let per_task = numbered_tasks("task", SCRIPTED_TASKS)
        .into_iter()
        .enumerate()
        .map(|(i, t)| (t, if i < passing { TaskOutcome::Pass } else { TaskOutcome::Fail }))
        .collect();
    EvaluationResult::from_outcomes(per_task, Duration::ZERO)
}

/// Commit an archived root scoring `score`
pub fn commit_root(store: &VariantStore, score: f64) -> VariantId {
    let mut root = NewVariant::root();
    root.advance(VariantStatus::EvaluatingShallow).unwrap();
    root.shallow_result = Some(scripted_result(score));
    root.advance(VariantStatus::Archived).unwrap();
    store.commit(root).unwrap()
}

/// Commit an evaluated child of `parent` in `status` (archived or discarded)
pub fn commit_child(
    store: &VariantStore,
    parent: VariantId,
    generation: u32,
    score: f64,
    status: VariantStatus,
) -> VariantId {
    let mut child = NewVariant::child(parent, generation, AttemptId::new());
    child.patch = Patch::new(score_patch(score, store.len() as u64));
    child.advance(VariantStatus::EvaluatingShallow).unwrap();
    child.shallow_result = Some(scripted_result(score));
    child.advance(status).unwrap();
    store.commit(child).unwrap()
}

/// Commit a child that never compiled
pub fn commit_failed(store: &VariantStore, parent: VariantId, generation: u32) -> VariantId {
    let mut child = NewVariant::child(parent, generation, AttemptId::new());
    child.reason = Some("hunk 1 failed".to_string());
    child.advance(VariantStatus::FailedCompile).unwrap();
    store.commit(child).unwrap()
}
