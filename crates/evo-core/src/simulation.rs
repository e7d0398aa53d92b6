//! Deterministic in-process adapters
//!
//! Stand-ins for a container runtime, a benchmark harness and a patch-writing
//! model. Everything is derived from a seed and from content digests, so a
//! simulated run with a single worker replays exactly. Used by `evo simulate`
//! and by the integration tests.
//!
//! The evaluator gives every task a baseline pass probability. Each patch in
//! a tree nudges that probability up or down per task, by an amount derived
//! from the patch digest, so some lineages genuinely improve and others
//! regress.

use crate::adapter::{
    Adapters, EvaluationRequest, EvaluatorAdapter, PatchAuthor, SandboxAdapter, SandboxHandle,
};
use crate::error::{AdapterError, ApplyError, ConfigError};
use dashmap::DashMap;
use evo_archive::{EvaluationResult, Patch, SourceTree, TaskOutcome, Variant};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Line marker that makes the simulated sandbox reject a patch
pub const CONFLICT_MARKER: &str = "<<<<<<< conflict";

/// Knobs for the simulated collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for the patch author
    pub seed: u64,
    /// Pass probability of every task on the baseline
    pub base_pass_rate: f64,
    /// Largest per-task gain one patch can contribute
    pub max_gain: f64,
    /// Largest per-task loss one patch can contribute
    pub max_loss: f64,
    /// Share of authored patches that are empty
    pub empty_rate: f64,
    /// Share of authored patches that do not apply
    pub conflict_rate: f64,
    /// Share of authored patches that only touch tests
    pub test_only_rate: f64,
    /// Simulated time per evaluation run
    #[serde(with = "millis")]
    pub eval_latency: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            base_pass_rate: 0.2,
            max_gain: 0.15,
            max_loss: 0.05,
            empty_rate: 0.1,
            conflict_rate: 0.1,
            test_only_rate: 0.05,
            eval_latency: Duration::ZERO,
        }
    }
}

impl SimulationConfig {
    /// Builder: author seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder: evaluation latency
    #[must_use]
    pub fn with_eval_latency(mut self, latency: Duration) -> Self {
        self.eval_latency = latency;
        self
    }

    /// Check that every rate is a probability and the patch mix sums to at most 1
    ///
    /// # Errors
    /// `Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("simulation.base_pass_rate", self.base_pass_rate),
            ("simulation.max_gain", self.max_gain),
            ("simulation.max_loss", self.max_loss),
            ("simulation.empty_rate", self.empty_rate),
            ("simulation.conflict_rate", self.conflict_rate),
            ("simulation.test_only_rate", self.test_only_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(field, format!("{value} is not in [0, 1]")));
            }
        }
        let mix = self.empty_rate + self.conflict_rate + self.test_only_rate;
        if mix > 1.0 {
            return Err(ConfigError::invalid(
                "simulation",
                format!("empty, conflict and test-only rates sum to {mix}"),
            ));
        }
        Ok(())
    }
}

/// Build the three simulated adapters; the sandbox is returned separately
/// so callers can inspect live handles
///
/// # Errors
/// `Invalid` if `config` does not validate.
pub fn simulated_adapters(
    config: &SimulationConfig,
) -> Result<(Adapters, Arc<SimulatedSandbox>), ConfigError> {
    config.validate()?;
    let sandbox = Arc::new(SimulatedSandbox::new());
    let evaluator = Arc::new(SimulatedEvaluator::new(Arc::clone(&sandbox), config));
    let author = Arc::new(SimulatedAuthor::new(config));
    let adapters = Adapters::new(Arc::clone(&sandbox) as Arc<dyn SandboxAdapter>, evaluator, author);
    Ok((adapters, sandbox))
}

/// Sandbox that keeps each handle's source tree in memory
#[derive(Debug, Default)]
pub struct SimulatedSandbox {
    live: DashMap<u64, SourceTree>,
    next: AtomicU64,
    teardowns: AtomicU64,
}

impl SimulatedSandbox {
    /// Empty sandbox pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles provisioned and not yet torn down
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Teardown calls received, including repeats
    #[must_use]
    pub fn teardown_count(&self) -> u64 {
        self.teardowns.load(Ordering::Relaxed)
    }

    /// Current tree of a live handle
    #[must_use]
    pub fn tree(&self, handle: SandboxHandle) -> Option<SourceTree> {
        self.live.get(&handle.0).map(|t| t.clone())
    }
}

#[async_trait::async_trait]
impl SandboxAdapter for SimulatedSandbox {
    async fn provision(&self, tree: &SourceTree) -> Result<SandboxHandle, AdapterError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.live.insert(id, tree.clone());
        Ok(SandboxHandle(id))
    }

    async fn apply_patch(&self, handle: SandboxHandle, patch: &Patch) -> Result<(), ApplyError> {
        let mut tree = self
            .live
            .get_mut(&handle.0)
            .ok_or_else(|| AdapterError::Unavailable(format!("{handle} is not live")))?;
        if let Some(line) = patch
            .as_str()
            .lines()
            .position(|l| l.contains(CONFLICT_MARKER))
        {
            return Err(ApplyError::Conflict(format!("hunk does not apply at line {}", line + 1)));
        }
        *tree = tree.with_patch(patch);
        Ok(())
    }

    async fn teardown(&self, handle: SandboxHandle) -> Result<(), AdapterError> {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
        self.live.remove(&handle.0);
        Ok(())
    }
}

/// Evaluator whose outcomes are a pure function of tree, task and run index
#[derive(Debug)]
pub struct SimulatedEvaluator {
    sandbox: Arc<SimulatedSandbox>,
    base_pass_rate: f64,
    max_gain: f64,
    max_loss: f64,
    latency: Duration,
}

impl SimulatedEvaluator {
    /// Evaluator reading trees from `sandbox`
    #[must_use]
    pub fn new(sandbox: Arc<SimulatedSandbox>, config: &SimulationConfig) -> Self {
        Self {
            sandbox,
            base_pass_rate: config.base_pass_rate,
            max_gain: config.max_gain,
            max_loss: config.max_loss,
            latency: config.eval_latency,
        }
    }

    /// Probability that `tree` passes `task`
    #[must_use]
    pub fn pass_probability(&self, tree: &SourceTree, task: &str) -> f64 {
        let shift: f64 = tree
            .patches
            .iter()
            .map(|patch| {
                let u = unit(&[&patch.digest().as_bytes()[..], task.as_bytes()]);
                u * (self.max_gain + self.max_loss) - self.max_loss
            })
            .sum();
        (self.base_pass_rate + shift).clamp(0.0, 1.0)
    }

    fn run_once(&self, tree: &SourceTree, tasks: &[String], run: u32) -> EvaluationResult {
        let fingerprint = tree.fingerprint();
        let per_task: BTreeMap<String, TaskOutcome> = tasks
            .iter()
            .map(|task| {
                let roll = unit(&[&fingerprint.as_bytes()[..], task.as_bytes(), &run.to_le_bytes()[..]]);
                let outcome = if roll < self.pass_probability(tree, task) {
                    TaskOutcome::Pass
                } else {
                    TaskOutcome::Fail
                };
                (task.clone(), outcome)
            })
            .collect();
        EvaluationResult::from_outcomes(per_task, self.latency)
    }
}

#[async_trait::async_trait]
impl EvaluatorAdapter for SimulatedEvaluator {
    async fn evaluate(
        &self,
        handle: SandboxHandle,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResult, AdapterError> {
        let tree = self
            .sandbox
            .tree(handle)
            .ok_or_else(|| AdapterError::Unavailable(format!("{handle} is not live")))?;

        let mut runs = Vec::with_capacity(request.run_count as usize);
        for run in 0..request.run_count.max(1) {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            runs.push(self.run_once(&tree, &request.tasks, run));
        }
        EvaluationResult::aggregate(&runs, request.aggregation)
            .ok_or_else(|| AdapterError::Other("evaluation produced no runs".to_string()))
    }
}

/// Seeded patch author producing a mix of source, test-only, empty and
/// conflicting patches
#[derive(Debug)]
pub struct SimulatedAuthor {
    rng: Mutex<StdRng>,
    empty_rate: f64,
    conflict_rate: f64,
    test_only_rate: f64,
}

impl SimulatedAuthor {
    /// Author seeded from `config.seed`
    #[must_use]
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            empty_rate: config.empty_rate,
            conflict_rate: config.conflict_rate,
            test_only_rate: config.test_only_rate,
        }
    }
}

#[async_trait::async_trait]
impl PatchAuthor for SimulatedAuthor {
    async fn diagnose(&self, parent: &Variant, failure_logs: &[String]) -> Result<String, AdapterError> {
        if failure_logs.is_empty() {
            return Ok(format!("{} passes every evaluated task", parent.id));
        }
        let shown: Vec<&str> = failure_logs.iter().take(3).map(String::as_str).collect();
        Ok(format!(
            "{} fails {} tasks, starting with {}",
            parent.id,
            failure_logs.len(),
            shown.join(", ")
        ))
    }

    async fn author_patch(&self, parent: &Variant, _diagnosis: &str) -> Result<Patch, AdapterError> {
        let (roll, salt): (f64, u64) = {
            let mut rng = self.rng.lock();
            (rng.gen(), rng.gen())
        };
        let file = format!("src/agent_{}.rs", salt % 8);

        let patch = if roll < self.empty_rate {
            Patch::empty()
        } else if roll < self.empty_rate + self.conflict_rate {
            Patch::new(source_diff(&file, &format!("{CONFLICT_MARKER} {salt:016x}")))
        } else if roll < self.empty_rate + self.conflict_rate + self.test_only_rate {
            Patch::new(source_diff(
                &format!("tests/test_agent_{}.py", salt % 4),
                &format!("# regression check {salt:016x}"),
            ))
        } else {
            Patch::new(source_diff(
                &file,
                &format!("// tuned from {} ({salt:016x})", parent.id),
            ))
        };
        Ok(patch)
    }
}

fn source_diff(path: &str, added: &str) -> String {
    format!("--- a/{path}\n+++ b/{path}\n@@ -1,0 +1,1 @@\n+{added}\n")
}

/// Uniform value in `[0, 1)` derived from the concatenated inputs
fn unit(parts: &[&[u8]]) -> f64 {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    #[allow(clippy::cast_precision_loss)]
    let value = (u64::from_le_bytes(word) >> 11) as f64 / (1u64 << 53) as f64;
    value
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EvalStage;
    use crate::patch::{inspect_patch, PatchInspection};
    use evo_archive::{AggregationPolicy, NewVariant, VariantStatus, VariantStore};

    fn request(tasks: usize, runs: u32) -> EvaluationRequest {
        EvaluationRequest {
            stage: EvalStage::Shallow,
            tasks: crate::config::numbered_tasks("task", tasks),
            run_count: runs,
            aggregation: AggregationPolicy::Majority,
        }
    }

    fn root_variant() -> Variant {
        let store = VariantStore::in_memory();
        let mut root = NewVariant::root();
        root.advance(VariantStatus::EvaluatingShallow).unwrap();
        root.advance(VariantStatus::Archived).unwrap();
        let id = store.commit(root).unwrap();
        store.get(id).unwrap()
    }

    #[test]
    fn rejects_rates_outside_unit_interval() {
        let config = SimulationConfig {
            empty_rate: 1.5,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SimulationConfig {
            empty_rate: 0.5,
            conflict_rate: 0.4,
            test_only_rate: 0.2,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn sandbox_tracks_live_handles() {
        let sandbox = SimulatedSandbox::new();
        let a = sandbox.provision(&SourceTree::baseline()).await.unwrap();
        let b = sandbox.provision(&SourceTree::baseline()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(sandbox.live_count(), 2);

        sandbox.teardown(a).await.unwrap();
        sandbox.teardown(a).await.unwrap();
        assert_eq!(sandbox.live_count(), 1);
        assert_eq!(sandbox.teardown_count(), 2);
    }

    #[tokio::test]
    async fn conflict_marker_fails_apply() {
        let sandbox = SimulatedSandbox::new();
        let handle = sandbox.provision(&SourceTree::baseline()).await.unwrap();

        let bad = Patch::new(source_diff("src/a.rs", CONFLICT_MARKER));
        assert!(matches!(
            sandbox.apply_patch(handle, &bad).await,
            Err(ApplyError::Conflict(_))
        ));

        let good = Patch::new(source_diff("src/a.rs", "// ok"));
        sandbox.apply_patch(handle, &good).await.unwrap();
        assert_eq!(sandbox.tree(handle).unwrap().patches, vec![good]);
    }

    #[tokio::test]
    async fn evaluation_is_deterministic_per_tree() {
        let config = SimulationConfig::default();
        let sandbox = Arc::new(SimulatedSandbox::new());
        let evaluator = SimulatedEvaluator::new(Arc::clone(&sandbox), &config);

        let a = sandbox.provision(&SourceTree::baseline()).await.unwrap();
        let b = sandbox.provision(&SourceTree::baseline()).await.unwrap();
        let first = evaluator.evaluate(a, &request(20, 3)).await.unwrap();
        let second = evaluator.evaluate(b, &request(20, 3)).await.unwrap();

        assert_eq!(first.per_task, second.per_task);
        assert_eq!(first.tasks_attempted, 20);
        assert_eq!(first.runs, 3);
        assert!((0.0..=1.0).contains(&first.score));
    }

    #[tokio::test]
    async fn unknown_handle_is_unavailable() {
        let config = SimulationConfig::default();
        let evaluator = SimulatedEvaluator::new(Arc::new(SimulatedSandbox::new()), &config);
        let err = evaluator
            .evaluate(SandboxHandle(99), &request(1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_)));
    }

    #[test]
    fn patches_shift_pass_probability_within_bounds() {
        let config = SimulationConfig::default();
        let evaluator = SimulatedEvaluator::new(Arc::new(SimulatedSandbox::new()), &config);
        let tree = SourceTree::baseline();
        assert!((evaluator.pass_probability(&tree, "task-000") - 0.2).abs() < 1e-12);

        let patched = tree.with_patch(&Patch::new(source_diff("src/a.rs", "// x")));
        let p = evaluator.pass_probability(&patched, "task-000");
        assert!((0.15..=0.35).contains(&p), "{p}");
    }

    #[tokio::test]
    async fn author_mix_follows_rates() {
        let parent = root_variant();
        let only_empty = SimulatedAuthor::new(&SimulationConfig {
            empty_rate: 1.0,
            conflict_rate: 0.0,
            test_only_rate: 0.0,
            ..SimulationConfig::default()
        });
        let patch = only_empty.author_patch(&parent, "").await.unwrap();
        assert!(patch.is_blank());

        let only_tests = SimulatedAuthor::new(&SimulationConfig {
            empty_rate: 0.0,
            conflict_rate: 0.0,
            test_only_rate: 1.0,
            ..SimulationConfig::default()
        });
        let patch = only_tests.author_patch(&parent, "").await.unwrap();
        assert!(matches!(inspect_patch(&patch), PatchInspection::OnlyTests { .. }));

        let only_source = SimulatedAuthor::new(&SimulationConfig {
            empty_rate: 0.0,
            conflict_rate: 0.0,
            test_only_rate: 0.0,
            ..SimulationConfig::default()
        });
        let patch = only_source.author_patch(&parent, "").await.unwrap();
        assert!(matches!(inspect_patch(&patch), PatchInspection::Valid { .. }));
    }

    #[tokio::test]
    async fn same_seed_same_patches() {
        let parent = root_variant();
        let config = SimulationConfig::default().with_seed(7);
        let a = SimulatedAuthor::new(&config);
        let b = SimulatedAuthor::new(&config);
        for _ in 0..10 {
            assert_eq!(
                a.author_patch(&parent, "").await.unwrap(),
                b.author_patch(&parent, "").await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn diagnosis_lists_failures() {
        let parent = root_variant();
        let author = SimulatedAuthor::new(&SimulationConfig::default());
        let logs = vec!["task-003".to_string(), "task-007".to_string()];
        let diagnosis = author.diagnose(&parent, &logs).await.unwrap();
        assert!(diagnosis.contains("fails 2 tasks"));
        assert!(diagnosis.contains("task-003"));
    }
}
