//! Run configuration
//!
//! Everything the scheduler needs to know about a run: generation count,
//! attempts per generation (K), worker concurrency (W), the selection policy,
//! the evaluation tiers, the archive rule and every time bound. Loaded from
//! TOML; every section has defaults.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use evo_archive::AggregationPolicy;
use evo_selection::SelectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Slack applied to score comparisons so that equal scores compare equal
pub const SCORE_EPSILON: f64 = 1e-9;

/// Complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of generations to run
    pub generations: u32,
    /// Attempts launched per generation (K)
    pub attempts_per_generation: usize,
    /// Concurrent attempts (W)
    pub workers: usize,
    /// Seed for parent selection
    pub seed: u64,
    /// Parent selection strategy
    pub selection: SelectionConfig,
    /// Evaluation tiers
    pub evaluation: EvaluationConfig,
    /// When a scored child is kept
    pub archive_rule: ArchiveRule,
    /// Time bounds
    pub timeouts: TimeoutConfig,
    /// Infrastructure retry for sandbox provisioning
    pub provision_retry: RetryPolicy,
    /// Which authored patches are worth evaluating
    pub patch_policy: PatchPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            generations: 10,
            attempts_per_generation: 4,
            workers: 2,
            seed: 0,
            selection: SelectionConfig::default(),
            evaluation: EvaluationConfig::default(),
            archive_rule: ArchiveRule::default(),
            timeouts: TimeoutConfig::default(),
            provision_retry: RetryPolicy::default(),
            patch_policy: PatchPolicy::default(),
        }
    }
}

impl RunConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// `Parse` for malformed TOML, `Invalid`/`Selection` for bad values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate
    ///
    /// # Errors
    /// `Io` if the file cannot be read, otherwise as [`RunConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With generation count
    #[inline]
    #[must_use]
    pub fn with_generations(mut self, generations: u32) -> Self {
        self.generations = generations;
        self
    }

    /// With attempts per generation
    #[inline]
    #[must_use]
    pub fn with_attempts(mut self, k: usize) -> Self {
        self.attempts_per_generation = k;
        self
    }

    /// With worker concurrency
    #[inline]
    #[must_use]
    pub fn with_workers(mut self, w: usize) -> Self {
        self.workers = w;
        self
    }

    /// With selection seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// With selection strategy
    #[inline]
    #[must_use]
    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    /// With evaluation tiers
    #[inline]
    #[must_use]
    pub fn with_evaluation(mut self, evaluation: EvaluationConfig) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// With archive rule
    #[inline]
    #[must_use]
    pub fn with_archive_rule(mut self, rule: ArchiveRule) -> Self {
        self.archive_rule = rule;
        self
    }

    /// With time bounds
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With provisioning retry policy
    #[inline]
    #[must_use]
    pub fn with_provision_retry(mut self, retry: RetryPolicy) -> Self {
        self.provision_retry = retry;
        self
    }

    /// With patch policy
    #[inline]
    #[must_use]
    pub fn with_patch_policy(mut self, policy: PatchPolicy) -> Self {
        self.patch_policy = policy;
        self
    }

    /// Reject configurations the scheduler cannot run
    ///
    /// # Errors
    /// The first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts_per_generation == 0 {
            return Err(ConfigError::invalid("attempts_per_generation", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        self.selection.validate()?;
        self.evaluation.validate()?;
        self.archive_rule.validate()?;
        self.timeouts.validate()?;
        if self.provision_retry.max_attempts == 0 {
            return Err(ConfigError::invalid("provision_retry.max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// When deep evaluation runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Never run the full suite
    ShallowOnly,
    /// Always run the full suite after the shallow subset
    AlwaysDeep,
    /// Run the full suite when the shallow score is within `tolerance` of the parent's
    Threshold {
        /// Allowed shortfall below the parent's score
        #[serde(default)]
        tolerance: f64,
    },
}

impl Default for EvaluationMode {
    fn default() -> Self {
        Self::Threshold { tolerance: 0.0 }
    }
}

impl EvaluationMode {
    /// Whether a child with `shallow` score goes on to deep evaluation
    #[must_use]
    pub fn promotes(&self, shallow: f64, parent: f64) -> bool {
        match *self {
            Self::ShallowOnly => false,
            Self::AlwaysDeep => true,
            Self::Threshold { tolerance } => shallow + SCORE_EPSILON >= parent - tolerance,
        }
    }
}

/// Task subsets and run counts for each evaluation tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Promotion mode
    pub mode: EvaluationMode,
    /// Fast subset
    pub shallow_tasks: Vec<String>,
    /// Full suite
    pub deep_tasks: Vec<String>,
    /// Independent runs of the shallow subset
    pub shallow_runs: u32,
    /// Independent runs of the full suite
    pub deep_runs: u32,
    /// How per-task outcomes of several runs are merged
    pub aggregation: AggregationPolicy,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        let deep_tasks = numbered_tasks("task", 50);
        Self {
            mode: EvaluationMode::default(),
            shallow_tasks: deep_tasks.iter().take(10).cloned().collect(),
            deep_tasks,
            shallow_runs: 1,
            deep_runs: 1,
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl EvaluationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.shallow_tasks.is_empty() {
            return Err(ConfigError::invalid("evaluation.shallow_tasks", "must not be empty"));
        }
        if self.mode != EvaluationMode::ShallowOnly && self.deep_tasks.is_empty() {
            return Err(ConfigError::invalid(
                "evaluation.deep_tasks",
                "must not be empty unless mode is shallow_only",
            ));
        }
        if self.shallow_runs == 0 {
            return Err(ConfigError::invalid("evaluation.shallow_runs", "must be at least 1"));
        }
        if self.deep_runs == 0 {
            return Err(ConfigError::invalid("evaluation.deep_runs", "must be at least 1"));
        }
        if let EvaluationMode::Threshold { tolerance } = self.mode {
            if !tolerance.is_finite() || tolerance < 0.0 {
                return Err(ConfigError::invalid(
                    "evaluation.mode.tolerance",
                    format!("must be a non-negative number, got {tolerance}"),
                ));
            }
        }
        Ok(())
    }
}

/// `prefix-000`, `prefix-001`, ...
#[must_use]
pub fn numbered_tasks(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
}

/// Archive decision for a scored child
///
/// A child is archived when `score - parent_score >= margin` (or `>` when
/// `strict`). The default margin of 0 archives ties.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveRule {
    /// Required improvement over the parent
    pub margin: f64,
    /// Require strictly more than `margin`
    pub strict: bool,
}

impl Default for ArchiveRule {
    fn default() -> Self {
        Self {
            margin: 0.0,
            strict: false,
        }
    }
}

impl ArchiveRule {
    /// Ties archived, no margin
    #[inline]
    #[must_use]
    pub fn ties_archived() -> Self {
        Self::default()
    }

    /// Only strict improvements archived
    #[inline]
    #[must_use]
    pub fn strict_improvement() -> Self {
        Self {
            margin: 0.0,
            strict: true,
        }
    }

    /// Whether a child scoring `score` is kept against `parent_score`
    #[must_use]
    pub fn accepts(&self, score: f64, parent_score: f64) -> bool {
        let delta = score - parent_score;
        if self.strict {
            delta > self.margin + SCORE_EPSILON
        } else {
            delta + SCORE_EPSILON >= self.margin
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.margin.is_finite() {
            Ok(())
        } else {
            Err(ConfigError::invalid("archive_rule.margin", "must be finite"))
        }
    }
}

/// Time bounds, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on any single adapter call
    pub adapter_call: u64,
    /// Bound on one attempt, queue time excluded
    pub attempt: u64,
    /// Bound on a whole generation
    pub generation: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            adapter_call: 10 * 60 * 1000,
            attempt: 30 * 60 * 1000,
            generation: 2 * 60 * 60 * 1000,
        }
    }
}

impl TimeoutConfig {
    /// Build from durations
    #[must_use]
    pub fn from_durations(adapter_call: Duration, attempt: Duration, generation: Duration) -> Self {
        let ms = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            adapter_call: ms(adapter_call),
            attempt: ms(attempt),
            generation: ms(generation),
        }
    }

    /// Adapter call bound
    #[inline]
    #[must_use]
    pub fn adapter_call_duration(&self) -> Duration {
        Duration::from_millis(self.adapter_call)
    }

    /// Attempt bound
    #[inline]
    #[must_use]
    pub fn attempt_duration(&self) -> Duration {
        Duration::from_millis(self.attempt)
    }

    /// Generation bound
    #[inline]
    #[must_use]
    pub fn generation_duration(&self) -> Duration {
        Duration::from_millis(self.generation)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.adapter_call == 0 {
            return Err(ConfigError::invalid("timeouts.adapter_call", "must be positive"));
        }
        if self.attempt == 0 {
            return Err(ConfigError::invalid("timeouts.attempt", "must be positive"));
        }
        if self.generation == 0 {
            return Err(ConfigError::invalid("timeouts.generation", "must be positive"));
        }
        Ok(())
    }
}

/// Which authored patches are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchPolicy {
    /// Treat patches that only touch test files as no-ops
    pub reject_test_only: bool,
}

impl Default for PatchPolicy {
    fn default() -> Self {
        Self {
            reject_test_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let err = RunConfig::new().with_workers(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "workers", .. }));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = RunConfig::new().with_attempts(0).validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "attempts_per_generation",
                ..
            }
        ));
    }

    #[test]
    fn bad_selection_rejected() {
        let config = RunConfig::new().with_selection(SelectionConfig::ExplorationBalanced {
            p_explore: 2.0,
            floor: 0.01,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Selection(_))));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = RunConfig::new();
        config.timeouts.generation = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = RunConfig::from_toml_str(
            r#"
            generations = 3
            attempts_per_generation = 5
            workers = 2
            seed = 7

            [selection]
            strategy = "score_proportional"
            floor = 0.05

            [evaluation]
            shallow_tasks = ["a", "b"]
            deep_tasks = ["a", "b", "c"]
            deep_runs = 3
            aggregation = "all_pass"
            mode = { kind = "threshold", tolerance = 0.1 }

            [archive_rule]
            strict = true

            [timeouts]
            generation = 60000
            "#,
        )
        .unwrap();

        assert_eq!(config.generations, 3);
        assert_eq!(config.attempts_per_generation, 5);
        assert_eq!(config.selection, SelectionConfig::ScoreProportional { floor: 0.05 });
        assert_eq!(config.evaluation.deep_runs, 3);
        assert_eq!(config.evaluation.shallow_runs, 1);
        assert_eq!(config.evaluation.aggregation, AggregationPolicy::AllPass);
        assert_eq!(config.evaluation.mode, EvaluationMode::Threshold { tolerance: 0.1 });
        assert!(config.archive_rule.strict);
        assert_eq!(config.timeouts.generation_duration(), Duration::from_secs(60));
        assert_eq!(config.timeouts.attempt, TimeoutConfig::default().attempt);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            RunConfig::from_toml_str("generations = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn archive_rule_ties() {
        assert!(ArchiveRule::ties_archived().accepts(0.2, 0.2));
        assert!(!ArchiveRule::strict_improvement().accepts(0.2, 0.2));
        assert!(ArchiveRule::strict_improvement().accepts(0.25, 0.2));
        assert!(!ArchiveRule::ties_archived().accepts(0.15, 0.2));

        let margin = ArchiveRule {
            margin: 0.05,
            strict: false,
        };
        assert!(margin.accepts(0.25, 0.2));
        assert!(!margin.accepts(0.24, 0.2));
    }

    #[test]
    fn promotion_modes() {
        assert!(!EvaluationMode::ShallowOnly.promotes(1.0, 0.0));
        assert!(EvaluationMode::AlwaysDeep.promotes(0.0, 1.0));
        let threshold = EvaluationMode::Threshold { tolerance: 0.1 };
        assert!(threshold.promotes(0.45, 0.5));
        assert!(!threshold.promotes(0.35, 0.5));
        assert!(EvaluationMode::default().promotes(0.5, 0.5));
    }
}
