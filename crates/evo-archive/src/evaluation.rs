//! Benchmark evaluation results
//!
//! An [`EvaluationResult`] is what the evaluator adapter reports for one
//! stage (shallow or deep). Multi-run evaluations are folded together with
//! [`EvaluationResult::aggregate`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of a single benchmark task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Task resolved
    Pass,
    /// Task not resolved
    Fail,
}

impl TaskOutcome {
    /// Whether the task passed
    #[inline]
    #[must_use]
    pub fn passed(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// How per-task outcomes of several runs are merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Pass if strictly more than half of the runs passed
    #[default]
    Majority,
    /// Pass only if every run passed
    AllPass,
}

/// Result of evaluating one variant on one task subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Number of distinct tasks evaluated
    pub tasks_attempted: usize,
    /// Number of tasks that passed
    pub tasks_passed: usize,
    /// Aggregate score in `[0, 1]`
    pub score: f64,
    /// Outcome per task id
    pub per_task: BTreeMap<String, TaskOutcome>,
    /// Wall-clock time spent evaluating
    pub duration: Duration,
    /// Number of independent runs folded into this result
    #[serde(default = "one")]
    pub runs: u32,
}

fn one() -> u32 {
    1
}

impl EvaluationResult {
    /// Build a single-run result; score is the pass ratio
    #[must_use]
    pub fn from_outcomes(per_task: BTreeMap<String, TaskOutcome>, duration: Duration) -> Self {
        let tasks_attempted = per_task.len();
        let tasks_passed = per_task.values().filter(|o| o.passed()).count();
        Self {
            tasks_attempted,
            tasks_passed,
            score: pass_ratio(tasks_passed, tasks_attempted),
            per_task,
            duration,
            runs: 1,
        }
    }

    /// Fold several runs of the same subset into one result
    ///
    /// The score is the mean of the run scores; per-task outcomes follow
    /// `policy`. Returns `None` when `runs` is empty.
    #[must_use]
    pub fn aggregate(runs: &[EvaluationResult], policy: AggregationPolicy) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        if runs.len() == 1 {
            return Some(runs[0].clone());
        }

        let mut tallies: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for run in runs {
            for (task, outcome) in &run.per_task {
                let entry = tallies.entry(task.as_str()).or_insert((0, 0));
                entry.1 += 1;
                if outcome.passed() {
                    entry.0 += 1;
                }
            }
        }

        let per_task: BTreeMap<String, TaskOutcome> = tallies
            .into_iter()
            .map(|(task, (passes, seen))| {
                let pass = match policy {
                    AggregationPolicy::Majority => passes * 2 > seen,
                    AggregationPolicy::AllPass => passes == seen,
                };
                let outcome = if pass { TaskOutcome::Pass } else { TaskOutcome::Fail };
                (task.to_string(), outcome)
            })
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let mean = runs.iter().map(|r| r.score).sum::<f64>() / runs.len() as f64;
        let tasks_passed = per_task.values().filter(|o| o.passed()).count();

        Some(Self {
            tasks_attempted: per_task.len(),
            tasks_passed,
            score: mean.clamp(0.0, 1.0),
            per_task,
            duration: runs.iter().map(|r| r.duration).sum(),
            runs: runs.iter().map(|r| r.runs).sum(),
        })
    }

    /// Ids of tasks that failed
    pub fn failed_tasks(&self) -> impl Iterator<Item = &str> {
        self.per_task
            .iter()
            .filter(|(_, o)| !o.passed())
            .map(|(t, _)| t.as_str())
    }

    /// Ids of tasks that passed
    pub fn passed_tasks(&self) -> impl Iterator<Item = &str> {
        self.per_task
            .iter()
            .filter(|(_, o)| o.passed())
            .map(|(t, _)| t.as_str())
    }
}

#[allow(clippy::cast_precision_loss)]
fn pass_ratio(passed: usize, attempted: usize) -> f64 {
    if attempted == 0 {
        0.0
    } else {
        passed as f64 / attempted as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcomes: &[(&str, TaskOutcome)]) -> EvaluationResult {
        EvaluationResult::from_outcomes(
            outcomes.iter().map(|(t, o)| ((*t).to_string(), *o)).collect(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn from_outcomes_scores_pass_ratio() {
        let r = result(&[
            ("a", TaskOutcome::Pass),
            ("b", TaskOutcome::Fail),
            ("c", TaskOutcome::Pass),
            ("d", TaskOutcome::Fail),
        ]);
        assert_eq!(r.tasks_attempted, 4);
        assert_eq!(r.tasks_passed, 2);
        assert!((r.score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_result_scores_zero() {
        let r = result(&[]);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn aggregate_majority_and_mean() {
        let runs = vec![
            result(&[("a", TaskOutcome::Pass), ("b", TaskOutcome::Fail)]),
            result(&[("a", TaskOutcome::Pass), ("b", TaskOutcome::Pass)]),
            result(&[("a", TaskOutcome::Fail), ("b", TaskOutcome::Fail)]),
        ];
        let agg = EvaluationResult::aggregate(&runs, AggregationPolicy::Majority).unwrap();
        assert_eq!(agg.per_task["a"], TaskOutcome::Pass);
        assert_eq!(agg.per_task["b"], TaskOutcome::Fail);
        assert_eq!(agg.runs, 3);
        assert!((agg.score - 0.5).abs() < 1e-9);
        assert_eq!(agg.duration, Duration::from_millis(30));
    }

    #[test]
    fn aggregate_all_pass_is_stricter() {
        let runs = vec![
            result(&[("a", TaskOutcome::Pass)]),
            result(&[("a", TaskOutcome::Pass)]),
            result(&[("a", TaskOutcome::Fail)]),
        ];
        let majority = EvaluationResult::aggregate(&runs, AggregationPolicy::Majority).unwrap();
        let all = EvaluationResult::aggregate(&runs, AggregationPolicy::AllPass).unwrap();
        assert_eq!(majority.per_task["a"], TaskOutcome::Pass);
        assert_eq!(all.per_task["a"], TaskOutcome::Fail);
    }

    #[test]
    fn aggregate_empty_is_none() {
        assert!(EvaluationResult::aggregate(&[], AggregationPolicy::Majority).is_none());
    }

    #[test]
    fn failed_tasks_listed() {
        let r = result(&[("a", TaskOutcome::Pass), ("b", TaskOutcome::Fail)]);
        assert_eq!(r.failed_tasks().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(r.passed_tasks().collect::<Vec<_>>(), vec!["a"]);
    }
}
