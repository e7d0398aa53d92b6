//! Offline improvement summary over committed variants
//!
//! Works from the persisted records alone, so it can be run against a
//! journal long after the scheduler has exited.

use evo_archive::{Variant, VariantId, VariantStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Per-generation statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    /// Generation index
    pub generation: u32,
    /// Committed attempts
    pub attempts: usize,
    /// Attempts whose patch applied (anything but `failed_compile`)
    pub compiled: usize,
    /// Attempts archived
    pub archived: usize,
    /// `compiled / attempts`
    pub compile_rate: f64,
    /// Mean final score of evaluated attempts
    pub avg_score: Option<f64>,
    /// Lowest final score
    pub min_score: Option<f64>,
    /// Highest final score
    pub max_score: Option<f64>,
}

/// Best archived variant and how it got there
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestVariant {
    /// Variant id
    pub id: VariantId,
    /// Final score
    pub score: f64,
    /// Generation it was created in
    pub generation: u32,
    /// Ids from the root to this variant
    pub lineage: Vec<VariantId>,
}

/// Run-wide improvement summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementSummary {
    /// Root score
    pub baseline_score: Option<f64>,
    /// Statistics per generation, ascending
    pub generations: Vec<GenerationSummary>,
    /// Non-root variants committed
    pub total_attempts: usize,
    /// Non-root variants whose patch applied
    pub total_compiled: usize,
    /// `total_compiled / total_attempts`
    pub compile_success_rate: f64,
    /// Best archived variant
    pub best: Option<BestVariant>,
    /// Tasks the best variant passes that the baseline fails
    pub newly_solved: Vec<String>,
    /// Best score minus baseline score
    pub net_improvement: Option<f64>,
}

impl ImprovementSummary {
    /// Summarize committed variants (any order)
    #[must_use]
    pub fn from_variants(variants: &[Variant]) -> Self {
        let by_id: HashMap<VariantId, &Variant> = variants.iter().map(|v| (v.id, v)).collect();
        let root = variants.iter().find(|v| v.is_root());
        let baseline_score = root.and_then(Variant::score);

        let mut grouped: BTreeMap<u32, Vec<&Variant>> = BTreeMap::new();
        for variant in variants.iter().filter(|v| !v.is_root()) {
            grouped.entry(variant.generation).or_default().push(variant);
        }
        let generations: Vec<GenerationSummary> = grouped
            .into_iter()
            .map(|(generation, members)| summarize_generation(generation, &members))
            .collect();

        let total_attempts: usize = generations.iter().map(|g| g.attempts).sum();
        let total_compiled: usize = generations.iter().map(|g| g.compiled).sum();

        let best = variants
            .iter()
            .filter(|v| v.is_archived())
            .filter_map(|v| v.score().map(|s| (v, s)))
            .fold(None::<(&Variant, f64)>, |best, (v, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((v, s)),
            })
            .map(|(v, score)| BestVariant {
                id: v.id,
                score,
                generation: v.generation,
                lineage: lineage(&by_id, v),
            });

        let newly_solved = match (root.and_then(Variant::final_result), &best) {
            (Some(baseline), Some(best)) => by_id
                .get(&best.id)
                .and_then(|v| v.final_result())
                .map(|result| {
                    result
                        .passed_tasks()
                        .filter(|task| {
                            baseline
                                .per_task
                                .get(*task)
                                .map_or(true, |o| !o.passed())
                        })
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let net_improvement = match (baseline_score, &best) {
            (Some(base), Some(best)) => Some(best.score - base),
            _ => None,
        };

        Self {
            baseline_score,
            generations,
            total_attempts,
            total_compiled,
            compile_success_rate: ratio(total_compiled, total_attempts),
            best,
            newly_solved,
            net_improvement,
        }
    }

    /// Human-readable report
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Improvement summary");
        let _ = writeln!(out, "  baseline score: {}", fmt_score(self.baseline_score));
        let _ = writeln!(
            out,
            "  attempts: {} (compiled {}, {:.1}%)",
            self.total_attempts,
            self.total_compiled,
            self.compile_success_rate * 100.0
        );
        for g in &self.generations {
            let _ = writeln!(
                out,
                "  gen {:>3}: attempts={} compiled={} archived={} avg={} min={} max={}",
                g.generation,
                g.attempts,
                g.compiled,
                g.archived,
                fmt_score(g.avg_score),
                fmt_score(g.min_score),
                fmt_score(g.max_score)
            );
        }
        match &self.best {
            Some(best) => {
                let path: Vec<String> = best.lineage.iter().map(ToString::to_string).collect();
                let _ = writeln!(
                    out,
                    "  best: {} (gen {}, score {:.4}) lineage {}",
                    best.id,
                    best.generation,
                    best.score,
                    path.join(" -> ")
                );
            }
            None => {
                let _ = writeln!(out, "  best: none");
            }
        }
        let _ = writeln!(out, "  newly solved tasks: {}", self.newly_solved.len());
        for task in &self.newly_solved {
            let _ = writeln!(out, "    {task}");
        }
        if let Some(delta) = self.net_improvement {
            let _ = writeln!(out, "  net improvement: {delta:+.4}");
        }
        out
    }

    /// JSON report
    ///
    /// # Errors
    /// Serialization failure.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn summarize_generation(generation: u32, members: &[&Variant]) -> GenerationSummary {
    let attempts = members.len();
    let compiled = members
        .iter()
        .filter(|v| v.status != VariantStatus::FailedCompile)
        .count();
    let archived = members.iter().filter(|v| v.is_archived()).count();
    let scores: Vec<f64> = members.iter().filter_map(|v| v.score()).collect();

    #[allow(clippy::cast_precision_loss)]
    let avg_score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

    GenerationSummary {
        generation,
        attempts,
        compiled,
        archived,
        compile_rate: ratio(compiled, attempts),
        avg_score,
        min_score: scores.iter().copied().reduce(f64::min),
        max_score: scores.iter().copied().reduce(f64::max),
    }
}

fn lineage(by_id: &HashMap<VariantId, &Variant>, tip: &Variant) -> Vec<VariantId> {
    let mut path = vec![tip.id];
    let mut current = tip;
    while let Some(parent) = current.parent_id.and_then(|p| by_id.get(&p).copied()) {
        if path.len() > by_id.len() {
            break;
        }
        path.push(parent.id);
        current = parent;
    }
    path.reverse();
    path
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn fmt_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.4}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evo_archive::{AttemptId, EvaluationResult, NewVariant, Patch, TaskOutcome, VariantStore};
    use std::time::Duration;

    fn result(passing: &[&str], failing: &[&str]) -> EvaluationResult {
        let per_task = passing
            .iter()
            .map(|t| ((*t).to_string(), TaskOutcome::Pass))
            .chain(failing.iter().map(|t| ((*t).to_string(), TaskOutcome::Fail)))
            .collect();
        EvaluationResult::from_outcomes(per_task, Duration::ZERO)
    }

    fn scored_child(parent: VariantId, generation: u32, eval: EvaluationResult, keep: bool) -> NewVariant {
        let mut v = NewVariant::child(parent, generation, AttemptId::new());
        v.patch = Patch::new("+++ b/src/agent.rs\n+x\n");
        v.advance(VariantStatus::EvaluatingShallow).unwrap();
        v.shallow_result = Some(eval);
        v.advance(if keep { VariantStatus::Archived } else { VariantStatus::Discarded })
            .unwrap();
        v
    }

    fn populated() -> Vec<Variant> {
        let store = VariantStore::in_memory();
        let mut root = NewVariant::root();
        root.advance(VariantStatus::EvaluatingShallow).unwrap();
        root.shallow_result = Some(result(&["a"], &["b", "c", "d"]));
        root.advance(VariantStatus::Archived).unwrap();
        let root = store.commit(root).unwrap();

        let good = store
            .commit(scored_child(root, 0, result(&["a", "b"], &["c", "d"]), true))
            .unwrap();
        let mut broken = NewVariant::child(root, 0, AttemptId::new());
        broken.advance(VariantStatus::FailedCompile).unwrap();
        store.commit(broken).unwrap();

        store
            .commit(scored_child(good, 1, result(&["a", "b", "c"], &["d"]), true))
            .unwrap();
        store
            .commit(scored_child(good, 1, result(&[], &["a", "b", "c", "d"]), false))
            .unwrap();
        store.all()
    }

    #[test]
    fn summary_tracks_compile_rate_and_best() {
        let summary = ImprovementSummary::from_variants(&populated());

        assert_eq!(summary.total_attempts, 4);
        assert_eq!(summary.total_compiled, 3);
        assert!((summary.compile_success_rate - 0.75).abs() < 1e-9);
        assert_eq!(summary.generations.len(), 2);
        assert_eq!(summary.generations[0].compiled, 1);
        assert_eq!(summary.generations[1].min_score, Some(0.0));

        let best = summary.best.as_ref().unwrap();
        assert_eq!(best.id, VariantId(3));
        assert_eq!(best.lineage, vec![VariantId(0), VariantId(1), VariantId(3)]);
        assert_eq!(summary.newly_solved, vec!["b".to_string(), "c".to_string()]);
        assert!((summary.net_improvement.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_input_summarizes_to_nothing() {
        let summary = ImprovementSummary::from_variants(&[]);
        assert_eq!(summary.total_attempts, 0);
        assert_eq!(summary.compile_success_rate, 0.0);
        assert!(summary.best.is_none());
        assert!(summary.net_improvement.is_none());
    }

    #[test]
    fn renders_text_and_json() {
        let summary = ImprovementSummary::from_variants(&populated());
        let text = summary.render_text();
        assert!(text.contains("baseline score: 0.2500"));
        assert!(text.contains("v0 -> v1 -> v3"));
        let json = summary.to_json().unwrap();
        let back: ImprovementSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_attempts, 4);
    }
}
