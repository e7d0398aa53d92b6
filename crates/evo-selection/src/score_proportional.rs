//! Score-proportional selection
//!
//! Each candidate's weight is its final score, floored at a small positive
//! value so that a zero-scoring variant stays reachable.

use crate::error::SelectionError;
use crate::policy::{ensure_non_empty, SelectionPolicy};
use evo_archive::{Candidate, VariantId};
use rand::distributions::{Distribution, WeightedIndex};
use rand::RngCore;

/// Default weight floor
pub const DEFAULT_FLOOR: f64 = 0.01;

/// Sampling with probability proportional to score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreProportional {
    floor: f64,
}

impl ScoreProportional {
    /// Create policy with the given weight floor
    ///
    /// # Errors
    /// `InvalidParameter` unless `floor` is finite and strictly positive.
    pub fn new(floor: f64) -> Result<Self, SelectionError> {
        if floor.is_finite() && floor > 0.0 {
            Ok(Self { floor })
        } else {
            Err(SelectionError::InvalidParameter {
                name: "floor",
                value: floor,
            })
        }
    }

    /// Configured floor
    #[inline]
    #[must_use]
    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Sampling weight of one candidate; always at least the floor
    #[inline]
    #[must_use]
    pub fn weight(&self, candidate: &Candidate) -> f64 {
        if candidate.score.is_finite() {
            candidate.score.max(self.floor)
        } else {
            self.floor
        }
    }

    /// Normalised sampling probabilities, in pool order
    #[must_use]
    pub fn probabilities(&self, pool: &[Candidate]) -> Vec<f64> {
        let weights: Vec<f64> = pool.iter().map(|c| self.weight(c)).collect();
        let total: f64 = weights.iter().sum();
        weights.into_iter().map(|w| w / total).collect()
    }

    pub(crate) fn distribution(&self, pool: &[Candidate]) -> Result<WeightedIndex<f64>, SelectionError> {
        WeightedIndex::new(pool.iter().map(|c| self.weight(c)))
            .map_err(|e| SelectionError::InvalidWeights(e.to_string()))
    }
}

impl Default for ScoreProportional {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
        }
    }
}

impl SelectionPolicy for ScoreProportional {
    fn select(
        &self,
        pool: &[Candidate],
        k: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<VariantId>, SelectionError> {
        ensure_non_empty(pool)?;
        let dist = self.distribution(pool)?;
        Ok((0..k).map(|_| pool[dist.sample(rng)].id).collect())
    }

    fn name(&self) -> &'static str {
        "score_proportional"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate(id: u64, score: f64) -> Candidate {
        Candidate {
            id: VariantId(id),
            score,
            children: 0,
        }
    }

    #[test]
    fn rejects_non_positive_floor() {
        assert!(ScoreProportional::new(0.0).is_err());
        assert!(ScoreProportional::new(-1.0).is_err());
        assert!(ScoreProportional::new(f64::NAN).is_err());
        assert!(ScoreProportional::new(0.05).is_ok());
    }

    #[test]
    fn zero_score_keeps_floor_weight() {
        let policy = ScoreProportional::new(0.01).unwrap();
        assert!((policy.weight(&candidate(0, 0.0)) - 0.01).abs() < f64::EPSILON);
        assert!((policy.weight(&candidate(0, f64::NAN)) - 0.01).abs() < f64::EPSILON);
        assert!((policy.weight(&candidate(0, 0.7)) - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn all_zero_pool_is_still_sampleable() {
        let policy = ScoreProportional::default();
        let pool = [candidate(0, 0.0), candidate(1, 0.0)];
        let mut rng = StdRng::seed_from_u64(3);
        let picks = policy.select(&pool, 50, &mut rng).unwrap();
        assert!(picks.contains(&VariantId(0)));
        assert!(picks.contains(&VariantId(1)));
    }

    #[test]
    fn higher_score_drawn_more_often() {
        let policy = ScoreProportional::default();
        let pool = [candidate(0, 0.1), candidate(1, 0.9)];
        let mut rng = StdRng::seed_from_u64(11);
        let picks = policy.select(&pool, 2000, &mut rng).unwrap();
        let high = picks.iter().filter(|id| **id == VariantId(1)).count();
        assert!(high > 1500, "high scorer drawn {high} times");
    }

    #[test]
    fn probabilities_sum_to_one() {
        let policy = ScoreProportional::default();
        let probs = policy.probabilities(&[candidate(0, 0.2), candidate(1, 0.25), candidate(2, 0.0)]);
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
