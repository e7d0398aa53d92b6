//! Exploration-balanced selection
//!
//! Each draw explores with probability `p_explore`: it picks uniformly among
//! the candidates with the fewest children. Otherwise it exploits through
//! score-proportional sampling. Child counts are those of the pool snapshot,
//! not updated between draws.

use crate::error::SelectionError;
use crate::policy::{ensure_non_empty, SelectionPolicy};
use crate::score_proportional::{ScoreProportional, DEFAULT_FLOOR};
use evo_archive::{Candidate, VariantId};
use rand::distributions::Distribution;
use rand::{Rng, RngCore};

/// Default exploration probability
pub const DEFAULT_P_EXPLORE: f64 = 0.2;

/// Mixture of least-explored and score-proportional sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplorationBalanced {
    p_explore: f64,
    exploit: ScoreProportional,
}

impl ExplorationBalanced {
    /// Create policy
    ///
    /// # Errors
    /// `InvalidParameter` if `p_explore` is outside `[0, 1]` or `floor` is not
    /// strictly positive.
    pub fn new(p_explore: f64, floor: f64) -> Result<Self, SelectionError> {
        if !(0.0..=1.0).contains(&p_explore) {
            return Err(SelectionError::InvalidParameter {
                name: "p_explore",
                value: p_explore,
            });
        }
        Ok(Self {
            p_explore,
            exploit: ScoreProportional::new(floor)?,
        })
    }

    /// Configured exploration probability
    #[inline]
    #[must_use]
    pub fn p_explore(&self) -> f64 {
        self.p_explore
    }

    /// Indices of the candidates with the fewest children
    fn least_explored(pool: &[Candidate]) -> Vec<usize> {
        let fewest = pool.iter().map(|c| c.children).min().unwrap_or(0);
        pool.iter()
            .enumerate()
            .filter(|(_, c)| c.children == fewest)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Default for ExplorationBalanced {
    fn default() -> Self {
        Self {
            p_explore: DEFAULT_P_EXPLORE,
            exploit: ScoreProportional::default(),
        }
    }
}

impl SelectionPolicy for ExplorationBalanced {
    fn select(
        &self,
        pool: &[Candidate],
        k: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<VariantId>, SelectionError> {
        ensure_non_empty(pool)?;
        let exploit = self.exploit.distribution(pool)?;
        let explore = Self::least_explored(pool);

        let mut picks = Vec::with_capacity(k);
        for _ in 0..k {
            let index = if rng.gen_bool(self.p_explore) {
                explore[rng.gen_range(0..explore.len())]
            } else {
                exploit.sample(rng)
            };
            picks.push(pool[index].id);
        }
        Ok(picks)
    }

    fn name(&self) -> &'static str {
        "exploration_balanced"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate(id: u64, score: f64, children: usize) -> Candidate {
        Candidate {
            id: VariantId(id),
            score,
            children,
        }
    }

    #[test]
    fn rejects_bad_probability() {
        assert!(ExplorationBalanced::new(1.5, DEFAULT_FLOOR).is_err());
        assert!(ExplorationBalanced::new(-0.1, DEFAULT_FLOOR).is_err());
        assert!(ExplorationBalanced::new(f64::NAN, DEFAULT_FLOOR).is_err());
        assert!(ExplorationBalanced::new(0.5, 0.0).is_err());
    }

    #[test]
    fn full_exploration_only_picks_least_explored() {
        let policy = ExplorationBalanced::new(1.0, DEFAULT_FLOOR).unwrap();
        let pool = [
            candidate(0, 0.9, 5),
            candidate(1, 0.1, 0),
            candidate(2, 0.8, 3),
            candidate(3, 0.0, 0),
        ];
        let mut rng = StdRng::seed_from_u64(5);
        let picks = policy.select(&pool, 100, &mut rng).unwrap();
        assert!(picks.iter().all(|id| *id == VariantId(1) || *id == VariantId(3)));
        assert!(picks.contains(&VariantId(1)));
        assert!(picks.contains(&VariantId(3)));
    }

    #[test]
    fn same_seed_same_picks() {
        let pool = [candidate(0, 0.2, 4), candidate(1, 0.6, 0), candidate(2, 0.4, 1)];
        let policy = ExplorationBalanced::default();
        let a = policy.select(&pool, 30, &mut StdRng::seed_from_u64(8)).unwrap();
        let b = policy.select(&pool, 30, &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
    }
}
