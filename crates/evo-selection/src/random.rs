//! Uniform selection

use crate::error::SelectionError;
use crate::policy::{ensure_non_empty, SelectionPolicy};
use evo_archive::{Candidate, VariantId};
use rand::{Rng, RngCore};

/// Uniform sampling with replacement
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelection;

impl RandomSelection {
    /// Create policy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SelectionPolicy for RandomSelection {
    fn select(
        &self,
        pool: &[Candidate],
        k: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<VariantId>, SelectionError> {
        ensure_non_empty(pool)?;
        Ok((0..k).map(|_| pool[rng.gen_range(0..pool.len())].id).collect())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool(n: u64) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate {
                id: VariantId(i),
                score: 0.0,
                children: 0,
            })
            .collect()
    }

    #[test]
    fn returns_exactly_k_from_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        let picks = RandomSelection::new().select(&pool(3), 10, &mut rng).unwrap();
        assert_eq!(picks.len(), 10);
        assert!(picks.iter().all(|id| id.get() < 3));
    }

    #[test]
    fn empty_pool_fails() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = RandomSelection::new().select(&[], 2, &mut rng).unwrap_err();
        assert_eq!(err, SelectionError::EmptyPool);
    }

    #[test]
    fn covers_whole_pool_eventually() {
        let mut rng = StdRng::seed_from_u64(9);
        let picks = RandomSelection::new().select(&pool(4), 200, &mut rng).unwrap();
        for i in 0..4 {
            assert!(picks.contains(&VariantId(i)));
        }
    }
}
