use evo_archive::{Candidate, VariantId};
use evo_selection::{
    ExplorationBalanced, RandomSelection, ScoreProportional, SelectionConfig, SelectionError,
    SelectionPolicy,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn pool_strategy() -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec((0.0f64..=1.0, 0usize..6), 1..12).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (score, children))| Candidate {
                id: VariantId(i as u64),
                score,
                children,
            })
            .collect()
    })
}

fn policies() -> Vec<Box<dyn SelectionPolicy>> {
    vec![
        Box::new(RandomSelection::new()),
        Box::new(ScoreProportional::default()),
        Box::new(ExplorationBalanced::default()),
    ]
}

proptest! {
    #[test]
    fn prop_same_seed_same_selection(pool in pool_strategy(), seed in any::<u64>(), k in 0usize..16) {
        for policy in policies() {
            let a = policy.select(&pool, k, &mut StdRng::seed_from_u64(seed)).unwrap();
            let b = policy.select(&pool, k, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(&a, &b, "{} is not deterministic", policy.name());
        }
    }

    #[test]
    fn prop_selection_stays_inside_pool(pool in pool_strategy(), seed in any::<u64>(), k in 0usize..16) {
        for policy in policies() {
            let picks = policy.select(&pool, k, &mut StdRng::seed_from_u64(seed)).unwrap();
            prop_assert_eq!(picks.len(), k);
            for id in picks {
                prop_assert!(pool.iter().any(|c| c.id == id));
            }
        }
    }

    #[test]
    fn prop_every_candidate_has_positive_weight(pool in pool_strategy(), floor in 0.001f64..0.5) {
        let policy = ScoreProportional::new(floor).unwrap();
        for p in policy.probabilities(&pool) {
            prop_assert!(p > 0.0);
        }
    }
}

#[test]
fn empty_pool_fails_for_every_strategy() {
    for policy in policies() {
        let err = policy
            .select(&[], 3, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert_eq!(err, SelectionError::EmptyPool);
        assert!(err.is_fatal());
    }
}

#[test]
fn improved_child_outweighs_root_without_starving_it() {
    let root = Candidate {
        id: VariantId(0),
        score: 0.20,
        children: 1,
    };
    let child = Candidate {
        id: VariantId(1),
        score: 0.25,
        children: 0,
    };
    let policy = ScoreProportional::new(0.01).unwrap();

    assert!(policy.weight(&child) > policy.weight(&root));
    assert!(policy.weight(&root) > 0.0);

    let probs = policy.probabilities(&[root, child]);
    assert!(probs[1] > probs[0]);
    assert!(probs[0] > 0.0);
}

#[test]
fn config_round_trips_through_build() {
    let config = SelectionConfig::ExplorationBalanced {
        p_explore: 0.3,
        floor: 0.02,
    };
    let policy = config.build().unwrap();
    assert_eq!(policy.name(), "exploration_balanced");
}
