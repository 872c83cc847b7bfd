use super::{fill, linspace, midpoint, uniform, Metric, SamplingError, SamplingStrategy};
use crate::parameters::ParameterSpace;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn square() -> ParameterSpace {
    ParameterSpace::new([("x", [-10.0, 10.0]), ("y", [-10.0, 10.0])]).unwrap()
}

#[test]
fn midpoint_is_center() {
    let space = ParameterSpace::new([("a", [0.0, 4.0]), ("b", [-3.0, 1.0])]).unwrap();

    assert_eq!(midpoint(&space), vec![2.0, -1.0]);
}

#[test]
fn linspace_places_bin_centers() {
    let space = ParameterSpace::new([("a", [0.0, 10.0]), ("b", [-1.0, 1.0])]).unwrap();

    let close = |a: &[f64], b: &[f64]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-12);

    assert!(close(&linspace(&space, 0, 5).unwrap(), &[1.0, -0.8]));
    assert!(close(&linspace(&space, 4, 5).unwrap(), &[9.0, 0.8]));
}

#[test]
fn linspace_is_deterministic_and_injective() {
    let space = square();
    let steps = 7;

    let first = (0..steps)
        .map(|step| linspace(&space, step, steps).unwrap())
        .collect::<Vec<_>>();
    let second = (0..steps)
        .map(|step| linspace(&space, step, steps).unwrap())
        .collect::<Vec<_>>();

    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    for window in first.windows(2) {
        assert!(window[0][0] < window[1][0]);
    }
}

#[test]
fn linspace_rejects_invalid_steps() {
    assert_eq!(linspace(&square(), 0, 0), Err(SamplingError::NoSteps));
    assert_eq!(
        linspace(&square(), 3, 3),
        Err(SamplingError::StepOutOfRange { step: 3, steps: 3 })
    );
}

#[test]
fn linspace_strategy_uses_ordinal() {
    let strategy = SamplingStrategy::Linspace {
        steps: 4,
        step: None,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let fifth = strategy.sample(&square(), 5, &[], &mut rng).unwrap();
    assert_eq!(fifth, linspace(&square(), 1, 4).unwrap());
}

#[test]
fn uniform_stays_in_bounds() {
    let space = ParameterSpace::new([("x", [-1.0, 1.0]), ("fixed", [3.0, 3.0])]).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    for _ in 0..1000 {
        let point = uniform(&space, &mut rng);
        assert!(space.contains(&point));
        assert_eq!(point[1], 3.0);
    }
}

#[test]
fn tolerance_without_history_is_uniform() {
    let strategy = SamplingStrategy::Tolerance {
        iteration_switch: 0,
        metric: Metric::Euclidean,
        candidates: 16,
    };
    let mut a = ChaCha8Rng::seed_from_u64(3);
    let mut b = ChaCha8Rng::seed_from_u64(3);

    let sampled = strategy.sample(&square(), 0, &[], &mut a).unwrap();

    assert_eq!(sampled, uniform(&square(), &mut b));
    assert!(square().contains(&sampled));
}

#[test]
fn tolerance_moves_away_from_history() {
    let space = ParameterSpace::new([("x", [-1.0, 1.0]), ("y", [-1.0, 1.0])]).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let history = vec![vec![0.0, 0.0]];

    let point = fill::fill_point(&space, &history, Metric::Euclidean, 32, &mut rng);

    assert!(space.contains(&point));
    let distance = fill::min_distance(&space, Metric::Euclidean, &history, &point);
    assert!((distance - 2f64.sqrt()).abs() < 1e-9);
}

#[test]
fn switch_only_applies_after_threshold() {
    let strategy = SamplingStrategy::Tolerance {
        iteration_switch: 2,
        metric: Metric::Euclidean,
        candidates: 8,
    };

    assert!(!strategy.needs_history(0));
    assert!(!strategy.needs_history(2));
    assert!(strategy.needs_history(3));
    assert!(!SamplingStrategy::Uniform.needs_history(10));
}

#[test]
fn lattice_contains_coarse_grid_in_low_dimensions() {
    assert_eq!(fill::lattice_resolution(1), Some(4091));
    assert_eq!(fill::lattice_resolution(2), Some(61));
    assert_eq!(fill::lattice_resolution(3), Some(11));
    assert_eq!(fill::lattice_resolution(4), Some(8));
    assert_eq!(fill::lattice_resolution(13), None);
}

#[test]
fn strategy_deserializes_from_yaml() {
    let strategy: SamplingStrategy =
        serde_yaml::from_str("method: tolerance\niteration_switch: 4\nmetric: normalized").unwrap();

    assert_eq!(
        strategy,
        SamplingStrategy::Tolerance {
            iteration_switch: 4,
            metric: Metric::Normalized,
            candidates: 1024
        }
    );
    assert!(serde_yaml::from_str::<SamplingStrategy>("method: linspace\nstepz: 3").is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn tolerance_beats_coarse_grid(
        history in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 2), 1..12),
        seed in 0u64..1000
    ) {
        let space = square();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let point = fill::fill_point(&space, &history, Metric::Euclidean, 64, &mut rng);
        prop_assert!(space.contains(&point));

        let achieved = fill::min_distance(&space, Metric::Euclidean, &history, &point);
        let grid_best = fill::lattice(&space, 11)
            .iter()
            .map(|candidate| fill::min_distance(&space, Metric::Euclidean, &history, candidate))
            .fold(f64::NEG_INFINITY, f64::max);

        prop_assert!(achieved >= grid_best - 1e-9, "{} < {}", achieved, grid_best);
    }
}
