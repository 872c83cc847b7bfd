//! Space filling search used by tolerance sampling.
//!
//! Candidates are scored by their smallest distance to any recorded point. The candidate set is
//! a regular lattice (when it fits into `LATTICE_BUDGET`), plus uniform draws; the best
//! candidate is then polished with a shrinking compass search that never leaves the bounds.

use super::{uniform, Metric};
use crate::parameters::ParameterSpace;
use itertools::Itertools;
use rand::Rng;
use rayon::prelude::*;

const LATTICE_BUDGET: usize = 4096;
const REFINE_ITERATIONS: usize = 200;
const REFINE_TOLERANCE: f64 = 1e-9;

/// smallest distance from `point` to any point in `history`
pub fn min_distance(
    space: &ParameterSpace,
    metric: Metric,
    history: &[Vec<f64>],
    point: &[f64],
) -> f64 {
    history
        .iter()
        .map(|other| metric.distance(space, point, other))
        .fold(f64::INFINITY, f64::min)
}

/// Points per axis for the lattice, or None if even two per axis exceed the budget.
///
/// When possible the resolution is `10m + 1`, which makes the lattice a superset of the
/// 11 points per axis lattice.
pub fn lattice_resolution(dimensions: usize) -> Option<usize> {
    if dimensions == 0 {
        return None;
    }

    let per_axis = (LATTICE_BUDGET as f64).powf(1.0 / dimensions as f64) + 1e-9;
    let per_axis = per_axis.floor() as usize;
    let decades = per_axis.saturating_sub(1) / 10;
    let resolution = if decades >= 1 {
        decades * 10 + 1
    } else {
        per_axis.max(2)
    };

    let fits = (resolution as f64).powi(dimensions as i32) <= LATTICE_BUDGET as f64;
    fits.then_some(resolution)
}

pub fn lattice(space: &ParameterSpace, resolution: usize) -> Vec<Vec<f64>> {
    let last = (resolution - 1).max(1) as f64;

    space
        .iter()
        .map(|parameter| {
            (0..resolution)
                .map(|k| {
                    (parameter.lower + parameter.width() * (k as f64 / last))
                        .min(parameter.upper)
                })
                .collect_vec()
        })
        .multi_cartesian_product()
        .collect()
}

pub fn fill_point<R: Rng + ?Sized>(
    space: &ParameterSpace,
    history: &[Vec<f64>],
    metric: Metric,
    candidates: usize,
    rng: &mut R,
) -> Vec<f64> {
    let mut pool = lattice_resolution(space.len())
        .map(|resolution| lattice(space, resolution))
        .unwrap_or_default();
    pool.extend((0..candidates).map(|_| uniform(space, rng)));

    if pool.is_empty() {
        pool.push(uniform(space, rng));
    }

    let scores: Vec<f64> = pool
        .par_iter()
        .map(|candidate| min_distance(space, metric, history, candidate))
        .collect();

    // first maximum wins so results do not depend on the thread pool
    let (best, best_score) = scores.iter().enumerate().fold(
        (0, f64::NEG_INFINITY),
        |(best, best_score), (index, score)| {
            if *score > best_score {
                (index, *score)
            } else {
                (best, best_score)
            }
        },
    );

    refine(space, history, metric, pool.swap_remove(best), best_score)
}

fn refine(
    space: &ParameterSpace,
    history: &[Vec<f64>],
    metric: Metric,
    mut point: Vec<f64>,
    mut score: f64,
) -> Vec<f64> {
    let mut steps = space
        .iter()
        .map(|parameter| parameter.width() / 4.0)
        .collect_vec();

    for _ in 0..REFINE_ITERATIONS {
        let mut improved = false;

        for (axis, parameter) in space.iter().enumerate() {
            for direction in [1.0, -1.0] {
                let mut trial = point.clone();
                trial[axis] = (trial[axis] + direction * steps[axis])
                    .clamp(parameter.lower, parameter.upper);

                let trial_score = min_distance(space, metric, history, &trial);
                if trial_score > score {
                    point = trial;
                    score = trial_score;
                    improved = true;
                }
            }
        }

        if !improved {
            steps.iter_mut().for_each(|step| *step /= 2.0);

            if space
                .iter()
                .zip(steps.iter())
                .all(|(parameter, step)| *step <= REFINE_TOLERANCE * parameter.width().max(1.0))
            {
                break;
            }
        }
    }

    point
}
