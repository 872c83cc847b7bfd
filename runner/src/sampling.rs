pub mod fill;

use crate::parameters::ParameterSpace;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("linspace requires at least one step")]
    NoSteps,
    #[error("linspace step {step} is outside of [0, {steps})")]
    StepOutOfRange { step: usize, steps: usize },
    #[error("Sampled point {point:?} lies outside of the parameter bounds")]
    OutOfBounds { point: Vec<f64> },
}

/// Distance used by tolerance sampling to spread new walkers away from recorded points
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    /// euclidean distance after scaling every axis to [0, 1]
    Normalized,
}

impl Metric {
    pub fn distance(&self, space: &ParameterSpace, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f64>()
                .sqrt(),
            Self::Normalized => space
                .iter()
                .zip(a.iter().zip(b))
                .map(|(parameter, (x, y))| {
                    let width = parameter.width();
                    if width > 0.0 {
                        ((x - y) / width).powi(2)
                    } else {
                        0.0
                    }
                })
                .sum::<f64>()
                .sqrt(),
        }
    }
}

/// How the initial point of a fresh walker is chosen
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase", deny_unknown_fields)]
pub enum SamplingStrategy {
    #[default]
    Uniform,
    Midpoint,
    Linspace {
        steps: usize,
        // fixed bin, otherwise the walker ordinal picks the bin
        #[serde(default)]
        step: Option<usize>,
    },
    Tolerance {
        // walkers with an index above this switch to space filling
        #[serde(default)]
        iteration_switch: usize,
        #[serde(default)]
        metric: Metric,
        #[serde(default = "default_candidates")]
        candidates: usize,
    },
}

fn default_candidates() -> usize {
    1024
}

impl SamplingStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Midpoint => "midpoint",
            Self::Linspace { .. } => "linspace",
            Self::Tolerance { .. } => "tolerance",
        }
    }

    /// whether recorded points of other walkers should be read before sampling walker `index`
    pub fn needs_history(&self, index: usize) -> bool {
        matches!(self, Self::Tolerance { iteration_switch, .. } if index > *iteration_switch)
    }

    /// Draw one initial point.
    ///
    /// `ordinal` is the global position of the walker in the ensemble and only used by
    /// `linspace`, `history` is only used by `tolerance`. The returned point is checked against
    /// the bounds, a violation is a bug in the strategy and reported as `OutOfBounds`.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        space: &ParameterSpace,
        ordinal: usize,
        history: &[Vec<f64>],
        rng: &mut R,
    ) -> Result<Vec<f64>, SamplingError> {
        let point = match self {
            Self::Uniform => uniform(space, rng),
            Self::Midpoint => midpoint(space),
            Self::Linspace { steps, step } => {
                if *steps == 0 {
                    return Err(SamplingError::NoSteps);
                }
                linspace(space, step.unwrap_or(ordinal % steps), *steps)?
            }
            Self::Tolerance {
                metric, candidates, ..
            } => tolerance(space, history, *metric, *candidates, rng),
        };

        if space.contains(&point) {
            Ok(point)
        } else {
            Err(SamplingError::OutOfBounds { point })
        }
    }
}

pub fn uniform<R: Rng + ?Sized>(space: &ParameterSpace, rng: &mut R) -> Vec<f64> {
    space
        .iter()
        .map(|parameter| {
            if parameter.lower < parameter.upper {
                rng.gen_range(parameter.lower..=parameter.upper)
            } else {
                parameter.lower
            }
        })
        .collect()
}

pub fn midpoint(space: &ParameterSpace) -> Vec<f64> {
    space
        .iter()
        .map(|parameter| parameter.lower + parameter.width() / 2.0)
        .collect()
}

/// center of bin `step` out of `steps` equal bins, in every dimension
pub fn linspace(
    space: &ParameterSpace,
    step: usize,
    steps: usize,
) -> Result<Vec<f64>, SamplingError> {
    if steps == 0 {
        return Err(SamplingError::NoSteps);
    }
    if step >= steps {
        return Err(SamplingError::StepOutOfRange { step, steps });
    }

    let fraction = (step as f64 + 0.5) / steps as f64;

    Ok(space
        .iter()
        .map(|parameter| {
            (parameter.lower + parameter.width() * fraction).clamp(parameter.lower, parameter.upper)
        })
        .collect())
}

/// point within bounds that is as far as possible from every point in `history`
pub fn tolerance<R: Rng + ?Sized>(
    space: &ParameterSpace,
    history: &[Vec<f64>],
    metric: Metric,
    candidates: usize,
    rng: &mut R,
) -> Vec<f64> {
    if history.is_empty() {
        uniform(space, rng)
    } else {
        fill::fill_point(space, history, metric, candidates, rng)
    }
}

#[cfg(test)]
mod sampling_test;
