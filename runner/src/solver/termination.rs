use serde::{Deserialize, Serialize};
use std::fmt;

// keeps a constant history from dividing zero by zero
const ETA: f64 = 1e-20;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ChangeOverGeneration,
    MaxIterations,
    MaxEvaluations,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ChangeOverGeneration => write!(f, "normalized change over generations"),
            Self::MaxIterations => write!(f, "maximum number of iterations"),
            Self::MaxEvaluations => write!(f, "maximum number of evaluations"),
        }
    }
}

/// Termination condition of a local solver.
///
/// Only the scalars are stored, the predicate is rebuilt from them whenever a solver is
/// created or restored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Termination {
    pub stop_change: f64,
    pub stop_generations: usize,
    pub max_iterations: u64,
    pub max_evaluations: u64,
}

impl Termination {
    pub fn new(
        stop_change: f64,
        stop_generations: usize,
        max_iterations: u64,
        max_evaluations: u64,
    ) -> Self {
        Self {
            stop_change,
            stop_generations: stop_generations.max(1),
            max_iterations,
            max_evaluations,
        }
    }

    /// entries of the best energy history the condition needs to look at
    pub fn window(&self) -> usize {
        self.stop_generations + 1
    }

    /// `2 |E[-g] - E[-1]| <= stop_change (|E[-g]| + |E[-1]|)` over the best energy per generation
    pub fn change_over_generation(&self, energy: &[f64]) -> bool {
        let length = energy.len();

        if length <= self.stop_generations {
            return false;
        }

        let past = energy[length - self.stop_generations - 1];
        let current = energy[length - 1];

        2.0 * (past - current).abs() <= self.stop_change * (past.abs() + current.abs()) + ETA
    }

    pub fn check(
        &self,
        generations: u64,
        evaluations: u64,
        energy: &[f64],
    ) -> Option<TerminationReason> {
        if self.change_over_generation(energy) {
            Some(TerminationReason::ChangeOverGeneration)
        } else if generations >= self.max_iterations {
            Some(TerminationReason::MaxIterations)
        } else if evaluations >= self.max_evaluations {
            Some(TerminationReason::MaxEvaluations)
        } else {
            None
        }
    }
}
