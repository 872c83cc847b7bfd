pub mod nelder_mead;
pub mod powell;
pub mod termination;

use crate::{
    cost::{CostError, CostFunction},
    parameters::ParameterSpace,
};
use nelder_mead::NelderMead;
use powell::Powell;
use serde::{Deserialize, Serialize};
use termination::{Termination, TerminationReason};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Initial point {point:?} lies outside of the bounds")]
    OutOfBounds { point: Vec<f64> },
    #[error("Point has {found} coordinates but {expected} parameters are defined")]
    Dimension { expected: usize, found: usize },
    #[error("Cost function failed: {0}")]
    Cost(#[from] CostError),
    #[error("Solver state is inconsistent: {0}")]
    InvalidState(String),
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SolverFamily {
    NelderMead,
    Powell,
}

/// Termination related options shared by all solver families
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOptions {
    pub family: SolverFamily,
    pub stop_change: f64,
    pub stop_generations: usize,
    pub max_iterations: Option<u64>,
    pub max_evaluations: Option<u64>,
}

impl SolverOptions {
    pub fn termination(&self, dimensions: usize) -> Termination {
        let dimensions = dimensions.max(1) as u64;

        Termination::new(
            self.stop_change,
            self.stop_generations,
            self.max_iterations.unwrap_or(1000 * dimensions),
            self.max_evaluations.unwrap_or(10000 * dimensions),
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.len()
            && point
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(value, (lower, upper))| lower <= value && value <= upper)
    }

    /// project a point onto the box, solvers never evaluate outside of it
    pub fn clamp(&self, point: &[f64]) -> Vec<f64> {
        point
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(value, (lower, upper))| value.clamp(*lower, *upper))
            .collect()
    }
}

impl From<&ParameterSpace> for Bounds {
    fn from(space: &ParameterSpace) -> Self {
        Self {
            lower: space.lower_bounds(),
            upper: space.upper_bounds(),
        }
    }
}

/// Evaluated points and their costs, in evaluation order
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct History {
    pub points: Vec<Vec<f64>>,
    pub values: Vec<f64>,
}

impl History {
    pub fn push(&mut self, point: Vec<f64>, value: f64) {
        self.points.push(point);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn extend(&mut self, other: History) {
        self.points.extend(other.points);
        self.values.extend(other.values);
    }

    /// copy of all entries starting at `start`
    pub fn suffix(&self, start: usize) -> History {
        let start = start.min(self.len());

        History {
            points: self.points[start..].to_vec(),
            values: self.values[start..].to_vec(),
        }
    }

    pub fn min_value(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Progress {
    generations: u64,
    evaluations: u64,
    best_point: Vec<f64>,
    best_value: f64,
    energy: Vec<f64>,
}

/// Evaluation context handed to the solver families for one generation
pub struct Evaluator<'a, C: ?Sized> {
    cost: &'a mut C,
    bounds: &'a Bounds,
    progress: &'a mut Progress,
    history: &'a mut History,
}

impl<C: CostFunction + ?Sized> Evaluator<'_, C> {
    /// clamp `point` into the bounds, evaluate and record it
    pub fn evaluate(&mut self, point: &[f64]) -> Result<(Vec<f64>, f64), SolverError> {
        let point = self.bounds.clamp(point);
        let value = self.cost.evaluate(&point)?;

        if !value.is_finite() {
            return Err(CostError::NonFinite(value).into());
        }

        trace!(point = ?point, value = value, "Evaluated cost function");

        self.progress.evaluations += 1;
        if value < self.progress.best_value {
            self.progress.best_value = value;
            self.progress.best_point = point.clone();
        }
        self.history.push(point.clone(), value);

        Ok((point, value))
    }

    pub fn bounds(&self) -> &Bounds {
        self.bounds
    }
}

/// All solver families, see `SolverFamily`
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Algorithm {
    NelderMead(NelderMead),
    Powell(Powell),
}

impl Algorithm {
    pub fn family(&self) -> SolverFamily {
        match self {
            Self::NelderMead(_) => SolverFamily::NelderMead,
            Self::Powell(_) => SolverFamily::Powell,
        }
    }

    fn step<C: CostFunction + ?Sized>(
        &mut self,
        evaluator: &mut Evaluator<'_, C>,
    ) -> Result<(), SolverError> {
        match self {
            Self::NelderMead(solver) => solver.step(evaluator),
            Self::Powell(solver) => solver.step(evaluator),
        }
    }

    fn validate(&self, dimensions: usize) -> Result<(), SolverError> {
        match self {
            Self::NelderMead(solver) => solver.validate(dimensions),
            Self::Powell(solver) => solver.validate(dimensions),
        }
    }
}

/// Everything required to continue a solver after a restart
///
/// The cost function is never part of the state, the termination condition is stored as its
/// scalar parameters only.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SolverState {
    pub algorithm: Algorithm,
    pub bounds: Bounds,
    pub generations: u64,
    pub evaluations: u64,
    pub best_point: Vec<f64>,
    pub best_value: Option<f64>,
    pub energy: Vec<f64>,
    pub stop_change: f64,
    pub stop_generations: usize,
    pub max_iterations: u64,
    pub max_evaluations: u64,
}

/// A single walker's optimizer
#[derive(Clone, Debug)]
pub struct LocalSolver {
    algorithm: Algorithm,
    bounds: Bounds,
    termination: Termination,
    progress: Progress,
    history: History,
    checkpointed: usize,
    reason: Option<TerminationReason>,
}

impl LocalSolver {
    pub fn initialize(
        initial_point: Vec<f64>,
        bounds: Bounds,
        options: &SolverOptions,
    ) -> Result<Self, SolverError> {
        if initial_point.len() != bounds.len() {
            return Err(SolverError::Dimension {
                expected: bounds.len(),
                found: initial_point.len(),
            });
        }
        if !bounds.contains(&initial_point) {
            return Err(SolverError::OutOfBounds {
                point: initial_point,
            });
        }

        let algorithm = match options.family {
            SolverFamily::NelderMead => {
                Algorithm::NelderMead(NelderMead::new(&initial_point, &bounds))
            }
            SolverFamily::Powell => Algorithm::Powell(Powell::new(initial_point.clone())),
        };

        Ok(Self {
            algorithm,
            termination: options.termination(bounds.len()),
            progress: Progress {
                generations: 0,
                evaluations: 0,
                best_point: initial_point,
                best_value: f64::INFINITY,
                energy: Vec::new(),
            },
            bounds,
            history: History::default(),
            checkpointed: 0,
            reason: None,
        })
    }

    /// Perform one generation, returns whether the termination condition holds afterwards.
    ///
    /// Once terminated this returns `true` without evaluating the cost function again.
    pub fn step<C: CostFunction + ?Sized>(&mut self, cost: &mut C) -> Result<bool, SolverError> {
        if self.reason.is_some() {
            return Ok(true);
        }

        let mut evaluator = Evaluator {
            cost,
            bounds: &self.bounds,
            progress: &mut self.progress,
            history: &mut self.history,
        };
        self.algorithm.step(&mut evaluator)?;

        self.progress.generations += 1;
        self.progress.energy.push(self.progress.best_value);

        // the condition only ever looks at the last `window` generations
        let window = self.termination.window();
        if self.progress.energy.len() > window {
            let excess = self.progress.energy.len() - window;
            self.progress.energy.drain(..excess);
        }

        self.reason = self.termination.check(
            self.progress.generations,
            self.progress.evaluations,
            &self.progress.energy,
        );

        if let Some(reason) = self.reason {
            debug!(
                reason = %reason,
                generations = self.progress.generations,
                evaluations = self.progress.evaluations,
                "Local solver terminated"
            );
        }

        Ok(self.reason.is_some())
    }

    pub fn run_to_completion<C: CostFunction + ?Sized>(
        &mut self,
        cost: &mut C,
    ) -> Result<(), SolverError> {
        while !self.step(cost)? {}

        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.reason.is_some()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.reason
    }

    pub fn family(&self) -> SolverFamily {
        self.algorithm.family()
    }

    /// (generations, evaluations)
    pub fn diagnostics(&self) -> (u64, u64) {
        (self.progress.generations, self.progress.evaluations)
    }

    /// best point and value seen so far, including those seen before a restore
    pub fn best(&self) -> Option<(&[f64], f64)> {
        self.progress
            .best_value
            .is_finite()
            .then_some((self.progress.best_point.as_slice(), self.progress.best_value))
    }

    /// all points evaluated by this instance
    pub fn history(&self) -> &History {
        &self.history
    }

    /// points evaluated since the last `mark_checkpointed`
    pub fn pending_history(&self) -> History {
        self.history.suffix(self.checkpointed)
    }

    pub fn mark_checkpointed(&mut self) {
        self.checkpointed = self.history.len();
    }

    pub fn export_state(&self) -> SolverState {
        SolverState {
            algorithm: self.algorithm.clone(),
            bounds: self.bounds.clone(),
            generations: self.progress.generations,
            evaluations: self.progress.evaluations,
            best_point: self.progress.best_point.clone(),
            best_value: self
                .progress
                .best_value
                .is_finite()
                .then_some(self.progress.best_value),
            energy: self.progress.energy.clone(),
            stop_change: self.termination.stop_change,
            stop_generations: self.termination.stop_generations,
            max_iterations: self.termination.max_iterations,
            max_evaluations: self.termination.max_evaluations,
        }
    }

    /// Rebuild a solver from an exported state, the termination condition is reconstructed from
    /// the stored parameters.
    pub fn import_state(state: SolverState) -> Result<Self, SolverError> {
        let dimensions = state.bounds.len();

        if state.bounds.upper.len() != dimensions {
            return Err(SolverError::InvalidState(
                "lower and upper bounds differ in length".to_owned(),
            ));
        }
        if state.best_point.len() != dimensions {
            return Err(SolverError::Dimension {
                expected: dimensions,
                found: state.best_point.len(),
            });
        }
        state.algorithm.validate(dimensions)?;

        let termination = Termination::new(
            state.stop_change,
            state.stop_generations,
            state.max_iterations,
            state.max_evaluations,
        );
        let reason = termination.check(state.generations, state.evaluations, &state.energy);

        Ok(Self {
            algorithm: state.algorithm,
            bounds: state.bounds,
            termination,
            progress: Progress {
                generations: state.generations,
                evaluations: state.evaluations,
                best_point: state.best_point,
                best_value: state.best_value.unwrap_or(f64::INFINITY),
                energy: state.energy,
            },
            history: History::default(),
            checkpointed: 0,
            reason,
        })
    }
}
