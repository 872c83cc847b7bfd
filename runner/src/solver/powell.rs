//! Powell's conjugate direction method with bounded golden section line searches.

use super::{Bounds, Evaluator, SolverError};
use crate::cost::CostFunction;
use serde::{Deserialize, Serialize};

const INV_PHI: f64 = 0.618_033_988_749_895;
const LINE_ITERATIONS: usize = 30;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Powell {
    point: Vec<f64>,
    // None until the starting point was evaluated
    value: Option<f64>,
    directions: Vec<Vec<f64>>,
}

impl Powell {
    pub fn new(initial_point: Vec<f64>) -> Self {
        let dimensions = initial_point.len();
        let directions = (0..dimensions)
            .map(|axis| {
                let mut direction = vec![0.0; dimensions];
                direction[axis] = 1.0;
                direction
            })
            .collect();

        Self {
            point: initial_point,
            value: None,
            directions,
        }
    }

    pub fn validate(&self, dimensions: usize) -> Result<(), SolverError> {
        if self.point.len() != dimensions
            || self.directions.len() != dimensions
            || self.directions.iter().any(|d| d.len() != dimensions)
        {
            return Err(SolverError::InvalidState(format!(
                "direction set does not match {dimensions} dimensions"
            )));
        }

        Ok(())
    }

    pub fn step<C: CostFunction + ?Sized>(
        &mut self,
        evaluator: &mut Evaluator<'_, C>,
    ) -> Result<(), SolverError> {
        let mut value = match self.value {
            Some(value) => value,
            None => {
                let (point, value) = evaluator.evaluate(&self.point)?;
                self.point = point;
                self.value = Some(value);

                return Ok(());
            }
        };

        let start = self.point.clone();
        let mut largest_drop = 0.0;
        let mut largest_index = None;

        for index in 0..self.directions.len() {
            let (point, next) =
                line_minimize(evaluator, &self.point, value, &self.directions[index])?;

            if value - next > largest_drop {
                largest_drop = value - next;
                largest_index = Some(index);
            }

            self.point = point;
            value = next;
        }

        let combined = self
            .point
            .iter()
            .zip(start.iter())
            .map(|(end, begin)| end - begin)
            .collect::<Vec<_>>();

        if let Some(index) = largest_index {
            if combined.iter().any(|delta| *delta != 0.0) {
                let (point, next) = line_minimize(evaluator, &self.point, value, &combined)?;
                self.point = point;
                value = next;

                self.directions.remove(index);
                self.directions.push(combined);
            }
        }

        self.value = Some(value);

        Ok(())
    }
}

/// interval of `t` for which `point + t * direction` stays within the bounds
fn admissible(bounds: &Bounds, point: &[f64], direction: &[f64]) -> (f64, f64) {
    let mut low = f64::NEG_INFINITY;
    let mut high = f64::INFINITY;

    for (axis, delta) in direction.iter().enumerate() {
        if *delta == 0.0 {
            continue;
        }

        let a = (bounds.lower[axis] - point[axis]) / delta;
        let b = (bounds.upper[axis] - point[axis]) / delta;
        low = low.max(a.min(b));
        high = high.min(a.max(b));
    }

    if low.is_finite() && high.is_finite() {
        (low.min(0.0), high.max(0.0))
    } else {
        (0.0, 0.0)
    }
}

/// Golden section search along `direction`, keeps the current point unless a strictly better
/// one is found
fn line_minimize<C: CostFunction + ?Sized>(
    evaluator: &mut Evaluator<'_, C>,
    point: &[f64],
    value: f64,
    direction: &[f64],
) -> Result<(Vec<f64>, f64), SolverError> {
    let (mut low, mut high) = admissible(evaluator.bounds(), point, direction);

    if high - low <= f64::EPSILON {
        return Ok((point.to_vec(), value));
    }

    let at = |t: f64| {
        point
            .iter()
            .zip(direction)
            .map(|(x, d)| x + t * d)
            .collect::<Vec<_>>()
    };

    let mut best = (point.to_vec(), value);
    let mut keep = |candidate: &(Vec<f64>, f64)| {
        if candidate.1 < best.1 {
            best = candidate.clone();
        }
    };

    let mut c = high - INV_PHI * (high - low);
    let mut d = low + INV_PHI * (high - low);
    let mut fc = evaluator.evaluate(&at(c))?;
    let mut fd = evaluator.evaluate(&at(d))?;
    keep(&fc);
    keep(&fd);

    for _ in 0..LINE_ITERATIONS {
        if fc.1 < fd.1 {
            high = d;
            d = c;
            fd = fc;
            c = high - INV_PHI * (high - low);
            fc = evaluator.evaluate(&at(c))?;
            keep(&fc);
        } else {
            low = c;
            c = d;
            fc = fd;
            d = low + INV_PHI * (high - low);
            fd = evaluator.evaluate(&at(d))?;
            keep(&fd);
        }
    }

    Ok(best)
}
