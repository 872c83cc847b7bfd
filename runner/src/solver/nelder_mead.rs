//! Nelder-Mead downhill simplex, one reflection/expansion/contraction/shrink per generation.

use super::{Bounds, Evaluator, SolverError};
use crate::cost::CostFunction;
use serde::{Deserialize, Serialize};

// initial simplex: relative offset for non-zero coordinates, absolute offset for zeros
const RELATIVE_OFFSET: f64 = 0.05;
const ZERO_OFFSET: f64 = 0.00025;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NelderMead {
    simplex: Vec<Vec<f64>>,
    // empty until the first generation evaluated the simplex
    costs: Vec<f64>,
    alpha: f64,
    gamma: f64,
    rho: f64,
    sigma: f64,
}

impl NelderMead {
    pub fn new(initial_point: &[f64], bounds: &Bounds) -> Self {
        let mut simplex = vec![initial_point.to_vec()];

        for axis in 0..initial_point.len() {
            let value = initial_point[axis];
            let offset = if value != 0.0 {
                RELATIVE_OFFSET * value.abs()
            } else {
                ZERO_OFFSET
            };
            let (lower, upper) = (bounds.lower[axis], bounds.upper[axis]);

            // step away from the closer bound so the vertex stays distinct after clamping
            let moved = if value + offset <= upper {
                value + offset
            } else {
                (value - offset).max(lower)
            };

            let mut vertex = initial_point.to_vec();
            vertex[axis] = moved;
            simplex.push(vertex);
        }

        Self {
            simplex,
            costs: Vec::new(),
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
        }
    }

    pub fn validate(&self, dimensions: usize) -> Result<(), SolverError> {
        if self.simplex.len() != dimensions + 1
            || self.simplex.iter().any(|vertex| vertex.len() != dimensions)
        {
            return Err(SolverError::InvalidState(format!(
                "simplex does not match {dimensions} dimensions"
            )));
        }
        if !self.costs.is_empty() && self.costs.len() != self.simplex.len() {
            return Err(SolverError::InvalidState(
                "simplex costs do not match the vertices".to_owned(),
            ));
        }

        Ok(())
    }

    fn order(&self) -> (usize, usize, usize) {
        let mut order = (0..self.costs.len()).collect::<Vec<_>>();
        order.sort_by(|a, b| self.costs[*a].total_cmp(&self.costs[*b]));

        let points = order.len();
        (order[0], order[points - 2], order[points - 1])
    }

    fn replace(&mut self, index: usize, (vertex, cost): (Vec<f64>, f64)) {
        self.simplex[index] = vertex;
        self.costs[index] = cost;
    }

    fn shrink<C: CostFunction + ?Sized>(
        &mut self,
        best: usize,
        evaluator: &mut Evaluator<'_, C>,
    ) -> Result<(), SolverError> {
        for index in 0..self.simplex.len() {
            if index == best {
                continue;
            }

            let vertex = self.simplex[index]
                .iter()
                .zip(self.simplex[best].iter())
                .map(|(x, b)| b + self.sigma * (x - b))
                .collect::<Vec<_>>();

            let evaluated = evaluator.evaluate(&vertex)?;
            self.replace(index, evaluated);
        }

        Ok(())
    }

    pub fn step<C: CostFunction + ?Sized>(
        &mut self,
        evaluator: &mut Evaluator<'_, C>,
    ) -> Result<(), SolverError> {
        if self.costs.is_empty() {
            let mut simplex = Vec::with_capacity(self.simplex.len());
            let mut costs = Vec::with_capacity(self.simplex.len());

            for vertex in self.simplex.iter() {
                let (vertex, cost) = evaluator.evaluate(vertex)?;
                simplex.push(vertex);
                costs.push(cost);
            }

            self.simplex = simplex;
            self.costs = costs;

            return Ok(());
        }

        let dimensions = self.simplex.len() - 1;
        if dimensions == 0 {
            return Ok(());
        }

        let (best, second_worst, worst) = self.order();

        let mut centroid = vec![0.0; dimensions];
        for (index, vertex) in self.simplex.iter().enumerate() {
            if index != worst {
                centroid
                    .iter_mut()
                    .zip(vertex)
                    .for_each(|(c, x)| *c += x);
            }
        }
        centroid.iter_mut().for_each(|c| *c /= dimensions as f64);

        let along = |from: &[f64], to: &[f64], factor: f64| {
            from.iter()
                .zip(to)
                .map(|(f, t)| f + factor * (t - f))
                .collect::<Vec<_>>()
        };

        let reflected = evaluator.evaluate(&along(
            &centroid,
            &self.simplex[worst],
            -self.alpha,
        ))?;

        if self.costs[best] <= reflected.1 && reflected.1 < self.costs[second_worst] {
            self.replace(worst, reflected);
        } else if reflected.1 < self.costs[best] {
            let expanded = evaluator.evaluate(&along(&centroid, &reflected.0, self.gamma))?;

            if expanded.1 < reflected.1 {
                self.replace(worst, expanded);
            } else {
                self.replace(worst, reflected);
            }
        } else if reflected.1 < self.costs[worst] {
            // outside contraction
            let contracted = evaluator.evaluate(&along(&centroid, &reflected.0, self.rho))?;

            if contracted.1 <= reflected.1 {
                self.replace(worst, contracted);
            } else {
                self.shrink(best, evaluator)?;
            }
        } else {
            // inside contraction
            let contracted =
                evaluator.evaluate(&along(&centroid, &self.simplex[worst], self.rho))?;

            if contracted.1 < self.costs[worst] {
                self.replace(worst, contracted);
            } else {
                self.shrink(best, evaluator)?;
            }
        }

        Ok(())
    }
}
