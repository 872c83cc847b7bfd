pub mod exec;

use crate::{config::ConfigErrors, parameters::ParameterSpace};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CostError {
    #[error("Failed to spawn cost function")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to communicate with cost function")]
    ChildError(#[from] std::io::Error),
    #[error("Cost function timed out after {0:?}")]
    ChildTimeout(Duration),
    #[error("Cost function exited unsuccessfully ({status}): {stderr}")]
    Exit { status: String, stderr: String },
    #[error("Failed to deserialize cost function output")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("Cost function returned a non-finite value {0}")]
    NonFinite(f64),
    #[error("{0}")]
    Failed(String),
}

/// Capability to evaluate one parameter vector, lower is better
pub trait CostFunction {
    fn evaluate(&mut self, point: &[f64]) -> Result<f64, CostError>;
}

impl<F> CostFunction for F
where
    F: FnMut(&[f64]) -> Result<f64, CostError>,
{
    fn evaluate(&mut self, point: &[f64]) -> Result<f64, CostError> {
        self(point)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "name", rename_all = "lowercase", deny_unknown_fields)]
pub enum CostConfig {
    /// external executable, reads the point from stdin and prints the cost
    Exec {
        exec: PathBuf,
        #[serde(default)]
        params: Vec<String>,
        // milliseconds
        #[serde(default = "default_timeout")]
        timeout: u64,
        #[serde(default = "default_sign")]
        sign: f64,
    },
    /// squared distance to `center` (origin by default)
    Quadratic {
        #[serde(default)]
        center: Option<Vec<f64>>,
        #[serde(default = "default_sign")]
        sign: f64,
    },
}

fn default_timeout() -> u64 {
    60_000
}

fn default_sign() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quadratic {
    center: Vec<f64>,
    sign: f64,
}

impl Quadratic {
    pub fn new(center: Vec<f64>, sign: f64) -> Self {
        Self { center, sign }
    }
}

impl CostFunction for Quadratic {
    fn evaluate(&mut self, point: &[f64]) -> Result<f64, CostError> {
        Ok(self.sign
            * point
                .iter()
                .zip(self.center.iter())
                .map(|(x, c)| (x - c).powi(2))
                .sum::<f64>())
    }
}

/// All cost functions that can be selected from the configuration
#[derive(Debug)]
pub enum CostFunctions {
    Exec(exec::ExecCost),
    Quadratic(Quadratic),
}

impl CostFunctions {
    pub fn load(config: &CostConfig, space: &ParameterSpace) -> Result<Self, ConfigErrors> {
        match config {
            CostConfig::Exec { .. } => exec::ExecCost::load(config, space).map(Self::Exec),
            CostConfig::Quadratic { center, sign } => {
                let center = center.clone().unwrap_or_else(|| vec![0.0; space.len()]);

                if center.len() != space.len() {
                    return Err(ConfigErrors::InvalidCost(format!(
                        "quadratic center has {} coordinates but {} parameters are defined",
                        center.len(),
                        space.len()
                    )));
                }

                Ok(Self::Quadratic(Quadratic::new(center, *sign)))
            }
        }
    }
}

impl CostFunction for CostFunctions {
    fn evaluate(&mut self, point: &[f64]) -> Result<f64, CostError> {
        match self {
            Self::Exec(cost) => cost.evaluate(point),
            Self::Quadratic(cost) => cost.evaluate(point),
        }
    }
}

#[cfg(test)]
mod cost_test {
    use super::*;

    fn plane() -> ParameterSpace {
        ParameterSpace::new([("x", [-1.0, 1.0]), ("y", [-1.0, 1.0])]).unwrap()
    }

    #[test]
    fn quadratic_defaults_to_origin() {
        let config: CostConfig = serde_yaml::from_str("name: quadratic").unwrap();
        let mut cost = CostFunctions::load(&config, &plane()).unwrap();

        assert_eq!(cost.evaluate(&[1.0, -2.0]).unwrap(), 5.0);
    }

    #[test]
    fn quadratic_sign_flips() {
        let config: CostConfig =
            serde_yaml::from_str("name: quadratic\ncenter: [1, 1]\nsign: -1").unwrap();
        let mut cost = CostFunctions::load(&config, &plane()).unwrap();

        assert_eq!(cost.evaluate(&[0.0, 0.0]).unwrap(), -2.0);
    }

    #[test]
    fn quadratic_center_must_match() {
        let config: CostConfig = serde_yaml::from_str("name: quadratic\ncenter: [1]").unwrap();

        assert!(matches!(
            CostFunctions::load(&config, &plane()),
            Err(ConfigErrors::InvalidCost(_))
        ));
    }

    #[test]
    fn closures_are_cost_functions() {
        let mut calls = 0;
        let mut cost = |point: &[f64]| {
            calls += 1;
            Ok::<f64, CostError>(point[0])
        };

        assert_eq!(CostFunction::evaluate(&mut cost, &[4.0]).unwrap(), 4.0);
        assert_eq!(calls, 1);
    }
}
