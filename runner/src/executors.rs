pub mod checkpoint;
pub mod ensemble;

use crate::{
    config::ConfigErrors,
    database::ConnectionError,
    distributed::{barrier::BarrierError, DistributedError},
    sampling::SamplingError,
    solver::SolverError,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Archive failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Local solver failed: {0}")]
    Solver(#[from] SolverError),
    #[error("Failed to sample an initial point: {0}")]
    Sampling(#[from] SamplingError),
    #[error("Synchronization failed: {0}")]
    Barrier(#[from] BarrierError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Worker environment is invalid: {0}")]
    Distributed(#[from] DistributedError),
}

/// Something that runs the walkers assigned to this process
pub trait Executor {
    type Summary;

    fn execute(&mut self) -> Result<Self::Summary, ExecutorError>;
}
