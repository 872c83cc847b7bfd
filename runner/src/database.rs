pub mod memory;
pub mod report;
pub mod sqlite;
pub mod util;

use crate::{
    config::RunnerConfig,
    parameters::{ParameterError, ParameterSpace},
    solver::{History, LocalSolver, SolverState},
};
use serde_repr::*;
use std::{fmt, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("SQLite archive failed: {0}")]
    SQLite(#[source] rusqlite::Error),
    #[error("Failed to (de)serialize archive entry: {0}")]
    Serialization(#[from] serde_yaml::Error),
    #[error("Archive was created for parameters {stored:?} but the configuration defines {current:?}")]
    ConfigurationMismatch {
        stored: Vec<String>,
        current: Vec<String>,
    },
    #[error("Archive contains no configuration")]
    MissingConfiguration,
    #[error("Stored parameters are invalid: {0}")]
    Parameters(#[from] ParameterError),
    #[error("Malformed point encoding: {0}")]
    Codec(String),
}

/// Completion of a walker, stored as `-1/0/1`
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy, Default)]
#[repr(i8)]
pub enum Completion {
    #[default]
    Pending = -1,
    Running = 0,
    Terminated = 1,
}

impl Completion {
    pub fn of(solver: &LocalSolver) -> Self {
        if solver.is_terminated() {
            Self::Terminated
        } else if solver.diagnostics().0 == 0 {
            Self::Pending
        } else {
            Self::Running
        }
    }

    pub fn is_terminated(&self) -> bool {
        *self == Self::Terminated
    }
}

impl TryFrom<i64> for Completion {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Pending),
            0 => Ok(Self::Running),
            1 => Ok(Self::Terminated),
            other => Err(other),
        }
    }
}

/// Identity of one walker: (worker rank, walker index, run tag)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalkerKey {
    pub rank: usize,
    pub index: usize,
    pub tag: String,
}

impl WalkerKey {
    pub fn new(rank: usize, index: usize, tag: impl Into<String>) -> Self {
        Self {
            rank,
            index,
            tag: tag.into(),
        }
    }
}

impl fmt::Display for WalkerKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}_{}_{}", self.rank, self.index, self.tag)
    }
}

/// Scalar part of a walker record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalkerSummary {
    pub best_point: Vec<f64>,
    pub best_value: Option<f64>,
    pub completion: Completion,
    /// cumulative wall time over all checkpoints
    pub elapsed: Option<f64>,
    pub generations: u64,
    pub evaluations: u64,
}

impl WalkerSummary {
    /// Merge a newer partial summary into this one.
    ///
    /// The best point only moves on a strictly lower value, counters and completion are taken
    /// from `partial`, elapsed times add up.
    pub fn merge(&mut self, partial: &WalkerSummary) {
        if let Some(value) = partial.best_value {
            if self.best_value.map_or(true, |best| value < best) {
                self.best_value = Some(value);
                self.best_point = partial.best_point.clone();
            }
        }

        self.generations = partial.generations;
        self.evaluations = partial.evaluations;
        self.elapsed = match (self.elapsed, partial.elapsed) {
            (Some(existing), Some(new)) => Some(existing + new),
            (existing, new) => existing.or(new),
        };
        self.completion = partial.completion;
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalkerRecord {
    pub history: History,
    pub summary: WalkerSummary,
}

impl WalkerRecord {
    /// partial record with everything the solver evaluated since its last checkpoint
    pub fn from_solver(solver: &LocalSolver, elapsed: Option<f64>) -> Self {
        let (generations, evaluations) = solver.diagnostics();
        let (best_point, best_value) = match solver.best() {
            Some((point, value)) => (point.to_vec(), Some(value)),
            None => (Vec::new(), None),
        };

        Self {
            history: solver.pending_history(),
            summary: WalkerSummary {
                best_point,
                best_value,
                completion: Completion::of(solver),
                elapsed,
                generations,
                evaluations,
            },
        }
    }

    pub fn merge(&mut self, partial: WalkerRecord) {
        self.history.extend(partial.history);
        self.summary.merge(&partial.summary);
    }
}

/// Everything stored under one walker key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchiveEntry {
    pub record: WalkerRecord,
    /// None once the walker terminated
    pub state: Option<SolverState>,
}

/// Parameter layout and full configuration of the run that created an archive
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSnapshot {
    pub parameters: ParameterSpace,
    pub configuration: String,
}

impl ConfigurationSnapshot {
    pub fn new(config: &RunnerConfig) -> Result<Self, ConnectionError> {
        Ok(Self {
            parameters: config.parameters.clone(),
            configuration: serde_yaml::to_string(config)?,
        })
    }

    /// parameter names and their order have to match, bounds may change between runs
    pub fn validate(&self, current: &ParameterSpace) -> Result<(), ConnectionError> {
        if self.parameters.same_layout(current) {
            Ok(())
        } else {
            Err(ConnectionError::ConfigurationMismatch {
                stored: owned_names(&self.parameters),
                current: owned_names(current),
            })
        }
    }
}

fn owned_names(space: &ParameterSpace) -> Vec<String> {
    space.names().into_iter().map(str::to_owned).collect()
}

/// All archive adapters
#[derive(Debug)]
pub enum Archive {
    SQLite(sqlite::SharedConnection),
    Memory(memory::MemoryConnection),
}

impl Archive {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, ConnectionError> {
        Ok(Self::SQLite(sqlite::SharedConnection::load(path, busy_timeout)?))
    }

    /// open an existing archive without ever writing to it
    pub fn open_read_only(path: &Path) -> Result<Self, ConnectionError> {
        Ok(Self::SQLite(sqlite::SharedConnection::load_read_only(path)?))
    }

    pub fn memory() -> Self {
        Self::Memory(memory::MemoryConnection::default())
    }

    pub fn load(&self, key: &WalkerKey) -> Result<Option<ArchiveEntry>, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.load_entry(key),
            Self::Memory(connection) => connection.load_entry(key),
        }
    }

    /// Merge `entry` into the stored record of `key` and replace its solver state, returns the
    /// merged summary.
    pub fn save(
        &self,
        key: &WalkerKey,
        entry: ArchiveEntry,
    ) -> Result<WalkerSummary, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.save(key, entry),
            Self::Memory(connection) => connection.save(key, entry),
        }
    }

    pub fn load_configuration(&self) -> Result<Option<ConfigurationSnapshot>, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.load_configuration(),
            Self::Memory(connection) => connection.load_configuration(),
        }
    }

    /// Store the snapshot if the archive has none yet, otherwise check it against the stored one
    pub fn save_configuration(
        &self,
        snapshot: &ConfigurationSnapshot,
    ) -> Result<(), ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.save_configuration(snapshot),
            Self::Memory(connection) => connection.save_configuration(snapshot),
        }
    }

    pub fn validate_configuration(&self, current: &ParameterSpace) -> Result<(), ConnectionError> {
        self.load_configuration()?
            .ok_or(ConnectionError::MissingConfiguration)?
            .validate(current)
    }

    pub fn keys(&self) -> Result<Vec<WalkerKey>, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.keys(),
            Self::Memory(connection) => connection.keys(),
        }
    }

    /// every point recorded by any walker, possibly missing concurrent writes
    pub fn points(&self) -> Result<Vec<Vec<f64>>, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.points(),
            Self::Memory(connection) => connection.points(),
        }
    }

    pub fn arrive(&self, barrier: &str, rank: usize) -> Result<(), ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.arrive(barrier, rank),
            Self::Memory(connection) => connection.arrive(barrier, rank),
        }
    }

    /// forget all arrivals at `barrier`, e.g. those left behind by an earlier run
    pub fn reset_barrier(&self, barrier: &str) -> Result<(), ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.reset_barrier(barrier),
            Self::Memory(connection) => connection.reset_barrier(barrier),
        }
    }

    /// number of distinct ranks that arrived at `barrier`
    pub fn arrivals(&self, barrier: &str) -> Result<usize, ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.arrivals(barrier),
            Self::Memory(connection) => connection.arrivals(barrier),
        }
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        match self {
            Self::SQLite(connection) => connection.close(),
            Self::Memory(_) => Ok(()),
        }
    }
}
