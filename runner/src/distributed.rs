pub mod barrier;
pub mod util;

use std::env;
use thiserror::Error;
use tracing::warn;

/// Environment variables carrying (rank, size), checked in this order
pub const RANK_VARIABLES: [(&str, &str); 4] = [
    ("WAYPOINT_RANK", "WAYPOINT_SIZE"),
    ("OMPI_COMM_WORLD_RANK", "OMPI_COMM_WORLD_SIZE"),
    ("PMI_RANK", "PMI_SIZE"),
    ("SLURM_PROCID", "SLURM_NTASKS"),
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributedError {
    #[error("Rank {rank} is out of range for {size} workers")]
    RankOutOfRange { rank: usize, size: usize },
    #[error("Environment variable {name} is not a number: {value}")]
    InvalidVariable { name: String, value: String },
}

/// Position of this process among all worker processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub rank: usize,
    pub size: usize,
}

impl Default for WorkerContext {
    fn default() -> Self {
        Self { rank: 0, size: 1 }
    }
}

impl WorkerContext {
    pub fn new(rank: usize, size: usize) -> Result<Self, DistributedError> {
        if rank >= size {
            return Err(DistributedError::RankOutOfRange { rank, size });
        }

        Ok(Self { rank, size })
    }

    pub fn from_env() -> Result<Self, DistributedError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// first launcher whose rank variable is set wins, a missing size is treated as unknown
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DistributedError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |name: &str, value: String| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| DistributedError::InvalidVariable {
                    name: name.to_owned(),
                    value,
                })
        };

        for (rank_name, size_name) in RANK_VARIABLES {
            if let Some(rank) = lookup(rank_name) {
                let rank = parse(rank_name, rank)?;
                let size = match lookup(size_name) {
                    Some(size) => parse(size_name, size)?,
                    None => {
                        warn!("{rank_name} is set without {size_name}, assuming {}", rank + 1);
                        rank + 1
                    }
                };

                return Self::new(rank, size);
            }
        }

        Ok(Self::default())
    }

    /// override parts of the detected context, e.g. from the command line
    pub fn with_overrides(
        self,
        rank: Option<usize>,
        size: Option<usize>,
    ) -> Result<Self, DistributedError> {
        Self::new(rank.unwrap_or(self.rank), size.unwrap_or(self.size))
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// base seed of this rank's walkers
    pub fn seed(&self, base: u64) -> u64 {
        base.wrapping_add(self.rank as u64)
    }
}
