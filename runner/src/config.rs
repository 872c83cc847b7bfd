use crate::{
    cost::CostConfig,
    distributed::util::prepend_hostname,
    parameters::ParameterSpace,
    sampling::SamplingStrategy,
    solver::{SolverFamily, SolverOptions},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read configuration file {path:?}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Configuration is invalid: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Override '{0}' must look like section.option=value")]
    InvalidOverride(String),
    #[error("Cost function is invalid: {0}")]
    InvalidCost(String),
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to retrieve the hostname")]
    Hostname(#[from] nix::Error),
    #[error("Configuration failed the preflight checks")]
    Preflight,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // parameter names and bounds, the order defines the index of every parameter
    pub parameters: ParameterSpace,
    pub solver: SolverConfig,
    pub run: RunConfig,
    #[serde(alias = "db", default)]
    pub archive: ArchiveConfig,
    pub cost: CostConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SolverConfig {
    pub local_solver: SolverFamily,
    #[serde(default = "default_stop_change")]
    pub stop_change: f64,
    #[serde(default = "default_stop_generations")]
    pub stop_generations: usize,
    pub max_iterations: Option<u64>,
    pub max_evaluations: Option<u64>,
    #[serde(default)]
    pub sampling: SamplingStrategy,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub num_solvers: usize,
    // steps between two checkpoints, without it every walker is only saved once it terminated
    pub checkpoint_stride: Option<usize>,
    #[serde(alias = "tag")]
    pub run_tag: Option<String>,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub wait_for_all: bool,
    // seconds
    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
    // prefix the archive file name with the hostname, one archive per node
    #[serde(default)]
    pub node_local: bool,
    // milliseconds to wait on a locked archive
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
            node_local: false,
            busy_timeout: default_busy_timeout(),
        }
    }
}

impl SolverConfig {
    pub fn options(&self) -> SolverOptions {
        SolverOptions {
            family: self.local_solver,
            stop_change: self.stop_change,
            stop_generations: self.stop_generations,
            max_iterations: self.max_iterations,
            max_evaluations: self.max_evaluations,
        }
    }
}

impl RunConfig {
    /// tag shared by all walker keys of this run, the seed if no tag was configured
    pub fn tag(&self) -> String {
        self.run_tag
            .clone()
            .unwrap_or_else(|| self.seed.to_string())
    }
}

/// Apply an override of the form `section.option=value` to a parsed configuration document.
///
/// The value is parsed as YAML, so numbers and lists keep their type.
pub fn apply_override(
    document: &mut serde_yaml::Value,
    expression: &str,
) -> Result<(), ConfigErrors> {
    let invalid = || ConfigErrors::InvalidOverride(expression.to_owned());

    let (path, value) = expression.split_once('=').ok_or_else(invalid)?;
    let segments = path.trim().split('.').collect::<Vec<_>>();

    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid());
    }

    let value: serde_yaml::Value = serde_yaml::from_str(value.trim())?;
    let (last, parents) = segments.split_last().ok_or_else(invalid)?;

    let mut current = document;
    for segment in parents {
        let mapping = current.as_mapping_mut().ok_or_else(invalid)?;
        let key = serde_yaml::Value::from(*segment);

        if !mapping.contains_key(&key) {
            mapping.insert(
                key.clone(),
                serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
            );
        }

        current = mapping.get_mut(&key).ok_or_else(invalid)?;
    }

    current
        .as_mapping_mut()
        .ok_or_else(invalid)?
        .insert(serde_yaml::Value::from(*last), value);

    Ok(())
}

impl RunnerConfig {
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self, ConfigErrors> {
        let text = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&text, overrides)
    }

    pub fn parse(text: &str, overrides: &[String]) -> Result<Self, ConfigErrors> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(text)?;

        for expression in overrides {
            apply_override(&mut document, expression)?;
        }

        Ok(serde_yaml::from_value(document)?)
    }

    /// archive path with the hostname applied if the archive is node local
    pub fn archive_path(&self) -> Result<PathBuf, ConfigErrors> {
        let mut path = self.archive.path.clone();

        if self.archive.node_local {
            prepend_hostname(&mut path)?;
        }

        Ok(path)
    }

    /// Check everything serde can't, returns true if an error was found.
    ///
    /// All problems are logged instead of stopping at the first one to make debugging easier
    /// for users.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.run.num_solvers == 0 {
            error!("run.num_solvers must be at least 1");
            contains_error = true;
        }

        if self.run.checkpoint_stride == Some(0) {
            error!("run.checkpoint_stride cannot be 0, remove it to disable checkpointing");
            contains_error = true;
        }

        if !(self.solver.stop_change.is_finite() && self.solver.stop_change >= 0.0) {
            error!(
                "solver.stop_change must be a non-negative number, got {}",
                self.solver.stop_change
            );
            contains_error = true;
        }

        if self.solver.stop_generations == 0 {
            error!("solver.stop_generations must be at least 1");
            contains_error = true;
        }

        if self.solver.max_iterations == Some(0) || self.solver.max_evaluations == Some(0) {
            error!("solver.max_iterations and solver.max_evaluations cannot be 0");
            contains_error = true;
        }

        match &self.solver.sampling {
            SamplingStrategy::Linspace { steps: 0, .. } => {
                error!("solver.sampling.steps must be at least 1");
                contains_error = true;
            }
            SamplingStrategy::Linspace {
                steps,
                step: Some(step),
            } if step >= steps => {
                error!("solver.sampling.step ({step}) must be smaller than steps ({steps})");
                contains_error = true;
            }
            SamplingStrategy::Linspace { steps, step: None } => {
                if *steps < self.run.num_solvers {
                    warn!(
                        "solver.sampling.steps ({steps}) is smaller than run.num_solvers, walkers will share starting points"
                    );
                }
            }
            SamplingStrategy::Tolerance { candidates: 0, .. } => {
                warn!("solver.sampling.candidates is 0, only the lattice will be searched");
            }
            _ => {}
        }

        if self.run.barrier_timeout == 0 {
            warn!("run.barrier_timeout is 0, ranks other than 0 will only check the barrier once");
        }

        if let CostConfig::Exec { exec, timeout, .. } = &self.cost {
            match check_executable(exec) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "Cost function target {} is not executable",
                        exec.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to find cost.exec. Either not a file or not found at {}: {e}",
                        exec.to_string_lossy()
                    );
                    contains_error = true;
                }
            }

            if *timeout == 0 {
                error!("cost.timeout cannot be 0");
                contains_error = true;
            }
        }

        if let Some(tag) = &self.run.run_tag {
            if tag.is_empty() {
                error!("run.run_tag cannot be empty");
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("waypoint.db")
}

fn default_busy_timeout() -> u64 {
    60_000
}

fn default_barrier_timeout() -> u64 {
    600
}

fn default_stop_change() -> f64 {
    1e-4
}

fn default_stop_generations() -> usize {
    10
}
