use super::{checkpoint::CheckpointLoop, Executor, ExecutorError};
use crate::{
    config::RunnerConfig,
    cost::CostFunction,
    database::{Archive, ConfigurationSnapshot, WalkerKey, WalkerSummary},
    distributed::{
        barrier::{Barrier, CONFIGURATION_BARRIER, FINISHED_BARRIER},
        WorkerContext,
    },
    solver::{Bounds, LocalSolver},
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// How a walker continues when the driver reaches it
#[derive(Debug)]
pub enum WalkerStart {
    /// no usable state, initial point drawn from the sampling strategy
    Fresh(LocalSolver),
    /// solver state restored from the archive
    Resumed(LocalSolver),
    /// walker finished in an earlier run
    Terminated(WalkerSummary),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsembleSummary {
    pub fresh: usize,
    pub resumed: usize,
    pub skipped: usize,
    /// evaluations recorded for all walkers, including those of earlier runs
    pub evaluations: u64,
    /// lowest value over all walkers of this rank
    pub best: Option<(WalkerKey, f64)>,
}

impl EnsembleSummary {
    fn record(&mut self, key: &WalkerKey, summary: &WalkerSummary) {
        self.evaluations += summary.evaluations;

        if let Some(value) = summary.best_value {
            if self.best.as_ref().map_or(true, |(_, best)| value < *best) {
                self.best = Some((key.clone(), value));
            }
        }
    }
}

/// Runs the walkers `0..num_solvers` of one rank one after another
pub struct EnsembleDriver<C> {
    config: RunnerConfig,
    worker: WorkerContext,
    archive: Archive,
    cost: C,
}

impl<C: CostFunction> EnsembleDriver<C> {
    pub fn new(config: RunnerConfig, worker: WorkerContext, archive: Archive, cost: C) -> Self {
        Self {
            config,
            worker,
            archive,
            cost,
        }
    }

    pub fn key(&self, index: usize) -> WalkerKey {
        WalkerKey::new(self.worker.rank, index, self.config.run.tag())
    }

    fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.config.run.barrier_timeout)
    }

    /// Store the configuration (rank 0) or wait for it (all other ranks), then check that the
    /// archive was created for this parameter layout.
    pub fn prepare(&self) -> Result<(), ExecutorError> {
        let barrier = Barrier::new(&self.archive, CONFIGURATION_BARRIER, self.barrier_timeout());

        // node-local archives are never written by rank 0 of another node
        if self.worker.is_root() || self.config.archive.node_local {
            self.archive
                .save_configuration(&ConfigurationSnapshot::new(&self.config)?)?;
            barrier.arrive(self.worker.rank)?;
        } else {
            info!(rank = self.worker.rank, "Waiting for rank 0 to store the configuration");
            barrier.wait(1)?;
        }

        self.archive.validate_configuration(&self.config.parameters)?;

        Ok(())
    }

    /// Decide how walker `index` continues
    pub fn start(&self, index: usize) -> Result<WalkerStart, ExecutorError> {
        let key = self.key(index);

        match self.archive.load(&key)? {
            None => Ok(WalkerStart::Fresh(self.fresh(index)?)),
            Some(entry) if entry.record.summary.completion.is_terminated() => {
                Ok(WalkerStart::Terminated(entry.record.summary))
            }
            Some(entry) => match entry.state {
                Some(state) => Ok(WalkerStart::Resumed(LocalSolver::import_state(state)?)),
                None => {
                    warn!(
                        key = %key,
                        generations = entry.record.summary.generations,
                        evaluations = entry.record.summary.evaluations,
                        recorded = entry.record.history.len(),
                        "Walker is not terminated but has no solver state, starting it again"
                    );

                    Ok(WalkerStart::Fresh(self.fresh(index)?))
                }
            },
        }
    }

    /// solver for walker `index` at a point drawn from the configured sampling strategy
    pub fn fresh(&self, index: usize) -> Result<LocalSolver, ExecutorError> {
        let sampling = &self.config.solver.sampling;
        let ordinal = self.worker.rank * self.config.run.num_solvers + index;

        // the sequence of a walker only depends on (seed, rank, index)
        let mut rng = ChaCha8Rng::seed_from_u64(self.worker.seed(self.config.run.seed));
        rng.set_stream(index as u64);

        // an empty archive past the switch falls back to uniform sampling inside `tolerance`
        let history = if sampling.needs_history(index) {
            self.archive.points()?
        } else {
            Vec::new()
        };

        let point = sampling.sample(&self.config.parameters, ordinal, &history, &mut rng)?;

        info!(
            method = sampling.name(),
            recorded = history.len(),
            point = ?point,
            "Sampled initial point"
        );

        Ok(LocalSolver::initialize(
            point,
            Bounds::from(&self.config.parameters),
            &self.config.solver.options(),
        )?)
    }

    /// Run walker `index` until it terminated and add it to `summary`
    pub fn run_walker(
        &mut self,
        index: usize,
        summary: &mut EnsembleSummary,
    ) -> Result<(), ExecutorError> {
        let key = self.key(index);

        let mut solver = match self.start(index)? {
            WalkerStart::Terminated(walker) => {
                info!(key = %key, "Walker already terminated, skipping it");
                summary.skipped += 1;
                summary.record(&key, &walker);

                return Ok(());
            }
            WalkerStart::Resumed(solver) => {
                let (generations, evaluations) = solver.diagnostics();
                info!(
                    key = %key,
                    generations = generations,
                    evaluations = evaluations,
                    "Resuming walker"
                );
                summary.resumed += 1;

                solver
            }
            WalkerStart::Fresh(solver) => {
                info!(key = %key, "Starting fresh walker");
                summary.fresh += 1;

                solver
            }
        };

        info!(
            "Process {} of {} running walker {} of {}",
            self.worker.rank + 1,
            self.worker.size,
            index + 1,
            self.config.run.num_solvers
        );

        let walker = CheckpointLoop::new(&self.archive, &key, self.config.run.checkpoint_stride)
            .run(&mut solver, &mut self.cost)?;

        info!(
            key = %key,
            reason = ?solver.termination_reason(),
            elapsed = walker.elapsed.unwrap_or_default(),
            best = ?walker.best_value,
            "Walker terminated"
        );
        summary.record(&key, &walker);

        Ok(())
    }

    /// Arrive at the end-of-run barrier, rank 0 waits for everyone. Timeouts are only reported.
    ///
    /// Once rank 0 is done waiting it clears both barriers, so the startup barrier of the next
    /// job on this archive waits for rank 0 again.
    pub fn finish(&self) -> Result<(), ExecutorError> {
        if !self.config.run.wait_for_all {
            return Ok(());
        }

        let barrier = Barrier::new(&self.archive, FINISHED_BARRIER, self.barrier_timeout());
        barrier.arrive(self.worker.rank)?;

        if self.worker.is_root() && !self.config.archive.node_local {
            match barrier.wait(self.worker.size) {
                Ok(arrived) => info!("All {arrived} ranks finished"),
                Err(error) => warn!(error = %error, "Not all ranks finished in time"),
            }

            self.archive.reset_barrier(FINISHED_BARRIER)?;
            self.archive.reset_barrier(CONFIGURATION_BARRIER)?;
        }

        Ok(())
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn into_archive(self) -> Archive {
        self.archive
    }
}

impl<C: CostFunction> Executor for EnsembleDriver<C> {
    type Summary = EnsembleSummary;

    #[instrument(
        skip(self),
        fields(rank = self.worker.rank, size = self.worker.size),
        level = "info"
    )]
    fn execute(&mut self) -> Result<EnsembleSummary, ExecutorError> {
        self.prepare()?;

        let mut summary = EnsembleSummary::default();
        for index in 0..self.config.run.num_solvers {
            self.run_walker(index, &mut summary)?;
        }

        self.finish()?;

        info!(
            fresh = summary.fresh,
            resumed = summary.resumed,
            skipped = summary.skipped,
            evaluations = summary.evaluations,
            "Finished all walkers"
        );

        Ok(summary)
    }
}
