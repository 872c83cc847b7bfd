use super::ExecutorError;
use crate::{
    cost::CostFunction,
    database::{Archive, ArchiveEntry, WalkerKey, WalkerRecord, WalkerSummary},
    solver::LocalSolver,
};
use std::time::{Duration, Instant};
use tracing::info;

/// Runs a walker in bursts of `stride` generations and saves it after every burst.
///
/// A crash loses at most the burst in progress, the archive always holds the history and state
/// of the last completed burst.
#[derive(Debug)]
pub struct CheckpointLoop<'a> {
    archive: &'a Archive,
    key: &'a WalkerKey,
    stride: Option<usize>,
}

impl<'a> CheckpointLoop<'a> {
    pub fn new(archive: &'a Archive, key: &'a WalkerKey, stride: Option<usize>) -> Self {
        Self {
            archive,
            key,
            stride,
        }
    }

    /// Run until the solver terminates, returns the merged summary of the last save
    pub fn run<C: CostFunction + ?Sized>(
        &self,
        solver: &mut LocalSolver,
        cost: &mut C,
    ) -> Result<WalkerSummary, ExecutorError> {
        let stride = match self.stride {
            Some(stride) => stride.max(1),
            None => {
                let start = Instant::now();
                solver.run_to_completion(cost)?;

                return self.checkpoint(solver, start.elapsed());
            }
        };

        loop {
            let start = Instant::now();

            for _ in 0..stride {
                if solver.step(cost)? {
                    break;
                }
            }

            let summary = self.checkpoint(solver, start.elapsed())?;

            if solver.is_terminated() {
                return Ok(summary);
            }
        }
    }

    /// save everything evaluated since the last checkpoint, the state is dropped once terminated
    pub fn checkpoint(
        &self,
        solver: &mut LocalSolver,
        elapsed: Duration,
    ) -> Result<WalkerSummary, ExecutorError> {
        let entry = ArchiveEntry {
            record: WalkerRecord::from_solver(solver, Some(elapsed.as_secs_f64())),
            state: (!solver.is_terminated()).then(|| solver.export_state()),
        };

        let summary = self.archive.save(self.key, entry)?;
        solver.mark_checkpointed();

        info!(
            key = %self.key,
            generations = summary.generations,
            evaluations = summary.evaluations,
            elapsed = summary.elapsed.unwrap_or_default(),
            best = ?summary.best_value,
            terminated = summary.completion.is_terminated(),
            "Checkpoint saved"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod checkpoint_test {
    use super::*;
    use crate::{
        cost::CostError,
        database::Completion,
        solver::{Bounds, SolverFamily, SolverOptions},
    };

    fn solver() -> LocalSolver {
        LocalSolver::initialize(
            vec![4.0, -3.0],
            Bounds {
                lower: vec![-10.0, -10.0],
                upper: vec![10.0, 10.0],
            },
            &SolverOptions {
                family: SolverFamily::NelderMead,
                stop_change: 1e-3,
                stop_generations: 5,
                max_iterations: None,
                max_evaluations: None,
            },
        )
        .unwrap()
    }

    fn sphere(point: &[f64]) -> Result<f64, CostError> {
        Ok(point.iter().map(|x| x * x).sum::<f64>() + 1.0)
    }

    #[test]
    fn strided_and_unstrided_runs_agree() {
        let key = WalkerKey::new(0, 0, "run");
        let mut cost = sphere;

        let strided = Archive::memory();
        let mut first = solver();
        let summary = CheckpointLoop::new(&strided, &key, Some(3))
            .run(&mut first, &mut cost)
            .unwrap();

        let unstrided = Archive::memory();
        let mut second = solver();
        let other = CheckpointLoop::new(&unstrided, &key, None)
            .run(&mut second, &mut cost)
            .unwrap();

        assert_eq!(summary.completion, Completion::Terminated);
        assert_eq!(summary.best_value, other.best_value);
        assert_eq!(summary.evaluations, other.evaluations);

        let strided = strided.load(&key).unwrap().unwrap();
        let unstrided = unstrided.load(&key).unwrap().unwrap();
        assert_eq!(strided.record.history, unstrided.record.history);
        assert_eq!(strided.state, None);
        assert_eq!(
            strided.record.history.len() as u64,
            strided.record.summary.evaluations
        );
    }

    #[test]
    fn failed_burst_keeps_previous_checkpoint() {
        let key = WalkerKey::new(0, 0, "run");
        let archive = Archive::memory();
        let mut calls = 0;
        // the first generation evaluates the three simplex vertices, the second one fails
        let mut cost = |point: &[f64]| {
            calls += 1;
            if calls > 3 {
                Err(CostError::Failed("node lost".to_owned()))
            } else {
                sphere(point)
            }
        };

        let mut walker = solver();
        assert!(CheckpointLoop::new(&archive, &key, Some(1))
            .run(&mut walker, &mut cost)
            .is_err());

        let entry = archive.load(&key).unwrap().unwrap();
        let state = entry.state.unwrap();
        assert_eq!(state.generations, 1);
        assert_eq!(entry.record.history.len() as u64, state.evaluations);
        assert_eq!(entry.record.summary.completion, Completion::Running);
    }
}
