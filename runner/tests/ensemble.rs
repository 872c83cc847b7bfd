use std::{
    cell::Cell,
    thread,
    time::{Duration, Instant},
};
use waypoint_runner::{
    config::RunnerConfig,
    cost::CostError,
    database::{
        memory::MemoryConnection, Archive, ArchiveEntry, Completion, ConnectionError, WalkerKey,
        WalkerRecord, WalkerSummary,
    },
    distributed::{
        barrier::{CONFIGURATION_BARRIER, FINISHED_BARRIER},
        WorkerContext,
    },
    executors::{
        ensemble::{EnsembleDriver, EnsembleSummary},
        Executor, ExecutorError,
    },
    solver::History,
};

const CONFIG: &str = "
parameters:
  x: [-10, 10]
  y: [-10, 10]
solver:
  local_solver: nelder_mead
  stop_change: 0.0001
  stop_generations: 10
  sampling:
    method: uniform
run:
  num_solvers: 1
  checkpoint_stride: 3
  tag: run1
  seed: 7
cost:
  name: quadratic
";

fn config(overrides: &[&str]) -> RunnerConfig {
    let overrides: Vec<String> = overrides.iter().map(|o| o.to_string()).collect();

    RunnerConfig::parse(CONFIG, &overrides).unwrap()
}

fn sphere(point: &[f64]) -> Result<f64, CostError> {
    Ok(point.iter().map(|x| x * x).sum())
}

fn key(index: usize) -> WalkerKey {
    WalkerKey::new(0, index, "run1")
}

#[test]
fn resumed_walker_matches_unbroken_run() {
    let config = config(&[]);

    // evaluations of the first burst, a failure on the next call hits the second burst
    let mut probe = EnsembleDriver::new(
        config.clone(),
        WorkerContext::default(),
        Archive::memory(),
        sphere,
    )
    .fresh(0)
    .unwrap();
    let mut cost = sphere;
    for _ in 0..3 {
        assert!(!probe.step(&mut cost).unwrap());
    }
    let first_burst = probe.diagnostics().1 as usize;

    let shared = MemoryConnection::default();
    let calls = Cell::new(0);
    let failing = |point: &[f64]| {
        calls.set(calls.get() + 1);
        if calls.get() > first_burst {
            Err(CostError::Failed("node lost".to_owned()))
        } else {
            sphere(point)
        }
    };

    let mut crashed = EnsembleDriver::new(
        config.clone(),
        WorkerContext::default(),
        Archive::Memory(shared.clone()),
        failing,
    );
    assert!(matches!(crashed.execute(), Err(ExecutorError::Solver(_))));

    let checkpoint = crashed.archive().load(&key(0)).unwrap().unwrap();
    assert_eq!(checkpoint.record.summary.generations, 3);
    assert_eq!(checkpoint.record.summary.completion, Completion::Running);
    assert!(checkpoint.state.is_some());

    let mut resumed = EnsembleDriver::new(
        config.clone(),
        WorkerContext::default(),
        Archive::Memory(shared),
        sphere,
    );
    let summary = resumed.execute().unwrap();
    assert_eq!(summary.resumed, 1);
    assert_eq!(summary.fresh, 0);

    let mut unbroken =
        EnsembleDriver::new(config, WorkerContext::default(), Archive::memory(), sphere);
    let reference = unbroken.execute().unwrap();
    assert_eq!(reference.fresh, 1);

    let resumed = resumed.archive().load(&key(0)).unwrap().unwrap();
    let unbroken = unbroken.archive().load(&key(0)).unwrap().unwrap();

    assert_eq!(resumed.record.history, unbroken.record.history);
    assert_eq!(resumed.record.summary.best_value, unbroken.record.summary.best_value);
    assert_eq!(resumed.record.summary.best_point, unbroken.record.summary.best_point);
    assert_eq!(resumed.record.summary.generations, unbroken.record.summary.generations);
    assert_eq!(resumed.record.summary.evaluations, unbroken.record.summary.evaluations);
    assert_eq!(resumed.record.summary.completion, Completion::Terminated);
    assert_eq!(resumed.state, None);
    assert_eq!(summary.best, reference.best);
}

#[test]
fn walkers_of_one_rank_share_an_archive_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.db");

    let archive = Archive::open(&path, Duration::from_secs(5)).unwrap();
    let mut driver = EnsembleDriver::new(
        config(&["run.num_solvers=2"]),
        WorkerContext::default(),
        archive,
        sphere,
    );
    let summary = driver.execute().unwrap();
    assert_eq!(summary.fresh, 2);
    driver.into_archive().close().unwrap();

    let archive = Archive::open_read_only(&path).unwrap();
    assert_eq!(archive.keys().unwrap(), vec![key(0), key(1)]);
    assert!(archive.load_configuration().unwrap().is_some());

    for index in 0..2 {
        let entry = archive.load(&key(index)).unwrap().unwrap();
        assert!(entry.record.summary.completion.is_terminated());
        assert_eq!(
            entry.record.history.len() as u64,
            entry.record.summary.evaluations
        );
    }
}

#[test]
fn terminated_walkers_are_not_evaluated_again() {
    let config = config(&["run.num_solvers=2"]);
    let shared = MemoryConnection::default();

    let mut first = EnsembleDriver::new(
        config.clone(),
        WorkerContext::default(),
        Archive::Memory(shared.clone()),
        sphere,
    );
    let before = first.execute().unwrap();

    let calls = Cell::new(0);
    let counting = |point: &[f64]| {
        calls.set(calls.get() + 1);
        sphere(point)
    };
    let mut second = EnsembleDriver::new(
        config,
        WorkerContext::default(),
        Archive::Memory(shared),
        counting,
    );
    let after = second.execute().unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(after.skipped, 2);
    assert_eq!(after.evaluations, before.evaluations);
    assert_eq!(after.best, before.best);
}

#[test]
fn walker_without_state_starts_over_and_keeps_its_history() {
    let archive = Archive::memory();
    let earlier = History {
        points: vec![vec![1.0, 1.0], vec![2.0, 2.0]],
        values: vec![2.0, 8.0],
    };
    archive
        .save(
            &key(0),
            ArchiveEntry {
                record: WalkerRecord {
                    history: earlier.clone(),
                    summary: WalkerSummary {
                        best_point: vec![1.0, 1.0],
                        best_value: Some(2.0),
                        completion: Completion::Running,
                        elapsed: Some(1.0),
                        generations: 1,
                        evaluations: 2,
                    },
                },
                state: None,
            },
        )
        .unwrap();

    let mut driver = EnsembleDriver::new(config(&[]), WorkerContext::default(), archive, sphere);
    let summary = driver.execute().unwrap();
    assert_eq!(summary.fresh, 1);

    let entry = driver.archive().load(&key(0)).unwrap().unwrap();
    assert_eq!(entry.record.history.points[..2], earlier.points[..]);
    assert_eq!(
        entry.record.history.len() as u64,
        2 + entry.record.summary.evaluations
    );
    assert!(entry.record.summary.best_value.unwrap() < 2.0);
    assert!(entry.record.summary.elapsed.unwrap() >= 1.0);
}

#[test]
fn tolerance_sampling_avoids_points_of_other_walkers() {
    let config = config(&[
        "solver.sampling={method: tolerance, iteration_switch: 0}",
        "run.num_solvers=2",
    ]);
    let archive = Archive::memory();

    let cluster = History {
        points: (0..20)
            .map(|i| vec![-9.0 + 0.05 * i as f64, -9.0 + 0.02 * i as f64])
            .collect(),
        values: vec![1.0; 20],
    };
    archive
        .save(
            &WalkerKey::new(1, 0, "run1"),
            ArchiveEntry {
                record: WalkerRecord {
                    history: cluster,
                    summary: WalkerSummary::default(),
                },
                state: None,
            },
        )
        .unwrap();

    let driver = EnsembleDriver::new(config, WorkerContext::default(), archive, sphere);
    // a solver that never stepped reports its initial point as the best one
    let point = driver.fresh(1).unwrap().export_state().best_point;

    let distance = ((point[0] + 9.0).powi(2) + (point[1] + 9.0).powi(2)).sqrt();
    assert!(distance > 10.0, "{point:?} is close to the recorded cluster");
}

#[test]
fn archive_of_another_parameter_layout_is_rejected() {
    let shared = MemoryConnection::default();

    let mut first = EnsembleDriver::new(
        config(&[]),
        WorkerContext::default(),
        Archive::Memory(shared.clone()),
        sphere,
    );
    first.execute().unwrap();

    let mut other = config(&[]);
    other.parameters = RunnerConfig::parse(
        &CONFIG.replace("  y: [-10, 10]", "  y: [-10, 10]\n  z: [0, 1]"),
        &[],
    )
    .unwrap()
    .parameters;

    let calls = Cell::new(0);
    let counting = |point: &[f64]| {
        calls.set(calls.get() + 1);
        sphere(point)
    };
    let mut second = EnsembleDriver::new(
        other,
        WorkerContext::default(),
        Archive::Memory(shared),
        counting,
    );

    assert!(matches!(
        second.execute(),
        Err(ExecutorError::Connection(
            ConnectionError::ConfigurationMismatch { .. }
        ))
    ));
    assert_eq!(calls.get(), 0);
}

fn spawn_rank(
    config: &RunnerConfig,
    shared: &MemoryConnection,
    rank: usize,
) -> thread::JoinHandle<EnsembleSummary> {
    let config = config.clone();
    let archive = Archive::Memory(shared.clone());

    thread::spawn(move || {
        EnsembleDriver::new(config, WorkerContext::new(rank, 2).unwrap(), archive, sphere)
            .execute()
            .unwrap()
    })
}

fn assert_barriers_cleared(shared: &MemoryConnection) {
    let archive = Archive::Memory(shared.clone());

    assert_eq!(archive.arrivals(CONFIGURATION_BARRIER).unwrap(), 0);
    assert_eq!(archive.arrivals(FINISHED_BARRIER).unwrap(), 0);
}

#[test]
fn rerun_waits_for_rank_zero_at_both_barriers() {
    let config = config(&[
        "run.num_solvers=2",
        "run.wait_for_all=true",
        "run.barrier_timeout=5",
    ]);
    let shared = MemoryConnection::default();

    let other = spawn_rank(&config, &shared, 1);
    let root = spawn_rank(&config, &shared, 0);
    assert_eq!(root.join().unwrap().fresh, 2);
    assert_eq!(other.join().unwrap().fresh, 2);
    assert_barriers_cleared(&shared);

    // all walkers terminated, the second job only passes through the barriers
    let other = spawn_rank(&config, &shared, 1);
    thread::sleep(Duration::from_millis(300));
    assert!(
        !other.is_finished(),
        "rank 1 finished the second job before rank 0 stored the configuration"
    );

    let start = Instant::now();
    let root = EnsembleDriver::new(
        config,
        WorkerContext::new(0, 2).unwrap(),
        Archive::Memory(shared.clone()),
        sphere,
    )
    .execute()
    .unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(4),
        "rank 0 waited {:?} for rank 1",
        start.elapsed()
    );

    assert_eq!(root.skipped, 2);
    assert_eq!(other.join().unwrap().skipped, 2);
    assert_barriers_cleared(&shared);
}
