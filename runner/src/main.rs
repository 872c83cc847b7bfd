use clap::Parser;
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use waypoint_runner::{
    config::{ConfigErrors, RunnerConfig},
    cost::CostFunctions,
    database::Archive,
    distributed::{util::hostname, WorkerContext},
    executors::{ensemble::EnsembleDriver, Executor, ExecutorError},
};

/// Run this process' share of a checkpointed ensemble of local solvers
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// configuration file (YAML)
    config: PathBuf,

    /// override a configuration value, e.g. `--set run.num_solvers=8`
    #[arg(long = "set", value_name = "SECTION.OPTION=VALUE")]
    overrides: Vec<String>,

    /// rank of this process, detected from the launcher if not given
    #[arg(long)]
    rank: Option<usize>,

    /// number of processes, detected from the launcher if not given
    #[arg(long)]
    size: Option<usize>,

    /// log debug messages unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<(), ExecutorError> {
    let config = RunnerConfig::load(&args.config, &args.overrides)?;

    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight.into());
    }

    let worker = WorkerContext::from_env()?.with_overrides(args.rank, args.size)?;
    let host = hostname()?;
    info!(
        rank = worker.rank,
        size = worker.size,
        hostname = %host.to_string_lossy(),
        "Starting worker"
    );

    let path = config.archive_path()?;
    let archive = Archive::open(&path, Duration::from_millis(config.archive.busy_timeout))?;
    info!(path = ?path, "Opened archive");

    let cost = CostFunctions::load(&config.cost, &config.parameters)?;
    let mut driver = EnsembleDriver::new(config, worker, archive, cost);
    let summary = driver.execute()?;

    if let Some((key, value)) = &summary.best {
        info!(key = %key, value = value, "Best walker of this rank");
    }

    driver.into_archive().close()?;

    if worker.is_root() {
        info!("Finished!");
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");

            ExitCode::FAILURE
        }
    }
}
