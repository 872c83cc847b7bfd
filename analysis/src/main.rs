use clap::Parser;
use itertools::Itertools;
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::error;
use tracing_subscriber::EnvFilter;
use waypoint_runner::{
    database::{
        report::{read_archives, Report, WalkerReport},
        Completion, ConnectionError,
    },
    parameters::ParameterSpace,
};

#[derive(Error, Debug)]
enum InspectError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("No walkers found in {0} archive(s)")]
    Empty(usize),
}

/// Summarize the walkers stored in one or more archives
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// archives of one run, e.g. all node-local archives
    #[arg(short, long = "input-files", num_args = 1.., required = true)]
    input_files: Vec<PathBuf>,

    /// only list the best walkers
    #[arg(short, long)]
    top: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

fn completion(completion: Completion) -> &'static str {
    match completion {
        Completion::Pending => "pending",
        Completion::Running => "running",
        Completion::Terminated => "terminated",
    }
}

fn render_point(parameters: Option<&ParameterSpace>, point: &[f64]) -> String {
    match parameters {
        Some(parameters) => parameters
            .names()
            .into_iter()
            .zip(point)
            .map(|(name, value)| format!("{name}={value:.6}"))
            .join(" "),
        None => point.iter().map(|value| format!("{value:.6}")).join(" "),
    }
}

fn print_walker(report: &Report, walker: &WalkerReport) {
    let summary = &walker.summary;

    println!(
        "{:<24} {:<10} {:>6} {:>8} {:>10.2} {:>14} {}",
        walker.key.to_string(),
        completion(summary.completion),
        summary.generations,
        summary.evaluations,
        summary.elapsed.unwrap_or_default(),
        summary
            .best_value
            .map_or_else(|| "-".to_owned(), |value| format!("{value:.6e}")),
        render_point(report.parameters.as_ref(), &summary.best_point)
    );
}

fn run(args: Args) -> Result<(), InspectError> {
    let report = read_archives(&args.input_files[..])?;

    if report.walkers.is_empty() {
        return Err(InspectError::Empty(args.input_files.len()));
    }

    println!(
        "{:<24} {:<10} {:>6} {:>8} {:>10} {:>14} best point",
        "walker", "status", "gens", "evals", "elapsed", "best value"
    );

    let ordered = report
        .walkers
        .iter()
        .sorted_by(|a, b| {
            a.summary
                .best_value
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.summary.best_value.unwrap_or(f64::INFINITY))
        })
        .take(args.top.unwrap_or(usize::MAX));

    for walker in ordered {
        print_walker(&report, walker);
    }

    let resumable = report.walkers.iter().filter(|walker| walker.resumable).count();
    println!();
    println!(
        "{} walkers in {} archive(s): {} terminated, {} resumable, {} evaluations",
        report.walkers.len(),
        args.input_files.len(),
        report.terminated(),
        resumable,
        report.evaluations()
    );

    if let Some(best) = report.best() {
        println!(
            "best: {} with {:.6e} at {}",
            best.key,
            best.summary.best_value.unwrap_or_default(),
            render_point(report.parameters.as_ref(), &best.summary.best_point)
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = ?error, "{error}");

            ExitCode::FAILURE
        }
    }
}
