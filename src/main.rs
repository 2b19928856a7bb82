use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};

use adcube::prepare::{default_fallback_dir, default_rollup_dir, run_prepare};
use adcube::run::{run_queries, RunOptions};
use adcube_store::FACT_FILE_NAME;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Prepare(args) => prepare(args),
        Command::Run(args) => run(args),
    };
    process::exit(code);
}

#[derive(Parser)]
#[command(
    name = "adcube",
    about = "Two-phase OLAP rollup engine for ad-event analytics"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest raw CSVs and publish the rollup cubes and sorted fact store.
    Prepare(PrepareArgs),
    /// Execute a batch of JSON queries against the published artifacts.
    Run(RunArgs),
}

#[derive(Args)]
struct PrepareArgs {
    /// Directory containing the raw event CSV files.
    #[arg(long, value_name = "DIR")]
    data_dir: PathBuf,
    /// Directory the cube files are published to.
    #[arg(long, value_name = "DIR", default_value = "rollups")]
    output_dir: PathBuf,
    /// Directory the sorted fact store is published to.
    #[arg(long, value_name = "DIR", default_value = "fallback")]
    fallback_dir: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    /// JSON file holding an array of query documents.
    #[arg(long, value_name = "FILE")]
    query_file: Option<PathBuf>,
    /// Directory of q*.json files, one query document each.
    #[arg(long, value_name = "DIR")]
    query_dir: Option<PathBuf>,
    /// Directory the q<N>.csv result files are written to.
    #[arg(long, value_name = "DIR", default_value = "results")]
    output_dir: PathBuf,
    /// Directory holding the published cube files.
    #[arg(long, value_name = "DIR")]
    rollup_dir: Option<PathBuf>,
    /// Path to the published sorted fact store.
    #[arg(long, value_name = "FILE")]
    fallback_path: Option<PathBuf>,
}

fn prepare(args: PrepareArgs) -> i32 {
    match run_prepare(&args.data_dir, &args.output_dir, &args.fallback_dir) {
        Ok(summary) => {
            println!(
                "prepared {} cubes from {} rows (scan {:.1}s, publish {:.1}s)",
                summary.cubes, summary.rows, summary.scan_secs, summary.publish_secs
            );
            println!("rollups: {}", args.output_dir.display());
            println!("fallback: {}", args.fallback_dir.display());
            0
        }
        Err(err) => {
            tracing::error!(error = %err, "prepare failed");
            1
        }
    }
}

fn run(args: RunArgs) -> i32 {
    if args.query_file.is_none() && args.query_dir.is_none() {
        tracing::error!("run requires --query-file or --query-dir");
        return 1;
    }

    let options = RunOptions {
        query_file: args.query_file,
        query_dir: args.query_dir,
        output_dir: args.output_dir,
        rollup_dir: args.rollup_dir.unwrap_or_else(default_rollup_dir),
        fallback_path: args
            .fallback_path
            .unwrap_or_else(|| default_fallback_dir().join(FACT_FILE_NAME)),
    };

    match run_queries(&options) {
        Ok(report) => {
            let mut total_ms = 0.0;
            for outcome in &report.outcomes {
                total_ms += outcome.millis;
                match &outcome.error {
                    None => println!(
                        "q{}: {:.3}ms ({} rows) -> {}",
                        outcome.index, outcome.millis, outcome.rows, outcome.source
                    ),
                    Some(error) => println!("q{}: FAILED ({error})", outcome.index),
                }
            }
            let succeeded = report
                .outcomes
                .iter()
                .filter(|outcome| outcome.error.is_none())
                .count();
            println!(
                "{succeeded}/{} queries in {total_ms:.3}ms total",
                report.outcomes.len()
            );
            if report.any_failed() { 1 } else { 0 }
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            1
        }
    }
}
