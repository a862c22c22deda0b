mod commands;
mod config;
mod obs;

use clap::{Parser, Subcommand};
use commands::Command;
use std::path::PathBuf;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (git ",
    env!("MERIDIAN_GIT_SHA"),
    ", ",
    env!("MERIDIAN_TARGET"),
    ")"
);

#[derive(Parser)]
#[command(name = "meridian")]
#[command(
    about = "Signal-driven backtester and parameter optimizer",
    version,
    long_version = LONG_VERSION,
    arg_required_else_help = true
)]
#[command(
    after_help = "Examples:
  meridian backtest --config configs/sample.toml
  meridian optimize --config configs/sample.toml --parallel
  meridian validate --config configs/sample.toml --strict
  meridian report --input runs/<run_id>/
"
)]
struct Cli {
    /// Log filter used when MERIDIAN_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output: text | json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Serve Prometheus metrics on host:port while the command runs.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one backtest and write its artifacts.
    Backtest {
        #[arg(long)]
        config: PathBuf,
        /// Overrides paths.out_dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Grid-search the [optimize] parameters and write the leaderboard.
    Optimize {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Overrides optimize.parallel.
        #[arg(long)]
        parallel: bool,
        /// Overrides optimize.objective.
        #[arg(long)]
        objective: Option<String>,
    },
    /// Check a config and its price data without running anything.
    Validate {
        #[arg(long)]
        config: PathBuf,
        /// Treat data quality issues as errors.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Rebuild report.txt from a run directory's saved equity curve.
    Report {
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = obs::init_tracing(&cli.log_level, &cli.log_format) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }

    let command = match cli.command {
        CliCommand::Backtest { config, out } => Command::Backtest { config, out },
        CliCommand::Optimize {
            config,
            out,
            parallel,
            objective,
        } => Command::Optimize {
            config,
            out,
            parallel,
            objective,
        },
        CliCommand::Validate { config, strict } => Command::Validate { config, strict },
        CliCommand::Report { input } => Command::Report { input },
    };

    if let Err(err) = commands::run(command) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
