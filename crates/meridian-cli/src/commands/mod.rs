mod backtest;
mod common;
mod optimize;
mod report;
mod validate;

use std::path::PathBuf;

pub enum Command {
    Backtest {
        config: PathBuf,
        out: Option<PathBuf>,
    },
    Optimize {
        config: PathBuf,
        out: Option<PathBuf>,
        parallel: bool,
        objective: Option<String>,
    },
    Validate {
        config: PathBuf,
        strict: bool,
    },
    Report {
        input: PathBuf,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Backtest { .. } => "backtest",
            Command::Optimize { .. } => "optimize",
            Command::Validate { .. } => "validate",
            Command::Report { .. } => "report",
        }
    }
}

pub fn run(command: Command) -> Result<(), String> {
    let name = command.name();
    let start = std::time::Instant::now();
    let result = dispatch(command);
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("meridian.cli.commands_total", "command" => name, "status" => status)
        .increment(1);
    metrics::histogram!("meridian.cli.command_ms", "command" => name)
        .record(start.elapsed().as_secs_f64() * 1000.0);
    result
}

fn dispatch(command: Command) -> Result<(), String> {
    match command {
        Command::Backtest { config, out } => backtest::run_backtest(config, out),
        Command::Optimize {
            config,
            out,
            parallel,
            objective,
        } => optimize::run_optimize(config, out, parallel, objective),
        Command::Validate { config, strict } => validate::run_validate(config, strict),
        Command::Report { input } => report::run_report(input),
    }
}
