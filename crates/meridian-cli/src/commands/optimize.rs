use meridian_core::engine_name;
use meridian_core::optimize::{OptimizationResult, RunStatus};
use meridian_core::report::{write_optimization_artifacts, write_run_artifacts, SummaryMeta};
use meridian_core::strategy::{KindFactory, StrategyFactory};
use std::path::PathBuf;

const LEADERBOARD_ROWS: usize = 10;

pub(super) fn run_optimize(
    config_path: PathBuf,
    out: Option<PathBuf>,
    parallel: bool,
    objective: Option<String>,
) -> Result<(), String> {
    let config = crate::config::load_config(&config_path)?;
    let out_dir = super::common::out_dir(&config, out);
    super::common::print_config_summary("optimize", &config, Some(&out_dir));

    let grid = config
        .parameter_grid()
        .ok_or_else(|| "config has no [optimize] section".to_string())?;
    let mut options = config.grid_search_options(objective.as_deref())?;
    options.parallel |= parallel;

    let overall_start = std::time::Instant::now();
    let (prices, quality) = super::common::load_prices(&config)?;
    super::common::print_quality("prices", &quality);

    let backtester = super::common::build_backtester(&config, &prices)?;
    let factory = KindFactory::new(config.strategy.kind.clone(), config.strategy_params());
    let result = backtester
        .optimize(&factory, &grid, &prices, &options)
        .map_err(|err| err.to_string())?;

    let sweep_dir = out_dir.join("optimize").join(&config.run.run_id);
    write_optimization_artifacts(&sweep_dir, &result).map_err(|err| err.to_string())?;
    print_leaderboard(&result);

    if let Some(best) = &result.best {
        // Re-run the winner so its full artifacts sit next to the leaderboard.
        let strategy = factory.build(&best.params).map_err(|err| err.to_string())?;
        let run = backtester
            .run(strategy.as_ref(), &prices)
            .map_err(|err| err.to_string())?;
        let run_id = format!("{}__{}", config.run.run_id, best.run_id);
        let meta =
            SummaryMeta::from_run(&run_id, &config.run.symbol, config.run.initial_capital, &run);
        write_run_artifacts(&sweep_dir.join("best"), &run, &meta, None)
            .map_err(|err| err.to_string())?;
        println!(
            "best: run_id={} params={:?} {}={}",
            best.run_id,
            best.params,
            result.objective,
            best.score.map(|s| format!("{:.4}", s)).unwrap_or_default()
        );
    } else {
        println!("best: none (no combination produced a usable {})", result.objective);
    }

    println!("sweep output: {}", sweep_dir.display());
    println!(
        "{} cli: optimize runs={} ok={} failed={} cancelled={} total_ms={}",
        engine_name(),
        result.runs.len(),
        result.count(RunStatus::Ok),
        result.count(RunStatus::Failed),
        result.count(RunStatus::Cancelled),
        overall_start.elapsed().as_millis()
    );
    Ok(())
}

fn print_leaderboard(result: &OptimizationResult) {
    let mut ranked: Vec<_> = result
        .runs
        .iter()
        .filter(|r| r.status == RunStatus::Ok)
        .filter_map(|r| r.score.filter(|s| !s.is_nan()).map(|s| (s, r)))
        .collect();
    // Stable sort keeps enumeration order among equal scores.
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    println!("rank  run_id        {:>14}  params", result.objective);
    for (rank, (score, run)) in ranked.iter().take(LEADERBOARD_ROWS).enumerate() {
        println!("{:>4}  {:<12}  {:>14.4}  {:?}", rank + 1, run.run_id, score, run.params);
    }
    for run in result.runs.iter().filter(|r| r.status == RunStatus::Failed) {
        println!(
            "failed: run_id={} params={:?} error={}",
            run.run_id,
            run.params,
            run.error.as_deref().unwrap_or("unknown")
        );
    }
}
