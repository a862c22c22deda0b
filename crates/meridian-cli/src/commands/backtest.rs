use meridian_core::engine_name;
use meridian_core::report::{write_run_artifacts, SummaryMeta};
use meridian_core::strategy::StrategyKind;
use std::path::PathBuf;

pub(super) fn run_backtest(config_path: PathBuf, out: Option<PathBuf>) -> Result<(), String> {
    let (config, config_toml) = crate::config::load_config_with_source(&config_path)?;
    let out_dir = super::common::out_dir(&config, out);
    super::common::print_config_summary("backtest", &config, Some(&out_dir));

    let overall_start = std::time::Instant::now();

    let (prices, quality) = super::common::load_prices(&config)?;
    super::common::print_quality("prices", &quality);

    let strategy = StrategyKind::from_params(&config.strategy.kind, &config.strategy_params())
        .map_err(|err| err.to_string())?;
    let backtester = super::common::build_backtester(&config, &prices)?;
    let run = backtester
        .run(&strategy, &prices)
        .map_err(|err| err.to_string())?;

    let run_dir = out_dir.join(&config.run.run_id);
    let meta = SummaryMeta::from_run(
        &config.run.run_id,
        &config.run.symbol,
        config.run.initial_capital,
        &run,
    );
    let snapshot = serde_json::to_value(&config)
        .map_err(|err| format!("failed to snapshot config: {err}"))?;
    write_run_artifacts(&run_dir, &run, &meta, Some(&snapshot)).map_err(|err| err.to_string())?;
    std::fs::write(run_dir.join("config_snapshot.toml"), config_toml)
        .map_err(|err| format!("failed to write config snapshot: {err}"))?;

    println!("{}", run.report.render());
    println!("run output: {}", run_dir.display());
    println!(
        "{} cli: backtest trades={} final_equity={:.2} total_ms={}",
        engine_name(),
        run.trades.len(),
        run.final_equity(),
        overall_start.elapsed().as_millis()
    );
    Ok(())
}
