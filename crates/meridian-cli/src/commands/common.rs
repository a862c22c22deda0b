use crate::config::Config;
use meridian_core::backtest::Backtester;
use meridian_core::data::prices::{
    format_timestamp, CsvPriceSource, DataQualityReport, PriceSource,
};
use meridian_core::engine_name;
use meridian_core::types::PricePoint;
use std::collections::HashMap;
use std::path::PathBuf;

pub(super) fn print_config_summary(command: &str, config: &Config, out: Option<&PathBuf>) {
    println!(
        "{} cli: {} (run_id={}, symbol={}, initial_capital={})",
        engine_name(),
        command,
        config.run.run_id,
        config.run.symbol,
        config.run.initial_capital
    );
    println!(
        "data: prices_csv={}, price_column={}, benchmark_csv={}, out_dir={}",
        config.paths.prices_csv,
        config.paths.price_column.as_deref().unwrap_or("auto"),
        config.paths.benchmark_csv.as_deref().unwrap_or("none"),
        config.paths.out_dir
    );
    println!(
        "costs: commission_rate={}, sizing={:?}, units={}",
        config.costs.commission_rate,
        config.sizing.mode,
        config.sizing.units.unwrap_or(1.0)
    );
    println!(
        "strategy: kind={}, params={:?}",
        config.strategy.kind,
        config.strategy_params()
    );
    if let Some(out_dir) = out {
        println!("output dir: {}", out_dir.display());
    }
}

pub(super) fn out_dir(config: &Config, out: Option<PathBuf>) -> PathBuf {
    out.unwrap_or_else(|| PathBuf::from(&config.paths.out_dir))
}

pub(super) fn load_prices(config: &Config) -> Result<(Vec<PricePoint>, DataQualityReport), String> {
    let mut source = CsvPriceSource::new(&config.paths.prices_csv);
    if let Some(column) = &config.paths.price_column {
        source = source.with_price_column(column);
    }
    let (prices, report) = source.load_prices().map_err(|err| err.to_string())?;
    if prices.is_empty() {
        return Err(format!("no price rows in {}", config.paths.prices_csv));
    }
    Ok((prices, report))
}

pub(super) fn load_benchmark(
    config: &Config,
) -> Result<Option<(Vec<PricePoint>, DataQualityReport)>, String> {
    let Some(path) = &config.paths.benchmark_csv else {
        return Ok(None);
    };
    CsvPriceSource::new(path)
        .load_prices()
        .map(Some)
        .map_err(|err| err.to_string())
}

/// Reindexes `benchmark` onto the traded timestamps. Missing dates become
/// NaN, which the return calculation treats as a flat period.
pub(super) fn align_benchmark(prices: &[PricePoint], benchmark: &[PricePoint]) -> Vec<PricePoint> {
    let by_ts: HashMap<i64, f64> = benchmark.iter().map(|p| (p.timestamp, p.price)).collect();
    let aligned: Vec<PricePoint> = prices
        .iter()
        .map(|p| PricePoint::new(p.timestamp, by_ts.get(&p.timestamp).copied().unwrap_or(f64::NAN)))
        .collect();
    let missing = aligned.iter().filter(|p| p.price.is_nan()).count();
    if missing > 0 {
        tracing::warn!(missing, total = aligned.len(), "benchmark is missing traded dates");
    }
    aligned
}

pub(super) fn build_backtester(
    config: &Config,
    prices: &[PricePoint],
) -> Result<Backtester, String> {
    let backtester = Backtester::new(config.simulation_config()?, config.performance_config())
        .map_err(|err| err.to_string())?;
    Ok(match load_benchmark(config)? {
        Some((benchmark, _)) => backtester.with_benchmark(&align_benchmark(prices, &benchmark)),
        None => backtester,
    })
}

pub(super) fn print_quality(label: &str, report: &DataQualityReport) {
    for line in quality_lines(label, report) {
        println!("{}", line);
    }
}

fn quality_lines(label: &str, report: &DataQualityReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{} report: rows={}, duplicates={}, out_of_order={}, invalid_price={}",
        label, report.rows, report.duplicates, report.out_of_order, report.invalid_price
    )];
    if let (Some(first), Some(last)) = (report.first_timestamp, report.last_timestamp) {
        lines.push(format!(
            "{} range: {} .. {}",
            label,
            format_timestamp(first),
            format_timestamp(last)
        ));
    }
    let firsts = [
        ("duplicate", report.first_duplicate),
        ("out_of_order", report.first_out_of_order),
        ("invalid_price", report.first_invalid_price),
    ];
    for (kind, ts) in firsts {
        if let Some(ts) = ts {
            lines.push(format!("{} first {}: {}", label, kind, format_timestamp(ts)));
        }
    }
    lines
}
