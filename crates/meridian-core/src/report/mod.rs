use crate::backtest::BacktestRun;
use crate::error::{BacktestError, Result};
use crate::optimize::{GridRunEntry, OptimizationResult};
use crate::performance::{PerformanceConfig, PerformanceEngine, PerformanceReport};
use crate::types::{EquityPoint, SignalRecord, TradeRecord};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const TRADES_FILE: &str = "trades.csv";
pub const EQUITY_FILE: &str = "equity.csv";
pub const SIGNALS_FILE: &str = "signals.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const REPORT_FILE: &str = "report.txt";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryMeta {
    pub run_id: String,
    pub symbol: String,
    pub strategy: String,
    pub start: i64,
    pub end: i64,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trades: usize,
}

impl SummaryMeta {
    pub fn from_run(run_id: &str, symbol: &str, initial_capital: f64, run: &BacktestRun) -> Self {
        Self {
            run_id: run_id.to_string(),
            symbol: symbol.to_string(),
            strategy: run.strategy.clone(),
            start: run.equity.first().map(|p| p.timestamp).unwrap_or_default(),
            end: run.equity.last().map(|p| p.timestamp).unwrap_or_default(),
            initial_capital,
            final_equity: run.final_equity(),
            trades: run.trades.len(),
        }
    }
}

pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    timed_write("trades", || {
        let mut writer = csv::Writer::from_path(path)?;
        if trades.is_empty() {
            writer.write_record([
                "timestamp",
                "side",
                "price",
                "shares",
                "notional_value",
                "commission",
                "cash_after",
            ])?;
        }
        for trade in trades {
            writer.serialize(trade)?;
        }
        writer.flush()?;
        Ok(())
    })
}

pub fn write_equity_csv(path: &Path, points: &[EquityPoint]) -> Result<()> {
    timed_write("equity", || {
        let mut writer = csv::Writer::from_path(path)?;
        if points.is_empty() {
            writer.write_record([
                "timestamp",
                "cash",
                "shares_held",
                "holdings_value",
                "total_equity",
            ])?;
        }
        for point in points {
            writer.serialize(point)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// One row per tick. Indicator columns follow the first row's indicators.
pub fn write_signals_csv(path: &Path, signals: &[SignalRecord]) -> Result<()> {
    timed_write("signals", || {
        let indicator_names: Vec<&str> = signals
            .first()
            .map(|s| s.indicators.iter().map(|(name, _)| name.as_str()).collect())
            .unwrap_or_default();

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["timestamp", "price", "signal", "position_delta"];
        header.extend(indicator_names.iter().copied());
        writer.write_record(&header)?;

        for record in signals {
            let mut row = vec![
                record.timestamp.to_string(),
                record.price.to_string(),
                record.signal.to_string(),
                record.position_delta.to_string(),
            ];
            for name in &indicator_names {
                row.push(
                    record
                        .indicator(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    })
}

pub fn write_summary_json(
    path: &Path,
    report: &PerformanceReport,
    meta: Option<&SummaryMeta>,
    config_snapshot: Option<&serde_json::Value>,
) -> Result<()> {
    timed_write("summary", || {
        // Non-finite metrics serialize as null; keep a readable copy alongside.
        let display: serde_json::Map<String, serde_json::Value> = report
            .to_map()
            .into_iter()
            .map(|(name, value)| (name, serde_json::Value::String(format_metric(value))))
            .collect();
        let json = serde_json::json!({
            "meta": meta,
            "config_snapshot": config_snapshot,
            "metrics": report,
            "metrics_display": display,
        });
        fs::write(path, serde_json::to_string_pretty(&json)?)?;
        Ok(())
    })
}

pub fn write_report_txt(path: &Path, report: &PerformanceReport) -> Result<()> {
    timed_write("report", || {
        fs::write(path, report.render())?;
        Ok(())
    })
}

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub dir: PathBuf,
    pub trades: PathBuf,
    pub equity: PathBuf,
    pub signals: PathBuf,
    pub summary: PathBuf,
    pub report: PathBuf,
}

impl RunArtifacts {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            trades: dir.join(TRADES_FILE),
            equity: dir.join(EQUITY_FILE),
            signals: dir.join(SIGNALS_FILE),
            summary: dir.join(SUMMARY_FILE),
            report: dir.join(REPORT_FILE),
        }
    }
}

/// Writes every artifact of one run into `dir`, creating it if needed.
pub fn write_run_artifacts(
    dir: &Path,
    run: &BacktestRun,
    meta: &SummaryMeta,
    config_snapshot: Option<&serde_json::Value>,
) -> Result<RunArtifacts> {
    fs::create_dir_all(dir)?;
    let artifacts = RunArtifacts::in_dir(dir);
    write_trades_csv(&artifacts.trades, &run.trades)?;
    write_equity_csv(&artifacts.equity, &run.equity)?;
    write_signals_csv(&artifacts.signals, &run.signals)?;
    write_summary_json(&artifacts.summary, &run.report, Some(meta), config_snapshot)?;
    write_report_txt(&artifacts.report, &run.report)?;
    tracing::info!(dir = %dir.display(), "run artifacts written");
    Ok(artifacts)
}

pub fn read_trades_csv(path: &Path) -> Result<Vec<TradeRecord>> {
    let start = Instant::now();
    let result = read_rows::<TradeRecord>(path);
    record_read_metrics("trades", start, &result);
    result
}

pub fn read_equity_csv(path: &Path) -> Result<Vec<EquityPoint>> {
    let start = Instant::now();
    let result = read_rows::<EquityPoint>(path);
    record_read_metrics("equity", start, &result);
    result
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = fs::File::open(path).map_err(|err| {
        BacktestError::Data(format!("failed to open {}: {}", path.display(), err))
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize::<T>() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Rebuilds the performance report of a saved run from its equity curve.
pub fn recompute_report(
    equity: &[EquityPoint],
    config: PerformanceConfig,
    benchmark: Option<&[f64]>,
) -> Result<PerformanceReport> {
    PerformanceEngine::new(config)?.from_equity(equity, benchmark)
}

pub fn write_optimization_artifacts(dir: &Path, result: &OptimizationResult) -> Result<()> {
    fs::create_dir_all(dir)?;
    write_results_csv(&dir.join("results.csv"), result)?;
    timed_write("best", || {
        let json = serde_json::json!({
            "objective": result.objective,
            "best": result.best.as_ref().map(entry_json),
            "runs": result.runs.len(),
        });
        fs::write(dir.join("best.json"), serde_json::to_string_pretty(&json)?)?;
        Ok(())
    })
}

fn entry_json(entry: &GridRunEntry) -> serde_json::Value {
    serde_json::json!({
        "run_id": entry.run_id,
        "params": entry.params,
        "score": entry.score.map(format_metric),
        "metrics": entry.report,
    })
}

pub fn write_results_csv(path: &Path, result: &OptimizationResult) -> Result<()> {
    timed_write("results", || {
        let param_names: BTreeSet<&str> = result
            .runs
            .iter()
            .flat_map(|r| r.params.keys().map(String::as_str))
            .collect();

        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["run_id", "status"];
        header.extend(param_names.iter().copied());
        header.extend([
            "score",
            "total_return",
            "sharpe_ratio",
            "max_drawdown",
            "error",
        ]);
        writer.write_record(&header)?;

        for run in &result.runs {
            let metric = |name: &str| {
                run.report
                    .as_ref()
                    .and_then(|r| r.metric(name))
                    .map(format_metric)
                    .unwrap_or_default()
            };
            let mut row = vec![run.run_id.clone(), run.status.as_str().to_string()];
            for name in &param_names {
                row.push(
                    run.params
                        .get(*name)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            row.push(run.score.map(format_metric).unwrap_or_default());
            row.push(metric("total_return"));
            row.push(metric("sharpe_ratio"));
            row.push(metric("max_drawdown"));
            row.push(run.error.clone().unwrap_or_default());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    })
}

fn format_metric(value: f64) -> String {
    if value.is_nan() {
        "undefined".to_string()
    } else {
        value.to_string()
    }
}

fn timed_write(kind: &'static str, write: impl FnOnce() -> Result<()>) -> Result<()> {
    let start = Instant::now();
    let result = write();
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!("meridian.report.write.calls_total", "kind" => kind, "result" => result_label)
        .increment(1);
    metrics::histogram!("meridian.report.write_ms", "kind" => kind)
        .record(start.elapsed().as_secs_f64() * 1000.0);
    result
}

fn record_read_metrics<T>(kind: &'static str, start: Instant, result: &Result<T>) {
    let result_label = if result.is_ok() { "ok" } else { "err" };
    metrics::counter!("meridian.report.read.calls_total", "kind" => kind, "result" => result_label)
        .increment(1);
    metrics::histogram!("meridian.report.read_ms", "kind" => kind)
        .record(start.elapsed().as_secs_f64() * 1000.0);
}
