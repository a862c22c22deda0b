use crate::config::Config;
use meridian_core::engine_name;
use meridian_core::performance::PerformanceConfig;
use meridian_core::report::{
    read_equity_csv, read_trades_csv, recompute_report, write_report_txt, EQUITY_FILE,
    REPORT_FILE, SUMMARY_FILE, TRADES_FILE,
};
use std::path::{Path, PathBuf};

pub(super) fn run_report(input: PathBuf) -> Result<(), String> {
    let equity_path = input.join(EQUITY_FILE);
    if !equity_path.exists() {
        return Err(format!("{} not found in {}", EQUITY_FILE, input.display()));
    }
    let equity = read_equity_csv(&equity_path).map_err(|err| err.to_string())?;
    let trades = read_trades_csv(&input.join(TRADES_FILE)).map_err(|err| err.to_string())?;

    let config = performance_config_from_summary(&input.join(SUMMARY_FILE));
    // Benchmark returns are not stored with the run, so the benchmark
    // section is dropped on regeneration.
    let report = recompute_report(&equity, config, None).map_err(|err| err.to_string())?;
    write_report_txt(&input.join(REPORT_FILE), &report).map_err(|err| err.to_string())?;

    println!("{}", report.render());
    println!(
        "{} cli: report regenerated (dir={}, trades={}, ticks={})",
        engine_name(),
        input.display(),
        trades.len(),
        equity.len()
    );
    Ok(())
}

/// Reuses the metric settings the run was made with, when recorded.
fn performance_config_from_summary(path: &Path) -> PerformanceConfig {
    match read_summary_config(path) {
        Ok(Some(config)) => config,
        Ok(None) => {
            tracing::warn!(
                path = %path.display(),
                "summary has no config snapshot; using default metric settings"
            );
            PerformanceConfig::default()
        }
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "could not read run summary; using default metric settings"
            );
            PerformanceConfig::default()
        }
    }
}

fn read_summary_config(path: &Path) -> Result<Option<PerformanceConfig>, String> {
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    let json: serde_json::Value = serde_json::from_str(&raw).map_err(|err| err.to_string())?;
    match json.get("config_snapshot") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(snapshot) => serde_json::from_value::<Config>(snapshot.clone())
            .map(|config| Some(config.performance_config()))
            .map_err(|err| format!("invalid config_snapshot: {}", err)),
    }
}
