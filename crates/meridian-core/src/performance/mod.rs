use crate::error::{BacktestError, Result};
use crate::types::{EquityPoint, PricePoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Standard deviations below this are rounding noise from a constant series.
const STD_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: TRADING_DAYS_PER_YEAR,
        }
    }
}

impl PerformanceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return Err(BacktestError::InvalidConfiguration(format!(
                "periods per year must be > 0, got {}",
                self.periods_per_year
            )));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(BacktestError::InvalidConfiguration(
                "risk-free rate must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    pub alpha: f64,
    pub beta: f64,
    pub information_ratio: f64,
}

/// Return-based metrics for one equity series.
///
/// Degenerate inputs never produce a silent NaN: zero-variance ratios are 0,
/// a profit factor without losing periods is `+inf`, and a Sortino ratio
/// without a usable downside deviation is `None` ("undefined").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub periods: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub benchmark: Option<BenchmarkMetrics>,
}

pub const METRIC_NAMES: &[&str] = &[
    "total_return",
    "annualized_return",
    "volatility",
    "sharpe_ratio",
    "sortino_ratio",
    "max_drawdown",
    "win_rate",
    "profit_factor",
    "alpha",
    "beta",
    "information_ratio",
];

pub fn is_metric_name(name: &str) -> bool {
    METRIC_NAMES.contains(&name) || matches!(name, "sharpe" | "sortino")
}

impl PerformanceReport {
    /// Looks a metric up by name. Undefined metrics come back as NaN;
    /// benchmark metrics are `None` when no benchmark was supplied.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let value = match name {
            "total_return" => self.total_return,
            "annualized_return" => self.annualized_return,
            "volatility" => self.volatility,
            "sharpe_ratio" | "sharpe" => self.sharpe_ratio,
            "sortino_ratio" | "sortino" => self.sortino_ratio.unwrap_or(f64::NAN),
            "max_drawdown" => self.max_drawdown,
            "win_rate" => self.win_rate,
            "profit_factor" => self.profit_factor,
            "alpha" => self.benchmark?.alpha,
            "beta" => self.benchmark?.beta,
            "information_ratio" => self.benchmark?.information_ratio,
            _ => return None,
        };
        Some(value)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        METRIC_NAMES
            .iter()
            .filter_map(|name| self.metric(name).map(|value| (name.to_string(), value)))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("PERFORMANCE REPORT\n");
        out.push_str("==================\n\n");

        out.push_str("Return Metrics:\n");
        let _ = writeln!(out, "- Total Return: {}", pct(self.total_return));
        let _ = writeln!(out, "- Annualized Return: {}", pct(self.annualized_return));
        out.push('\n');

        out.push_str("Risk Metrics:\n");
        let _ = writeln!(out, "- Annualized Volatility: {}", pct(self.volatility));
        let _ = writeln!(out, "- Maximum Drawdown: {}", pct(self.max_drawdown));
        let _ = writeln!(out, "- Sharpe Ratio: {}", ratio(self.sharpe_ratio));
        let _ = writeln!(
            out,
            "- Sortino Ratio: {}",
            self.sortino_ratio
                .map(ratio)
                .unwrap_or_else(|| "undefined".to_string())
        );
        out.push('\n');

        if let Some(bench) = &self.benchmark {
            out.push_str("Benchmark Comparison:\n");
            let _ = writeln!(out, "- Alpha: {}", pct(bench.alpha));
            let _ = writeln!(out, "- Beta: {}", ratio(bench.beta));
            let _ = writeln!(out, "- Information Ratio: {}", ratio(bench.information_ratio));
            out.push('\n');
        }

        out.push_str("Trade Metrics:\n");
        let _ = writeln!(out, "- Win Rate: {}", pct(self.win_rate));
        let _ = writeln!(out, "- Profit Factor: {}", ratio(self.profit_factor));
        out
    }
}

fn pct(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

fn ratio(value: f64) -> String {
    format!("{:.2}", value)
}

/// Per-period simple returns of an equity curve; the first period is 0.
pub fn returns_from_equity(points: &[EquityPoint]) -> Vec<f64> {
    pct_change(points.iter().map(|p| p.total_equity))
}

/// Per-period simple returns of a price series; the first period is 0.
pub fn returns_from_prices(points: &[PricePoint]) -> Vec<f64> {
    pct_change(points.iter().map(|p| p.price))
}

/// Non-finite values read as a flat period; the next finite value is
/// measured against the last finite one, so a gap never swallows a move.
fn pct_change(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out = Vec::new();
    let mut prev: Option<f64> = None;
    for value in values {
        if !value.is_finite() {
            out.push(0.0);
            continue;
        }
        let ret = match prev {
            Some(prev) if prev != 0.0 => value / prev - 1.0,
            _ => 0.0,
        };
        out.push(ret);
        prev = Some(value);
    }
    out
}

pub struct PerformanceEngine {
    config: PerformanceConfig,
}

impl PerformanceEngine {
    pub fn new(config: PerformanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    pub fn from_equity(
        &self,
        equity: &[EquityPoint],
        benchmark: Option<&[f64]>,
    ) -> Result<PerformanceReport> {
        self.compute(&returns_from_equity(equity), benchmark)
    }

    pub fn compute(&self, returns: &[f64], benchmark: Option<&[f64]>) -> Result<PerformanceReport> {
        let n = returns.len();
        if n == 0 {
            return Err(BacktestError::InsufficientData(
                "no return periods to evaluate".to_string(),
            ));
        }
        if let Some(bench) = benchmark {
            if bench.len() != n {
                return Err(BacktestError::BenchmarkLength {
                    expected: n,
                    actual: bench.len(),
                });
            }
        }

        let a = self.config.periods_per_year;
        let rf = self.config.risk_free_rate;

        let total_return = returns.iter().map(|r| 1.0 + r).product::<f64>() - 1.0;
        let annualized_return = annualize(total_return, n, a);
        let volatility = sample_std(returns).map(|s| s * a.sqrt()).unwrap_or(0.0);

        let excess: Vec<f64> = returns.iter().map(|r| r - rf / a).collect();
        let sharpe_ratio = scaled_ratio(&excess, a);

        let negatives: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let sortino_ratio = sample_std(&negatives)
            .filter(|s| *s > 0.0)
            .map(|s| (annualized_return - rf) / (s * a.sqrt()));

        let (wins, nonzero) = returns.iter().fold((0usize, 0usize), |(w, nz), r| {
            (w + usize::from(*r > 0.0), nz + usize::from(*r != 0.0))
        });
        let win_rate = if nonzero > 0 {
            wins as f64 / nonzero as f64
        } else {
            0.0
        };

        let gross_profit: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let gross_loss: f64 = returns.iter().filter(|r| **r < 0.0).sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            f64::INFINITY
        };

        let benchmark = benchmark.map(|bench| {
            let beta = match sample_std(bench) {
                Some(std) if std > 0.0 => sample_covariance(returns, bench) / (std * std),
                _ => 0.0,
            };
            let alpha = annualized_return - beta * (mean(bench) * a);
            let active: Vec<f64> = returns.iter().zip(bench).map(|(p, b)| p - b).collect();
            BenchmarkMetrics {
                alpha,
                beta,
                information_ratio: scaled_ratio(&active, a),
            }
        });

        Ok(PerformanceReport {
            periods: n,
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: max_drawdown(returns),
            win_rate,
            profit_factor,
            benchmark,
        })
    }
}

fn annualize(total_return: f64, periods: usize, periods_per_year: f64) -> f64 {
    let growth = 1.0 + total_return;
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(periods_per_year / periods as f64) - 1.0
}

/// `mean / stdev * sqrt(periods_per_year)`, 0 when the stdev is 0 or undefined.
fn scaled_ratio(values: &[f64], periods_per_year: f64) -> f64 {
    match sample_std(values) {
        Some(std) if std > 0.0 => mean(values) / std * periods_per_year.sqrt(),
        _ => 0.0,
    }
}

/// Most negative `(cum - peak) / peak` over the compounded return curve.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cum = 1.0;
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for r in returns {
        cum *= 1.0 + r;
        if cum > peak {
            peak = cum;
        }
        if peak > 0.0 {
            worst = worst.min((cum - peak) / peak);
        }
    }
    worst
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    Some(ss / (values.len() as f64 - 1.0))
}

fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values)
        .map(f64::sqrt)
        .map(|std| if std < STD_EPSILON { 0.0 } else { std })
}

fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
    sum / (a.len() as f64 - 1.0)
}
