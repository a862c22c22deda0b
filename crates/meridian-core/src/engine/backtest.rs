use crate::error::{BacktestError, Result};
use crate::performance::{
    returns_from_equity, returns_from_prices, PerformanceConfig, PerformanceEngine,
    PerformanceReport,
};
use crate::portfolio::{PortfolioSimulator, SimulationConfig};
use crate::strategy::{ParameterSet, Strategy};
use crate::types::{EquityPoint, PricePoint, SignalRecord, TradeRecord};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Everything one backtest produced, in tick order.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestRun {
    pub strategy: String,
    pub parameters: ParameterSet,
    pub signals: Vec<SignalRecord>,
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
    pub returns: Vec<f64>,
    pub report: PerformanceReport,
}

impl BacktestRun {
    pub fn final_equity(&self) -> f64 {
        self.equity.last().map(|p| p.total_equity).unwrap_or_default()
    }
}

/// Wires a strategy into the simulator and the performance engine.
///
/// Holds only configuration, so one instance can serve many runs (and many
/// threads during a grid search).
pub struct Backtester {
    simulator: PortfolioSimulator,
    performance: PerformanceEngine,
    benchmark_returns: Option<Vec<f64>>,
}

impl Backtester {
    pub fn new(simulation: SimulationConfig, performance: PerformanceConfig) -> Result<Self> {
        Ok(Self {
            simulator: PortfolioSimulator::new(simulation)?,
            performance: PerformanceEngine::new(performance)?,
            benchmark_returns: None,
        })
    }

    /// Compares every run against `prices`, which must line up tick for tick
    /// with the traded series.
    pub fn with_benchmark(mut self, prices: &[PricePoint]) -> Self {
        self.benchmark_returns = Some(returns_from_prices(prices));
        self
    }

    pub fn has_benchmark(&self) -> bool {
        self.benchmark_returns.is_some()
    }

    pub fn simulation_config(&self) -> &SimulationConfig {
        self.simulator.config()
    }

    pub fn performance_config(&self) -> &PerformanceConfig {
        self.performance.config()
    }

    pub fn run<S>(&self, strategy: &S, prices: &[PricePoint]) -> Result<BacktestRun>
    where
        S: Strategy + ?Sized,
    {
        let span = tracing::info_span!(
            "backtest.run",
            strategy = strategy.name(),
            ticks = prices.len()
        );
        let _enter = span.enter();
        let start = Instant::now();

        if prices.is_empty() {
            return Err(BacktestError::EmptyInput("price series has no rows".to_string()));
        }

        let signals = strategy.generate_signals(prices)?;
        if signals.len() != prices.len() {
            return Err(BacktestError::Data(format!(
                "strategy {} produced {} signals for {} prices",
                strategy.name(),
                signals.len(),
                prices.len()
            )));
        }

        let output = self.simulator.run(&signals)?;
        let returns = returns_from_equity(&output.equity);
        let report = self
            .performance
            .compute(&returns, self.benchmark_returns.as_deref())?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let strategy_label = strategy.name().to_string();
        metrics::histogram!("meridian.backtest.engine_ms", "strategy" => strategy_label)
            .record(elapsed_ms);
        metrics::gauge!("meridian.backtest.ticks").set(signals.len() as f64);
        metrics::gauge!("meridian.backtest.trades").set(output.trades.len() as f64);

        info!(
            trades = output.trades.len(),
            total_return = report.total_return,
            sharpe_ratio = report.sharpe_ratio,
            max_drawdown = report.max_drawdown,
            elapsed_ms,
            "backtest complete"
        );

        Ok(BacktestRun {
            strategy: strategy.name().to_string(),
            parameters: strategy.parameters(),
            signals,
            equity: output.equity,
            trades: output.trades,
            returns,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Backtester;
    use crate::error::BacktestError;
    use crate::performance::PerformanceConfig;
    use crate::portfolio::SimulationConfig;
    use crate::strategy::{BuyAndHold, HoldStrategy, MovingAverageCrossover};
    use crate::types::PricePoint;

    fn series(values: &[f64]) -> Vec<PricePoint> {
        values
            .iter()
            .enumerate()
            .map(|(idx, price)| PricePoint::new(1_700_000_000 + idx as i64 * 86_400, *price))
            .collect()
    }

    fn backtester() -> Backtester {
        Backtester::new(SimulationConfig::new(10_000.0, 0.0), PerformanceConfig::default())
            .expect("backtester")
    }

    #[test]
    fn hold_keeps_equity_flat() {
        let run = backtester()
            .run(&HoldStrategy, &series(&[100.0, 101.0, 99.0, 102.0]))
            .unwrap();
        assert!(run.trades.is_empty());
        assert!(run.equity.iter().all(|p| p.total_equity == 10_000.0));
        assert_eq!(run.report.total_return, 0.0);
        assert_eq!(run.report.sharpe_ratio, 0.0);
    }

    #[test]
    fn buy_and_hold_tracks_price_moves() {
        let run = backtester()
            .run(&BuyAndHold::new(1.0).unwrap(), &series(&[100.0, 110.0, 121.0]))
            .unwrap();
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.final_equity(), 10_021.0);
        assert_eq!(run.returns.len(), 3);
        assert_eq!(run.returns[0], 0.0);
        assert_eq!(run.strategy, "buy_and_hold");
    }

    #[test]
    fn runs_are_deterministic() {
        let prices = series(&[10.0, 11.0, 12.0, 11.5, 11.0, 10.0, 10.5, 12.5, 13.0]);
        let strategy = MovingAverageCrossover::new(2, 4).unwrap();
        let bt = backtester();
        let first = bt.run(&strategy, &prices).unwrap();
        let second = bt.run(&strategy, &prices).unwrap();
        assert_eq!(first.equity, second.equity);
        assert_eq!(first.trades, second.trades);
        assert_eq!(first.report, second.report);
    }

    #[test]
    fn benchmark_must_line_up() {
        let prices = series(&[100.0, 101.0, 102.0]);
        let bt = backtester().with_benchmark(&series(&[50.0, 51.0]));
        let err = bt.run(&HoldStrategy, &prices).unwrap_err();
        assert!(matches!(err, BacktestError::BenchmarkLength { .. }));

        let bt = backtester().with_benchmark(&series(&[50.0, 51.0, 52.0]));
        let run = bt.run(&BuyAndHold::new(1.0).unwrap(), &prices).unwrap();
        assert!(run.report.benchmark.is_some());
    }

    #[test]
    fn empty_prices_are_rejected() {
        let err = backtester().run(&HoldStrategy, &[]).unwrap_err();
        assert!(matches!(err, BacktestError::EmptyInput(_)));
    }
}
