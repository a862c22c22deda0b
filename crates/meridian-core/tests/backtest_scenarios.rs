use meridian_core::backtest::Backtester;
use meridian_core::data::prices::{CsvPriceSource, PriceSource};
use meridian_core::error::Result;
use meridian_core::optimize::{GridSearchOptions, ParameterGrid, RunStatus};
use meridian_core::performance::{PerformanceConfig, PerformanceEngine};
use meridian_core::portfolio::{PortfolioSimulator, SimulationConfig};
use meridian_core::strategy::{
    BuyAndHold, HoldStrategy, KindFactory, MovingAverageCrossover, ParameterSet, Strategy,
};
use meridian_core::types::{PricePoint, Side, SignalRecord};
use std::fs;

const DAY: i64 = 86_400;

fn series(values: impl IntoIterator<Item = f64>) -> Vec<PricePoint> {
    values
        .into_iter()
        .enumerate()
        .map(|(idx, price)| PricePoint::new(1_577_836_800 + idx as i64 * DAY, price))
        .collect()
}

/// Non-decreasing prices with uneven steps, so a long position has positive
/// mean return and non-zero variance.
fn staircase(n: usize) -> Vec<PricePoint> {
    series((0..n).map(|i| 100.0 + i as f64 + 0.5 * (i % 3) as f64))
}

fn wave(n: usize) -> Vec<PricePoint> {
    series((0..n).map(|i| 100.0 + (i as f64 / 15.0).sin() * 12.0 + i as f64 * 0.05))
}

#[test]
fn three_tick_round_trip_matches_hand_computation() {
    let simulator = PortfolioSimulator::new(SimulationConfig::new(10_000.0, 0.001)).unwrap();
    let signals = vec![
        SignalRecord::new(1, 100.0, 1.0, 1.0),
        SignalRecord::new(2, 105.0, 1.0, 0.0),
        SignalRecord::new(3, 110.0, 0.0, -1.0),
    ];
    let output = simulator.run(&signals).unwrap();

    assert!((output.equity[0].cash - 9_899.9).abs() < 1e-9);
    assert!((output.equity[1].holdings_value - 105.0).abs() < 1e-9);
    assert!((output.equity[2].cash - 9_999.79).abs() < 1e-9);
    assert!((output.equity[2].total_equity - 9_999.79).abs() < 1e-9);
    assert_eq!(output.trades.len(), 2);
}

#[test]
fn equity_is_dense_and_starts_at_capital() {
    let prices = wave(120);
    let bt = Backtester::new(SimulationConfig::new(10_000.0, 0.001), PerformanceConfig::default())
        .unwrap();
    let strategy = MovingAverageCrossover::new(5, 20).unwrap();
    let run = bt.run(&strategy, &prices).unwrap();

    assert_eq!(run.signals.len(), prices.len());
    assert_eq!(run.equity.len(), run.signals.len());
    assert_eq!(run.returns.len(), run.equity.len());
    assert_eq!(run.signals[0].position_delta, 0.0);
    assert_eq!(run.equity[0].total_equity, 10_000.0);
}

#[test]
fn cash_moves_by_exactly_notional_plus_commission() {
    let prices = wave(200);
    let config = SimulationConfig::new(5_000.0, 0.002);
    let bt = Backtester::new(config, PerformanceConfig::default()).unwrap();
    let run = bt
        .run(&MovingAverageCrossover::new(3, 12).unwrap(), &prices)
        .unwrap();
    assert!(!run.trades.is_empty());

    for trade in &run.trades {
        let idx = run
            .equity
            .iter()
            .position(|p| p.timestamp == trade.timestamp)
            .expect("trade tick");
        let cash_before = if idx == 0 {
            config.initial_capital
        } else {
            run.equity[idx - 1].cash
        };
        let signed = match trade.side {
            Side::Buy => trade.shares,
            Side::Sell => -trade.shares,
        };
        let expected = cash_before - signed * trade.price - trade.commission;
        assert_eq!(trade.cash_after, expected);
        assert_eq!(trade.commission, trade.shares * trade.price * config.commission_rate);
    }
}

#[test]
fn zero_signal_series_keeps_capital_constant() {
    let bt = Backtester::new(SimulationConfig::new(25_000.0, 0.001), PerformanceConfig::default())
        .unwrap();
    let run = bt.run(&HoldStrategy, &wave(60)).unwrap();
    assert!(run.trades.is_empty());
    assert!(run.equity.iter().all(|p| p.total_equity == 25_000.0));
    assert_eq!(run.report.max_drawdown, 0.0);
    assert_eq!(run.report.sharpe_ratio, 0.0);
    assert!(run.report.sortino_ratio.is_none());
    assert!(run.report.render().contains("Sortino Ratio: undefined"));
}

#[test]
fn monotone_equity_has_no_drawdown() {
    let bt = Backtester::new(SimulationConfig::new(10_000.0, 0.0), PerformanceConfig::default())
        .unwrap();
    let run = bt.run(&BuyAndHold::new(1.0).unwrap(), &staircase(50)).unwrap();
    assert_eq!(run.report.max_drawdown, 0.0);
    assert!(run.report.total_return > 0.0);
}

#[test]
fn repeated_runs_are_identical() {
    let prices = wave(150);
    let bt = Backtester::new(SimulationConfig::new(10_000.0, 0.001), PerformanceConfig::default())
        .unwrap()
        .with_benchmark(&prices);
    let strategy = MovingAverageCrossover::new(4, 16).unwrap();
    let first = bt.run(&strategy, &prices).unwrap();
    let second = bt.run(&strategy, &prices).unwrap();
    assert_eq!(first.signals, second.signals);
    assert_eq!(first.equity, second.equity);
    assert_eq!(first.report, second.report);
    assert_eq!(first.report.render(), second.report.render());
}

#[test]
fn grid_search_finds_the_only_profitable_combination() {
    // Only (10, 200) takes a position; on a rising staircase it is the sole
    // run with a positive Sharpe ratio, every other run stays flat at 0.
    let factory = |params: &ParameterSet| -> Result<Box<dyn Strategy>> {
        let short = params.get("short_window").copied().unwrap_or_default();
        let long = params.get("long_window").copied().unwrap_or_default();
        if short == 10.0 && long == 200.0 {
            Ok(Box::new(BuyAndHold::new(1.0)?))
        } else {
            Ok(Box::new(HoldStrategy))
        }
    };
    let grid = ParameterGrid::new()
        .with_param("short_window", vec![10.0, 50.0])
        .with_param("long_window", vec![100.0, 200.0]);
    let bt = Backtester::new(SimulationConfig::new(10_000.0, 0.0), PerformanceConfig::default())
        .unwrap();

    let result = bt
        .optimize(&factory, &grid, &staircase(300), &GridSearchOptions::default())
        .unwrap();

    assert_eq!(result.runs.len(), 4);
    assert_eq!(result.count(RunStatus::Ok), 4);
    let best = result.best.expect("best run");
    assert_eq!(best.params.get("short_window"), Some(&10.0));
    assert_eq!(best.params.get("long_window"), Some(&200.0));
    let best_score = best.score.unwrap();
    assert!(best_score > 0.0);
    for run in result.runs.iter().filter(|r| r.run_id != best.run_id) {
        assert!(run.score.unwrap() < best_score);
    }
}

#[test]
fn crossover_grid_evaluates_every_combination() {
    let grid = ParameterGrid::new()
        .with_param("short_window", vec![10.0, 50.0])
        .with_param("long_window", vec![100.0, 200.0]);
    let factory = KindFactory::new("ma_crossover", ParameterSet::new());
    let bt = Backtester::new(SimulationConfig::new(10_000.0, 0.001), PerformanceConfig::default())
        .unwrap();
    let result = bt
        .optimize(
            &factory,
            &grid,
            &wave(400),
            &GridSearchOptions::default().parallel(true),
        )
        .unwrap();

    assert_eq!(result.runs.len(), 4);
    let expected: Vec<(f64, f64)> =
        vec![(10.0, 100.0), (10.0, 200.0), (50.0, 100.0), (50.0, 200.0)];
    let seen: Vec<(f64, f64)> = result
        .runs
        .iter()
        .map(|r| (r.params["short_window"], r.params["long_window"]))
        .collect();
    assert_eq!(seen, expected);

    let best = result.best.expect("best run");
    let max = result
        .runs
        .iter()
        .filter_map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(best.score, Some(max));
}

#[test]
fn csv_prices_flow_through_a_full_backtest() {
    let dir = std::env::temp_dir().join("meridian_scenario_csv");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("prices.csv");
    let mut csv = String::from("Date,Open,High,Low,Close,Volume\n");
    for (idx, point) in wave(80).iter().enumerate() {
        let date = chrono::NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
            + chrono::Duration::days(idx as i64);
        csv.push_str(&format!("{},0,0,0,{},0\n", date.format("%Y-%m-%d"), point.price));
    }
    fs::write(&path, csv).unwrap();

    let (prices, quality) = CsvPriceSource::new(&path).load_prices().unwrap();
    assert!(quality.is_clean());
    assert_eq!(prices.len(), 80);

    let bt = Backtester::new(SimulationConfig::default(), PerformanceConfig::default()).unwrap();
    let run = bt
        .run(&MovingAverageCrossover::new(5, 20).unwrap(), &prices)
        .unwrap();
    assert_eq!(run.equity.len(), 80);

    let engine = PerformanceEngine::new(PerformanceConfig::default()).unwrap();
    assert_eq!(engine.from_equity(&run.equity, None).unwrap(), run.report);
}
