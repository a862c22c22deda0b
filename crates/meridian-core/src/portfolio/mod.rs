use crate::error::{BacktestError, Result};
use crate::types::{is_tradable_price, EquityPoint, Side, SignalRecord, TradeRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How a signal's `position_delta` is turned into a share quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingPolicy {
    /// `shares = position_delta * units`. Short and fractional positions are
    /// allowed; nothing guards against selling shares that are not held.
    FixedUnits { units: f64 },
    /// Buy `floor(initial_capital / price)` whole shares on a positive delta,
    /// sell the whole position on a negative one. Never goes short.
    AllInWholeShares,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy::FixedUnits { units: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    #[serde(default)]
    pub sizing: SizingPolicy,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            commission_rate: 0.001,
            sizing: SizingPolicy::default(),
        }
    }
}

impl SimulationConfig {
    pub fn new(initial_capital: f64, commission_rate: f64) -> Self {
        Self {
            initial_capital,
            commission_rate,
            sizing: SizingPolicy::default(),
        }
    }

    pub fn with_sizing(mut self, sizing: SizingPolicy) -> Self {
        self.sizing = sizing;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidConfiguration(format!(
                "initial capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        if !self.commission_rate.is_finite()
            || self.commission_rate < 0.0
            || self.commission_rate >= 1.0
        {
            return Err(BacktestError::InvalidConfiguration(format!(
                "commission rate must be in [0, 1), got {}",
                self.commission_rate
            )));
        }
        if let SizingPolicy::FixedUnits { units } = self.sizing {
            if !units.is_finite() || units <= 0.0 {
                return Err(BacktestError::InvalidConfiguration(format!(
                    "sizing units must be > 0, got {units}"
                )));
            }
        }
        Ok(())
    }
}

/// Cash and share state for one run. Cash may go negative: there is no
/// margin model and no buying-power check.
#[derive(Debug, Default)]
pub struct Portfolio {
    cash: f64,
    shares_held: f64,
    trades: Vec<TradeRecord>,
}

impl Portfolio {
    pub fn new_with_cash(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            shares_held: 0.0,
            trades: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn shares_held(&self) -> f64 {
        self.shares_held
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<TradeRecord> {
        self.trades
    }

    /// Applies a signed share delta at `price` and appends the trade.
    /// Returns `None` for a zero delta.
    pub fn apply_delta(
        &mut self,
        timestamp: i64,
        shares: f64,
        price: f64,
        commission_rate: f64,
    ) -> Option<&TradeRecord> {
        if shares == 0.0 {
            return None;
        }

        let notional = shares.abs() * price;
        let commission = notional * commission_rate;
        self.cash = self.cash - shares * price - commission;
        self.shares_held += shares;

        self.trades.push(TradeRecord {
            timestamp,
            side: Side::from_delta(shares),
            price,
            shares: shares.abs(),
            notional_value: notional,
            commission,
            cash_after: self.cash,
        });
        self.trades.last()
    }

    pub fn holdings_value(&self, price: f64) -> f64 {
        self.shares_held * price
    }

    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.holdings_value(price)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub equity: Vec<EquityPoint>,
    pub trades: Vec<TradeRecord>,
}

pub struct PortfolioSimulator {
    config: SimulationConfig,
}

impl PortfolioSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn run(&self, signals: &[SignalRecord]) -> Result<SimulationOutput> {
        if signals.is_empty() {
            return Err(BacktestError::EmptyInput(
                "signal series has no rows".to_string(),
            ));
        }
        check_chronological(signals)?;

        let mut portfolio = Portfolio::new_with_cash(self.config.initial_capital);
        let mut equity = Vec::with_capacity(signals.len());
        let mut last_price: Option<f64> = None;
        let mut skipped = 0usize;
        let mut warned_negative_cash = false;

        for record in signals {
            let delta = if record.position_delta.is_nan() {
                0.0
            } else {
                record.position_delta
            };

            if !is_tradable_price(record.price) {
                if delta != 0.0 {
                    skipped += 1;
                    warn!(
                        timestamp = record.timestamp,
                        position_delta = delta,
                        "skipping trade: no valid price"
                    );
                }
                equity.push(mark_to_market(&portfolio, record.timestamp, last_price));
                continue;
            }

            let shares = self.resolve_shares(&portfolio, delta, record.price);
            let commission_rate = self.config.commission_rate;
            if let Some(trade) =
                portfolio.apply_delta(record.timestamp, shares, record.price, commission_rate)
            {
                debug!(
                    timestamp = trade.timestamp,
                    side = trade.side.as_str(),
                    shares = trade.shares,
                    price = trade.price,
                    commission = trade.commission,
                    cash_after = trade.cash_after,
                    "trade executed"
                );
                if trade.cash_after < 0.0 && !warned_negative_cash {
                    warned_negative_cash = true;
                    warn!(
                        timestamp = trade.timestamp,
                        cash = trade.cash_after,
                        "cash went negative; no margin model is applied"
                    );
                }
            }

            last_price = Some(record.price);
            equity.push(mark_to_market(&portfolio, record.timestamp, last_price));
        }

        let final_equity = equity.last().map(|p| p.total_equity).unwrap_or_default();
        info!(
            ticks = signals.len(),
            trades = portfolio.trades().len(),
            skipped_trades = skipped,
            final_equity,
            "simulation complete"
        );

        Ok(SimulationOutput {
            equity,
            trades: portfolio.into_trades(),
        })
    }

    fn resolve_shares(&self, portfolio: &Portfolio, delta: f64, price: f64) -> f64 {
        if delta == 0.0 {
            return 0.0;
        }
        match self.config.sizing {
            SizingPolicy::FixedUnits { units } => delta * units,
            SizingPolicy::AllInWholeShares => {
                if delta > 0.0 {
                    (self.config.initial_capital / price).floor()
                } else if portfolio.shares_held() > 0.0 {
                    -portfolio.shares_held()
                } else {
                    0.0
                }
            }
        }
    }
}

fn mark_to_market(portfolio: &Portfolio, timestamp: i64, price: Option<f64>) -> EquityPoint {
    let (holdings_value, total_equity) = match price {
        Some(p) => (portfolio.holdings_value(p), portfolio.equity(p)),
        None => (0.0, portfolio.cash()),
    };
    EquityPoint {
        timestamp,
        cash: portfolio.cash(),
        shares_held: portfolio.shares_held(),
        holdings_value,
        total_equity,
    }
}

fn check_chronological(signals: &[SignalRecord]) -> Result<()> {
    for (index, pair) in signals.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(BacktestError::OutOfOrder {
                index: index + 1,
                timestamp: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Portfolio, PortfolioSimulator, SimulationConfig, SizingPolicy};
    use crate::error::BacktestError;
    use crate::types::{Side, SignalRecord};

    fn signal(ts: i64, price: f64, delta: f64) -> SignalRecord {
        SignalRecord::new(ts, price, 0.0, delta)
    }

    #[test]
    fn buy_and_sell_updates_cash_and_position() {
        let mut portfolio = Portfolio::new_with_cash(1000.0);
        portfolio.apply_delta(1, 1.0, 100.0, 0.01);
        assert_eq!(portfolio.shares_held(), 1.0);
        assert!((portfolio.cash() - 899.0).abs() < 1e-9);

        portfolio.apply_delta(2, -1.0, 110.0, 0.01);
        assert_eq!(portfolio.shares_held(), 0.0);
        assert!((portfolio.cash() - 1007.9).abs() < 1e-9);
        assert_eq!(portfolio.trades().len(), 2);
        assert_eq!(portfolio.trades()[1].side, Side::Sell);
    }

    #[test]
    fn zero_delta_records_no_trade() {
        let mut portfolio = Portfolio::new_with_cash(1000.0);
        assert!(portfolio.apply_delta(1, 0.0, 100.0, 0.01).is_none());
        assert!(portfolio.trades().is_empty());
        assert_eq!(portfolio.cash(), 1000.0);
    }

    #[test]
    fn three_tick_round_trip_matches_hand_computation() {
        let sim = PortfolioSimulator::new(SimulationConfig::new(10_000.0, 0.001)).unwrap();
        let out = sim
            .run(&[signal(1, 100.0, 1.0), signal(2, 105.0, 0.0), signal(3, 110.0, -1.0)])
            .unwrap();

        assert_eq!(out.equity.len(), 3);
        assert!((out.equity[0].cash - 9899.9).abs() < 1e-9);
        assert!((out.equity[1].holdings_value - 105.0).abs() < 1e-9);
        assert!((out.equity[2].cash - 9999.79).abs() < 1e-9);
        assert!((out.equity[2].total_equity - 9999.79).abs() < 1e-9);

        assert_eq!(out.trades.len(), 2);
        assert_eq!(out.trades[0].side, Side::Buy);
        assert!((out.trades[0].commission - 0.1).abs() < 1e-12);
        assert!((out.trades[1].notional_value - 110.0).abs() < 1e-12);
    }

    #[test]
    fn selling_flat_goes_short_under_fixed_units() {
        let sim = PortfolioSimulator::new(SimulationConfig::new(1_000.0, 0.0)).unwrap();
        let out = sim.run(&[signal(1, 50.0, -2.0), signal(2, 40.0, 0.0)]).unwrap();
        assert_eq!(out.equity[1].shares_held, -2.0);
        assert!((out.equity[1].total_equity - 1_020.0).abs() < 1e-9);
    }

    #[test]
    fn all_in_sizing_buys_whole_shares_and_never_shorts() {
        let config =
            SimulationConfig::new(1_000.0, 0.0).with_sizing(SizingPolicy::AllInWholeShares);
        let sim = PortfolioSimulator::new(config).unwrap();
        let out = sim
            .run(&[
                signal(1, 30.0, -1.0),
                signal(2, 30.0, 1.0),
                signal(3, 40.0, -1.0),
            ])
            .unwrap();

        assert_eq!(out.trades.len(), 2);
        assert_eq!(out.trades[0].shares, 33.0);
        assert_eq!(out.equity[0].shares_held, 0.0);
        assert_eq!(out.equity[2].shares_held, 0.0);
        assert!((out.equity[2].cash - (1_000.0 + 33.0 * 10.0)).abs() < 1e-9);
    }

    #[test]
    fn all_in_sizing_charges_commission_on_both_legs() {
        let rate = 0.001;
        let config =
            SimulationConfig::new(1_000.0, rate).with_sizing(SizingPolicy::AllInWholeShares);
        let sim = PortfolioSimulator::new(config).unwrap();
        let out = sim.run(&[signal(1, 30.0, 1.0), signal(2, 40.0, -1.0)]).unwrap();

        let buy_cost = 33.0 * 30.0 * (1.0 + rate);
        let sell_proceeds = 33.0 * 40.0 * (1.0 - rate);
        assert_eq!(out.trades.len(), 2);
        assert!((out.trades[0].commission - 33.0 * 30.0 * rate).abs() < 1e-9);
        assert!((out.equity[0].cash - (1_000.0 - buy_cost)).abs() < 1e-9);
        assert!((out.equity[0].total_equity - (1_000.0 - buy_cost + 990.0)).abs() < 1e-9);
        assert!((out.equity[1].cash - (1_000.0 - buy_cost + sell_proceeds)).abs() < 1e-9);
        assert_eq!(out.equity[1].shares_held, 0.0);
    }

    #[test]
    fn portfolio_equity_marks_holdings_at_price() {
        let mut portfolio = Portfolio::new_with_cash(500.0);
        portfolio.apply_delta(1, 2.0, 100.0, 0.0);
        assert_eq!(portfolio.equity(120.0), 540.0);
        assert_eq!(portfolio.holdings_value(120.0), 240.0);
    }

    #[test]
    fn nan_price_skips_trade_but_marks_to_market() {
        let sim = PortfolioSimulator::new(SimulationConfig::new(1_000.0, 0.0)).unwrap();
        let out = sim
            .run(&[
                signal(1, 10.0, 1.0),
                signal(2, f64::NAN, 1.0),
                signal(3, 12.0, 0.0),
            ])
            .unwrap();

        assert_eq!(out.equity.len(), 3);
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.equity[1].shares_held, 1.0);
        assert!((out.equity[1].holdings_value - 10.0).abs() < 1e-9);
        assert!(out.equity[1].total_equity.is_finite());
        assert!((out.equity[2].total_equity - 1_002.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_configuration_and_empty_input() {
        assert!(matches!(
            PortfolioSimulator::new(SimulationConfig::new(0.0, 0.001)),
            Err(BacktestError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PortfolioSimulator::new(SimulationConfig::new(100.0, -0.1)),
            Err(BacktestError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PortfolioSimulator::new(
                SimulationConfig::new(100.0, 0.0)
                    .with_sizing(SizingPolicy::FixedUnits { units: 0.0 })
            ),
            Err(BacktestError::InvalidConfiguration(_))
        ));

        let sim = PortfolioSimulator::new(SimulationConfig::default()).unwrap();
        assert!(matches!(sim.run(&[]), Err(BacktestError::EmptyInput(_))));
    }

    #[test]
    fn rejects_out_of_order_timestamps() {
        let sim = PortfolioSimulator::new(SimulationConfig::default()).unwrap();
        let err = sim
            .run(&[signal(2, 10.0, 0.0), signal(2, 11.0, 0.0)])
            .expect_err("duplicate timestamp");
        assert!(matches!(err, BacktestError::OutOfOrder { index: 1, timestamp: 2 }));
    }
}
