use crate::error::{BacktestError, Result};
use crate::types::{signals_from_raw, PricePoint, SignalRecord};
use std::collections::BTreeMap;

/// Named numeric strategy parameters. Ordered so hashing and reporting are
/// stable across runs.
pub type ParameterSet = BTreeMap<String, f64>;

pub const DEFAULT_SHORT_WINDOW: usize = 50;
pub const DEFAULT_LONG_WINDOW: usize = 200;

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new()
    }

    /// Produces one signal row per price point. Must be a pure function of
    /// `prices`.
    fn generate_signals(&self, prices: &[PricePoint]) -> Result<Vec<SignalRecord>>;
}

pub struct BuyAndHold {
    size: f64,
}

impl BuyAndHold {
    pub fn new(size: f64) -> Result<Self> {
        Ok(Self {
            size: positive_size(size)?,
        })
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from([("size".to_string(), self.size)])
    }

    fn generate_signals(&self, prices: &[PricePoint]) -> Result<Vec<SignalRecord>> {
        // Enter on the first tradable tick and stay in.
        let mut entered = false;
        let raw: Vec<f64> = prices
            .iter()
            .map(|point| {
                entered |= point.is_tradable();
                if entered {
                    self.size
                } else {
                    0.0
                }
            })
            .collect();
        Ok(signals_from_raw(prices, &raw))
    }
}

/// Long `size` while the short rolling mean is above the long rolling mean.
///
/// Rolling means use whatever valid prices the window holds (at least one),
/// and the signal stays flat for the first `short_window` ticks.
pub struct MovingAverageCrossover {
    short_window: usize,
    long_window: usize,
    size: f64,
}

impl MovingAverageCrossover {
    pub fn new(short_window: usize, long_window: usize) -> Result<Self> {
        if short_window == 0 {
            return Err(BacktestError::InvalidParameter {
                name: "short_window".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        if long_window <= short_window {
            return Err(BacktestError::InvalidParameter {
                name: "long_window".to_string(),
                reason: format!(
                    "must be greater than short_window ({} <= {})",
                    long_window, short_window
                ),
            });
        }
        Ok(Self {
            short_window,
            long_window,
            size: 1.0,
        })
    }

    pub fn with_size(mut self, size: f64) -> Result<Self> {
        self.size = positive_size(size)?;
        Ok(self)
    }

    pub fn short_window(&self) -> usize {
        self.short_window
    }

    pub fn long_window(&self) -> usize {
        self.long_window
    }
}

impl Default for MovingAverageCrossover {
    fn default() -> Self {
        Self {
            short_window: DEFAULT_SHORT_WINDOW,
            long_window: DEFAULT_LONG_WINDOW,
            size: 1.0,
        }
    }
}

impl Strategy for MovingAverageCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from([
            ("short_window".to_string(), self.short_window as f64),
            ("long_window".to_string(), self.long_window as f64),
            ("size".to_string(), self.size),
        ])
    }

    fn generate_signals(&self, prices: &[PricePoint]) -> Result<Vec<SignalRecord>> {
        let values: Vec<f64> = prices.iter().map(|point| point.price).collect();
        let short = rolling_mean(&values, self.short_window);
        let long = rolling_mean(&values, self.long_window);

        let raw: Vec<f64> = short
            .iter()
            .zip(long.iter())
            .enumerate()
            .map(|(idx, (s, l))| {
                // NaN comparisons are false, so missing averages read as flat.
                if idx >= self.short_window && s > l {
                    self.size
                } else {
                    0.0
                }
            })
            .collect();

        let mut signals = signals_from_raw(prices, &raw);
        for (record, (s, l)) in signals.iter_mut().zip(short.into_iter().zip(long)) {
            record.indicators = vec![("short_mavg".to_string(), s), ("long_mavg".to_string(), l)];
        }
        Ok(signals)
    }
}

pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn generate_signals(&self, prices: &[PricePoint]) -> Result<Vec<SignalRecord>> {
        Ok(signals_from_raw(prices, &vec![0.0; prices.len()]))
    }
}

/// Trailing mean over up to `window` values, ignoring non-finite entries.
/// NaN when the window holds no finite value.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    let mut count = 0usize;
    for (idx, value) in values.iter().copied().enumerate() {
        if value.is_finite() {
            sum += value;
            count += 1;
        }
        if idx >= window {
            let leaving = values[idx - window];
            if leaving.is_finite() {
                sum -= leaving;
                count -= 1;
            }
        }
        out.push(if count == 0 {
            f64::NAN
        } else {
            sum / count as f64
        });
    }
    out
}

pub enum StrategyKind {
    MovingAverageCrossover(MovingAverageCrossover),
    BuyAndHold(BuyAndHold),
    Hold(HoldStrategy),
}

impl StrategyKind {
    pub const NAMES: &'static [&'static str] = &["ma_crossover", "buy_and_hold", "hold"];

    /// Builds a strategy by name. Missing parameters fall back to defaults;
    /// unknown parameter names are rejected so grid typos surface early.
    pub fn from_params(kind: &str, params: &ParameterSet) -> Result<Self> {
        match kind {
            "ma_crossover" => {
                check_known(params, &["short_window", "long_window", "size"])?;
                let short = window_param(params, "short_window", DEFAULT_SHORT_WINDOW)?;
                let long = window_param(params, "long_window", DEFAULT_LONG_WINDOW)?;
                let size = params.get("size").copied().unwrap_or(1.0);
                Ok(StrategyKind::MovingAverageCrossover(
                    MovingAverageCrossover::new(short, long)?.with_size(size)?,
                ))
            }
            "buy_and_hold" => {
                check_known(params, &["size"])?;
                let size = params.get("size").copied().unwrap_or(1.0);
                Ok(StrategyKind::BuyAndHold(BuyAndHold::new(size)?))
            }
            "hold" => {
                check_known(params, &[])?;
                Ok(StrategyKind::Hold(HoldStrategy))
            }
            other => Err(BacktestError::InvalidConfiguration(format!(
                "unknown strategy kind: {} (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        match self {
            StrategyKind::MovingAverageCrossover(strategy) => strategy.name(),
            StrategyKind::BuyAndHold(strategy) => strategy.name(),
            StrategyKind::Hold(strategy) => strategy.name(),
        }
    }

    fn parameters(&self) -> ParameterSet {
        match self {
            StrategyKind::MovingAverageCrossover(strategy) => strategy.parameters(),
            StrategyKind::BuyAndHold(strategy) => strategy.parameters(),
            StrategyKind::Hold(strategy) => strategy.parameters(),
        }
    }

    fn generate_signals(&self, prices: &[PricePoint]) -> Result<Vec<SignalRecord>> {
        match self {
            StrategyKind::MovingAverageCrossover(strategy) => strategy.generate_signals(prices),
            StrategyKind::BuyAndHold(strategy) => strategy.generate_signals(prices),
            StrategyKind::Hold(strategy) => strategy.generate_signals(prices),
        }
    }
}

/// Builds one strategy per grid combination.
pub trait StrategyFactory: Send + Sync {
    fn build(&self, params: &ParameterSet) -> Result<Box<dyn Strategy>>;
}

impl<F> StrategyFactory for F
where
    F: Fn(&ParameterSet) -> Result<Box<dyn Strategy>> + Send + Sync,
{
    fn build(&self, params: &ParameterSet) -> Result<Box<dyn Strategy>> {
        self(params)
    }
}

/// Factory for the built-in kinds. Grid values override `base`.
#[derive(Debug, Clone)]
pub struct KindFactory {
    kind: String,
    base: ParameterSet,
}

impl KindFactory {
    pub fn new(kind: impl Into<String>, base: ParameterSet) -> Self {
        Self {
            kind: kind.into(),
            base,
        }
    }
}

impl StrategyFactory for KindFactory {
    fn build(&self, params: &ParameterSet) -> Result<Box<dyn Strategy>> {
        let mut merged = self.base.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(Box::new(StrategyKind::from_params(&self.kind, &merged)?))
    }
}

fn positive_size(size: f64) -> Result<f64> {
    if !size.is_finite() || size <= 0.0 {
        return Err(BacktestError::InvalidParameter {
            name: "size".to_string(),
            reason: format!("must be a positive number, got {}", size),
        });
    }
    Ok(size)
}

fn window_param(params: &ParameterSet, name: &str, default: usize) -> Result<usize> {
    let Some(value) = params.get(name).copied() else {
        return Ok(default);
    };
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
        return Err(BacktestError::InvalidParameter {
            name: name.to_string(),
            reason: format!("must be a positive integer, got {}", value),
        });
    }
    Ok(value as usize)
}

fn check_known(params: &ParameterSet, known: &[&str]) -> Result<()> {
    match params.keys().find(|key| !known.contains(&key.as_str())) {
        Some(key) => Err(BacktestError::InvalidParameter {
            name: key.clone(),
            reason: "unknown parameter".to_string(),
        }),
        None => Ok(()),
    }
}
