use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }

    /// Prices that cannot be traded against: NaN, infinite or non-positive.
    pub fn is_tradable(&self) -> bool {
        is_tradable_price(self.price)
    }
}

pub fn is_tradable_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: i64,
    pub price: f64,
    pub signal: f64,
    pub position_delta: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indicators: Vec<(String, f64)>,
}

impl SignalRecord {
    pub fn new(timestamp: i64, price: f64, signal: f64, position_delta: f64) -> Self {
        Self {
            timestamp,
            price,
            signal,
            position_delta,
            indicators: Vec::new(),
        }
    }

    pub fn indicator(&self, name: &str) -> Option<f64> {
        self.indicators
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }
}

/// Builds a signal series from a raw signal column. Each tick's delta is the
/// change from the previous tick; the series starts flat, so the first delta
/// equals the first raw signal.
pub fn signals_from_raw(prices: &[PricePoint], raw: &[f64]) -> Vec<SignalRecord> {
    let mut out = Vec::with_capacity(prices.len());
    let mut prev = 0.0;
    for (point, signal) in prices.iter().zip(raw.iter().copied()) {
        out.push(SignalRecord::new(
            point.timestamp,
            point.price,
            signal,
            signal - prev,
        ));
        prev = signal;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: i64,
    pub side: Side,
    pub price: f64,
    pub shares: f64,
    pub notional_value: f64,
    pub commission: f64,
    pub cash_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub cash: f64,
    pub shares_held: f64,
    pub holdings_value: f64,
    pub total_equity: f64,
}

#[cfg(test)]
mod tests {
    use super::{signals_from_raw, PricePoint, Side};

    #[test]
    fn raw_signal_diff_starts_flat() {
        let prices = vec![
            PricePoint::new(1, 10.0),
            PricePoint::new(2, 11.0),
            PricePoint::new(3, 12.0),
            PricePoint::new(4, 11.0),
        ];
        let signals = signals_from_raw(&prices, &[0.0, 1.0, 0.0, 1.0]);
        let deltas: Vec<f64> = signals.iter().map(|s| s.position_delta).collect();
        assert_eq!(deltas, vec![0.0, 1.0, -1.0, 1.0]);

        let entered = signals_from_raw(&prices[..1], &[1.0]);
        assert_eq!(entered[0].position_delta, 1.0);
        assert_eq!(signals[3].price, 11.0);
    }

    #[test]
    fn side_follows_delta_sign() {
        assert_eq!(Side::from_delta(2.0), Side::Buy);
        assert_eq!(Side::from_delta(-0.5), Side::Sell);
        assert_eq!(Side::Sell.as_str(), "SELL");
    }

    #[test]
    fn nan_price_is_not_tradable() {
        assert!(!PricePoint::new(1, f64::NAN).is_tradable());
        assert!(!PricePoint::new(1, 0.0).is_tradable());
        assert!(PricePoint::new(1, 0.01).is_tradable());
    }
}
