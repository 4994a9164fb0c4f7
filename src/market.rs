//! Market data events.
//!
//! One event is one OHLCV bar for one symbol. Feeds may ship precomputed
//! indicators; the runner's indicator calculator fills in whatever is
//! missing before the strategy sees the event.

use crate::types::{Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Indicator key for the average true range.
pub const ATR: &str = "atr";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub symbol: String,
    pub timestamp: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
    /// Ordered so that two enriched copies of the same bar compare equal.
    #[serde(default)]
    pub indicators: BTreeMap<String, Decimal>,
}

impl MarketEvent {
    pub fn bar(
        symbol: &str,
        timestamp: Timestamp,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Option<Self> {
        let open = Price::new(open)?;
        let high = Price::new(high)?;
        let low = Price::new(low)?;
        let close = Price::new(close)?;
        if low > high {
            return None;
        }
        Some(Self {
            symbol: symbol.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume: Decimal::ZERO,
            indicators: BTreeMap::new(),
        })
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_indicator(mut self, name: &str, value: Decimal) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }

    pub fn indicator(&self, name: &str) -> Option<Decimal> {
        self.indicators.get(name).copied()
    }

    /// ATR if present, zero otherwise.
    pub fn atr(&self) -> Decimal {
        self.indicator(ATR).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_inverted_bar() {
        let ts = Timestamp::from_millis(0);
        assert!(MarketEvent::bar("ES", ts, dec!(10), dec!(9), dec!(11), dec!(10)).is_none());
        assert!(MarketEvent::bar("ES", ts, dec!(0), dec!(11), dec!(9), dec!(10)).is_none());
    }

    #[test]
    fn missing_atr_reads_zero() {
        let ts = Timestamp::from_millis(0);
        let bar = MarketEvent::bar("ES", ts, dec!(10), dec!(11), dec!(9), dec!(10)).unwrap();
        assert_eq!(bar.atr(), Decimal::ZERO);
        let bar = bar.with_indicator(ATR, dec!(2.5));
        assert_eq!(bar.atr(), dec!(2.5));
    }
}
