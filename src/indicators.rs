//! Streaming indicator enrichment.
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|). The first
//! bar of a symbol has no previous close, so its TR is just high-low.
//! ATR uses Wilder smoothing (alpha = 1/period) seeded with the mean of the
//! first `period` true ranges. Until the seed is available no ATR is
//! published, and the risk engine refuses to derive a stop from it.

use crate::market::{MarketEvent, ATR};
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
struct SymbolIndicators {
    prev_close: Option<Decimal>,
    seed: Vec<Decimal>,
    atr: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct IndicatorCalculator {
    atr_period: usize,
    state: HashMap<String, SymbolIndicators>,
}

impl IndicatorCalculator {
    pub fn new(atr_period: usize) -> Self {
        Self {
            atr_period: atr_period.max(1),
            state: HashMap::new(),
        }
    }

    /// Update per-symbol state with this bar and write the ATR onto it.
    /// A value the feed already supplied is left alone.
    pub fn enrich(&mut self, event: &mut MarketEvent) {
        let period = self.atr_period;
        let st = self.state.entry(event.symbol.clone()).or_default();

        let high = event.high.value();
        let low = event.low.value();

        let tr = match st.prev_close {
            Some(pc) => (high - low).max((high - pc).abs()).max((low - pc).abs()),
            None => high - low,
        };
        st.prev_close = Some(event.close.value());

        st.atr = match st.atr {
            Some(prev) => {
                let p = Decimal::from(period as u64);
                Some((prev * (p - Decimal::ONE) + tr) / p)
            }
            None => {
                st.seed.push(tr);
                if st.seed.len() >= period {
                    let sum: Decimal = st.seed.iter().copied().sum();
                    st.seed.clear();
                    Some(sum / Decimal::from(period as u64))
                } else {
                    None
                }
            }
        };

        if let Some(atr) = st.atr {
            event.indicators.entry(ATR.to_string()).or_insert(atr);
        }
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use rust_decimal_macros::dec;

    fn bar(ms: i64, h: Decimal, l: Decimal, c: Decimal) -> MarketEvent {
        MarketEvent::bar("ES", Timestamp::from_millis(ms), c, h, l, c).unwrap()
    }

    #[test]
    fn atr_waits_for_seed() {
        let mut calc = IndicatorCalculator::new(3);
        let mut b1 = bar(1, dec!(102), dec!(100), dec!(101));
        calc.enrich(&mut b1);
        assert!(b1.indicator(ATR).is_none());

        let mut b2 = bar(2, dec!(103), dec!(101), dec!(102));
        calc.enrich(&mut b2);
        assert!(b2.indicator(ATR).is_none());

        // TRs: 2, 2, 4 -> seed 8/3
        let mut b3 = bar(3, dec!(104), dec!(100), dec!(103));
        calc.enrich(&mut b3);
        assert_eq!(b3.atr(), dec!(8) / dec!(3));
    }

    #[test]
    fn wilder_smoothing_after_seed() {
        let mut calc = IndicatorCalculator::new(2);
        let mut b1 = bar(1, dec!(10), dec!(8), dec!(9));
        let mut b2 = bar(2, dec!(11), dec!(9), dec!(10));
        let mut b3 = bar(3, dec!(16), dec!(10), dec!(15));
        calc.enrich(&mut b1);
        calc.enrich(&mut b2);
        calc.enrich(&mut b3);
        // seed (2 + 2)/2 = 2, then (2*1 + 6)/2 = 4
        assert_eq!(b3.atr(), dec!(4));
    }

    #[test]
    fn gap_uses_previous_close() {
        let mut calc = IndicatorCalculator::new(1);
        let mut b1 = bar(1, dec!(10), dec!(9), dec!(10));
        let mut b2 = bar(2, dec!(21), dec!(20), dec!(20));
        calc.enrich(&mut b1);
        calc.enrich(&mut b2);
        assert_eq!(b2.atr(), dec!(11));
    }

    #[test]
    fn feed_supplied_atr_wins() {
        let mut calc = IndicatorCalculator::new(1);
        let mut b1 = bar(1, dec!(10), dec!(9), dec!(10)).with_indicator(ATR, dec!(7));
        calc.enrich(&mut b1);
        assert_eq!(b1.atr(), dec!(7));
    }
}
