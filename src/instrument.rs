//! Static instrument specifications.
//!
//! Each futures contract is described by its tick size, the dollar value of
//! one tick, the dollar value of one full index point, and the exchange
//! margin for holding one contract overnight (initial) or during the session
//! (intraday). Sizing, stop placement, PnL and exposure math all read from
//! this table.

use crate::types::Price;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Dollar value of one tick per contract.
    pub tick_value: Decimal,
    /// Dollar value of one full point per contract.
    pub point_value: Decimal,
    pub initial_margin: Decimal,
    /// Zero when the broker publishes no intraday rate.
    pub intraday_margin: Decimal,
}

impl InstrumentSpec {
    pub fn new(
        symbol: &str,
        tick_size: Decimal,
        tick_value: Decimal,
        point_value: Decimal,
        initial_margin: Decimal,
        intraday_margin: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick_size,
            tick_value,
            point_value,
            initial_margin,
            intraday_margin,
        }
    }

    /// Margin used for exposure accounting: intraday when published, else initial.
    pub fn exposure_margin(&self) -> Decimal {
        if self.intraday_margin > Decimal::ZERO {
            self.intraday_margin
        } else {
            self.initial_margin
        }
    }

    /// Snap a price to the nearest tick.
    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        let ticks = (price / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        ticks * self.tick_size
    }

    /// Price distance expressed in ticks.
    pub fn ticks_between(&self, a: Price, b: Price) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (a.value() - b.value()).abs() / self.tick_size
    }
}

/// Lookup table keyed by symbol. Immutable once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentTable {
    specs: HashMap<String, InstrumentSpec>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The CME contracts this engine knows how to trade.
    pub fn cme_defaults() -> Self {
        let mut table = Self::new();
        // equity index
        table.insert(InstrumentSpec::new("ES", dec!(0.25), dec!(12.50), dec!(50), dec!(12650), dec!(500)));
        table.insert(InstrumentSpec::new("MES", dec!(0.25), dec!(1.25), dec!(5), dec!(1265), dec!(50)));
        table.insert(InstrumentSpec::new("NQ", dec!(0.25), dec!(5.00), dec!(20), dec!(18700), dec!(1000)));
        table.insert(InstrumentSpec::new("MNQ", dec!(0.25), dec!(0.50), dec!(2), dec!(1870), dec!(100)));
        // energy and metals, no intraday discount
        table.insert(InstrumentSpec::new("CL", dec!(0.01), dec!(10.00), dec!(1000), dec!(6000), dec!(0)));
        table.insert(InstrumentSpec::new("GC", dec!(0.10), dec!(10.00), dec!(100), dec!(9000), dec!(0)));
        table
    }

    pub fn with(mut self, spec: InstrumentSpec) -> Self {
        self.insert(spec);
        self
    }

    fn insert(&mut self, spec: InstrumentSpec) {
        self.specs.insert(spec.symbol.clone(), spec);
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.specs.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.specs.contains_key(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_value_matches_point_value() {
        let table = InstrumentTable::cme_defaults();
        for sym in ["ES", "MES", "NQ", "MNQ", "CL", "GC"] {
            let spec = table.get(sym).unwrap();
            assert_eq!(spec.tick_size * spec.point_value, spec.tick_value, "{sym}");
        }
    }

    #[test]
    fn unknown_symbol_is_none() {
        let table = InstrumentTable::cme_defaults();
        assert!(table.get("ZZZ").is_none());
        assert!(!table.contains("ZZZ"));
    }

    #[test]
    fn exposure_margin_falls_back_to_initial() {
        let table = InstrumentTable::cme_defaults();
        assert_eq!(table.get("MES").unwrap().exposure_margin(), dec!(50));
        assert_eq!(table.get("CL").unwrap().exposure_margin(), dec!(6000));
    }

    #[test]
    fn rounding_and_tick_distance() {
        let table = InstrumentTable::cme_defaults();
        let es = table.get("ES").unwrap();
        assert_eq!(es.round_to_tick(dec!(5000.13)), dec!(5000.25));
        assert_eq!(es.round_to_tick(dec!(5000.10)), dec!(5000.00));
        let a = Price::new_unchecked(dec!(5000));
        let b = Price::new_unchecked(dec!(4997.5));
        assert_eq!(es.ticks_between(a, b), dec!(10));
    }
}
