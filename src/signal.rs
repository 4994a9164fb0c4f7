// 2.0: the order lifecycle. strategy Signal -> risk-approved OrderIntent -> executor OrderResult.
// a signal is consumed once. an intent carries its own idempotency key.

use crate::types::{Price, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    /// Explicit stop distance. None or non-positive means derive from ATR.
    pub stop_ticks: Option<Decimal>,
    /// 0..1 conviction, informational.
    pub strength: Decimal,
    pub reason: String,
    pub timestamp: Timestamp,
}

impl Signal {
    pub fn new(symbol: &str, side: Side, timestamp: Timestamp) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            stop_ticks: None,
            strength: Decimal::ONE,
            reason: String::new(),
            timestamp,
        }
    }

    pub fn with_stop_ticks(mut self, ticks: Decimal) -> Self {
        self.stop_ticks = Some(ticks);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Positive explicit stop if one was given.
    pub fn explicit_stop(&self) -> Option<Decimal> {
        self.stop_ticks.filter(|t| *t > Decimal::ZERO)
    }
}

// 2.1: sized order ready to hand to an executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub contracts: u32,
    pub entry_price: Price,
    pub stop_loss: Price,
    pub take_profit: Price,
    pub risk_amount: Quote,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    /// Reason text of the originating signal, carried onto the trade record.
    pub signal_reason: String,
}

impl OrderIntent {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    Rejected,
    Cancelled,
    Expired,
}

/// Why a fill happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillSource {
    Order,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub source: FillSource,
    pub filled_contracts: u32,
    pub average_price: Option<Price>,
    pub commission: Quote,
    /// Dollar cost of slippage on this fill.
    pub slippage: Quote,
    pub timestamp: Timestamp,
}

impl OrderResult {
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn explicit_stop_ignores_non_positive() {
        let ts = Timestamp::from_millis(0);
        assert_eq!(Signal::new("ES", Side::Long, ts).explicit_stop(), None);
        assert_eq!(Signal::new("ES", Side::Long, ts).with_stop_ticks(dec!(0)).explicit_stop(), None);
        assert_eq!(
            Signal::new("ES", Side::Long, ts).with_stop_ticks(dec!(8)).explicit_stop(),
            Some(dec!(8))
        );
    }

    #[test]
    fn intent_expiry_is_strict() {
        let intent = OrderIntent {
            client_order_id: "CL-1".into(),
            symbol: "ES".into(),
            side: Side::Long,
            contracts: 1,
            entry_price: Price::new_unchecked(dec!(5000)),
            stop_loss: Price::new_unchecked(dec!(4990)),
            take_profit: Price::new_unchecked(dec!(5020)),
            risk_amount: Quote::new(dec!(500)),
            created_at: Timestamp::from_millis(0),
            expires_at: Timestamp::from_millis(1000),
            signal_reason: String::new(),
        };
        assert!(!intent.is_expired(Timestamp::from_millis(1000)));
        assert!(intent.is_expired(Timestamp::from_millis(1001)));
    }
}
