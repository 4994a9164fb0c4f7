//! Executor configuration options.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Adverse ticks applied to every fill.
    pub slippage_ticks: Decimal,
    /// Dollars per contract per side.
    pub commission_per_side: Decimal,
    /// Maximum number of order results to retain in memory.
    pub max_order_history: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_ticks: dec!(1),
            commission_per_side: dec!(0.62),
            max_order_history: 100_000,
        }
    }
}

impl ExecutionConfig {
    /// No slippage, no commission.
    pub fn frictionless() -> Self {
        Self {
            slippage_ticks: Decimal::ZERO,
            commission_per_side: Decimal::ZERO,
            ..Self::default()
        }
    }
}
