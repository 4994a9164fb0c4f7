//! Fixed-fractional position sizing.
//!
//! Risk a fixed fraction of equity per trade: the dollar budget is
//! `equity * risk_pct`, the dollar risk of one contract is
//! `stop_ticks * tick_value`, and the contract count is the floor of the
//! ratio. Fractional contracts are not tradable, so anything that floors to
//! zero is a rejection, never a round-up.

use crate::instrument::InstrumentSpec;
use crate::types::{Price, Quote, Side};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Absolute ceiling on the fraction of equity any single trade may risk.
pub const MAX_RISK_PCT: Decimal = dec!(0.10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SizingRejection {
    #[error("insufficient equity: {equity} cannot fund one contract risking {per_contract_risk} with budget {risk_budget}")]
    InsufficientEquity {
        equity: Quote,
        risk_budget: Quote,
        per_contract_risk: Quote,
    },

    #[error("stop too tight: {stop_ticks} ticks")]
    StopTooTight { stop_ticks: Decimal },

    #[error("stop of {stop_ticks} ticks is too wide to price")]
    StopOutOfRange { stop_ticks: Decimal },

    #[error("risk {risk_pct} must be positive")]
    InvalidRisk { risk_pct: Decimal },

    #[error("risk ceiling exceeded: {risk_pct} > {ceiling}")]
    RiskCeilingExceeded { risk_pct: Decimal, ceiling: Decimal },

    #[error("stop {stop_ticks} ticks from {entry} leaves a non-positive price")]
    StopBeyondZero { entry: Price, stop_ticks: Decimal },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingResult {
    pub contracts: u32,
    /// Dollars lost if the stop is hit: contracts * per-contract risk.
    pub risk_amount: Quote,
    pub risk_per_contract: Quote,
    pub stop_ticks: Decimal,
    pub stop_loss: Price,
}

#[derive(Debug, Clone)]
pub struct PositionSizer {
    spec: InstrumentSpec,
}

impl PositionSizer {
    pub fn new(spec: InstrumentSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &InstrumentSpec {
        &self.spec
    }

    /// Contracts for the given risk. Zero for any degenerate input, never negative.
    pub fn calculate(&self, equity: Quote, risk_pct: Decimal, stop_ticks: Decimal) -> u32 {
        if stop_ticks <= Decimal::ZERO || !equity.is_positive() || risk_pct <= Decimal::ZERO {
            return 0;
        }
        // a per-contract risk too large to represent funds nothing
        let per_contract = match stop_ticks.checked_mul(self.spec.tick_value) {
            Some(p) if p > Decimal::ZERO => p,
            _ => return 0,
        };
        // a budget or ratio too large to represent saturates
        equity
            .value()
            .checked_mul(risk_pct)
            .and_then(|budget| budget.checked_div(per_contract))
            .and_then(|raw| raw.floor().to_u32())
            .unwrap_or(u32::MAX)
    }

    /// Size and place the stop, or explain why the trade cannot be taken.
    pub fn calculate_with_details(
        &self,
        equity: Quote,
        risk_pct: Decimal,
        stop_ticks: Decimal,
        entry: Price,
        side: Side,
    ) -> Result<SizingResult, SizingRejection> {
        if risk_pct <= Decimal::ZERO {
            return Err(SizingRejection::InvalidRisk { risk_pct });
        }
        if risk_pct > MAX_RISK_PCT {
            return Err(SizingRejection::RiskCeilingExceeded {
                risk_pct,
                ceiling: MAX_RISK_PCT,
            });
        }
        if stop_ticks <= Decimal::ZERO {
            return Err(SizingRejection::StopTooTight { stop_ticks });
        }

        let risk_per_contract = stop_ticks
            .checked_mul(self.spec.tick_value)
            .map(Quote::new)
            .ok_or(SizingRejection::StopOutOfRange { stop_ticks })?;
        let risk_budget = equity.mul(risk_pct);
        let contracts = self.calculate(equity, risk_pct, stop_ticks);
        if contracts < 1 {
            return Err(SizingRejection::InsufficientEquity {
                equity,
                risk_budget,
                per_contract_risk: risk_per_contract,
            });
        }

        // long stops sit below entry, short stops above
        let stop_loss = entry
            .offset(-side.sign() * stop_ticks, self.spec.tick_size)
            .ok_or(SizingRejection::StopBeyondZero { entry, stop_ticks })?;

        Ok(SizingResult {
            contracts,
            risk_amount: risk_per_contract.mul(Decimal::from(contracts)),
            risk_per_contract,
            stop_ticks,
            stop_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentTable;
    use rust_decimal_macros::dec;

    fn mes() -> PositionSizer {
        PositionSizer::new(InstrumentTable::cme_defaults().get("MES").unwrap().clone())
    }

    #[test]
    fn one_percent_of_ten_thousand() {
        // 100 / (10 * 1.25) = 8
        let n = mes().calculate(Quote::new(dec!(10000)), dec!(0.01), dec!(10));
        assert_eq!(n, 8);
    }

    #[test]
    fn floors_not_rounds() {
        // 100 / (9 * 1.25) = 8.88
        let n = mes().calculate(Quote::new(dec!(10000)), dec!(0.01), dec!(9));
        assert_eq!(n, 8);
    }

    #[test]
    fn degenerate_inputs_give_zero() {
        let s = mes();
        assert_eq!(s.calculate(Quote::new(dec!(10000)), dec!(0.01), dec!(0)), 0);
        assert_eq!(s.calculate(Quote::new(dec!(10000)), dec!(0.01), dec!(-3)), 0);
        assert_eq!(s.calculate(Quote::zero(), dec!(0.01), dec!(10)), 0);
        assert_eq!(s.calculate(Quote::new(dec!(-5)), dec!(0.01), dec!(10)), 0);
        assert_eq!(s.calculate(Quote::new(dec!(10000)), dec!(0), dec!(10)), 0);
    }

    #[test]
    fn details_long_stop_below_entry() {
        let r = mes()
            .calculate_with_details(
                Quote::new(dec!(10000)),
                dec!(0.01),
                dec!(10),
                Price::new_unchecked(dec!(5000)),
                Side::Long,
            )
            .unwrap();
        assert_eq!(r.contracts, 8);
        assert_eq!(r.stop_loss.value(), dec!(4997.50));
        assert_eq!(r.risk_amount.value(), dec!(100));
    }

    #[test]
    fn details_short_stop_above_entry() {
        let r = mes()
            .calculate_with_details(
                Quote::new(dec!(10000)),
                dec!(0.01),
                dec!(10),
                Price::new_unchecked(dec!(5000)),
                Side::Short,
            )
            .unwrap();
        assert_eq!(r.stop_loss.value(), dec!(5002.50));
    }

    #[test]
    fn rejects_over_ceiling() {
        let err = mes()
            .calculate_with_details(
                Quote::new(dec!(10000)),
                dec!(0.11),
                dec!(10),
                Price::new_unchecked(dec!(5000)),
                Side::Long,
            )
            .unwrap_err();
        assert!(matches!(err, SizingRejection::RiskCeilingExceeded { .. }));
    }

    #[test]
    fn rejects_below_one_contract() {
        // 10 / (10 * 1.25) = 0.8
        let err = mes()
            .calculate_with_details(
                Quote::new(dec!(1000)),
                dec!(0.01),
                dec!(10),
                Price::new_unchecked(dec!(5000)),
                Side::Long,
            )
            .unwrap_err();
        assert!(matches!(err, SizingRejection::InsufficientEquity { .. }));
        assert!(err.to_string().starts_with("insufficient equity"));
    }

    #[test]
    fn rejects_zero_stop() {
        let err = mes()
            .calculate_with_details(
                Quote::new(dec!(10000)),
                dec!(0.01),
                dec!(0),
                Price::new_unchecked(dec!(5000)),
                Side::Long,
            )
            .unwrap_err();
        assert!(matches!(err, SizingRejection::StopTooTight { .. }));
    }

    #[test]
    fn unpriceable_stop_sizes_nothing() {
        let s = mes();
        assert_eq!(s.calculate(Quote::new(dec!(10000)), dec!(0.01), Decimal::MAX), 0);
        let err = s
            .calculate_with_details(
                Quote::new(dec!(10000)),
                dec!(0.01),
                Decimal::MAX,
                Price::new_unchecked(dec!(5000)),
                Side::Short,
            )
            .unwrap_err();
        assert_eq!(err, SizingRejection::StopOutOfRange { stop_ticks: Decimal::MAX });
    }

    #[test]
    fn unrepresentable_ratio_saturates() {
        // 0.1 * MAX / 0.0125 does not fit in a Decimal
        let n = mes().calculate(Quote::new(Decimal::MAX), dec!(0.1), dec!(0.01));
        assert_eq!(n, u32::MAX);
    }
}
