// 4.0: open position tracking and closed trade records. pnl = (exit - entry) * point value * contracts * sign.
// 4.1 has increase/reduce/flip logic at the bottom.

use crate::types::{Price, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub contracts: u32,
    pub entry_price: Price,
    pub entry_time: Timestamp,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub unrealized_pnl: Quote,
    /// Gross pnl already banked by partial closes of this position.
    pub realized_pnl: Quote,
    /// Reason of the signal that opened it.
    pub signal_reason: String,
}

impl Position {
    pub fn open(
        symbol: &str,
        side: Side,
        contracts: u32,
        entry_price: Price,
        entry_time: Timestamp,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            contracts,
            entry_price,
            entry_time,
            stop_loss: None,
            take_profit: None,
            unrealized_pnl: Quote::zero(),
            realized_pnl: Quote::zero(),
            signal_reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.signal_reason = reason.to_string();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.contracts == 0
    }

    // 4.1: paper gains/losses at the given price
    pub fn mark(&mut self, price: Price, point_value: Decimal) {
        self.unrealized_pnl =
            calculate_pnl(self.side, self.contracts, self.entry_price, price, point_value);
    }
}

/// Why a round trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Signal,
}

/// Closed round trip. Append-only, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub side: Side,
    pub contracts: u32,
    pub entry_price: Price,
    pub entry_time: Timestamp,
    pub exit_price: Price,
    pub exit_time: Timestamp,
    pub gross_pnl: Quote,
    pub commission: Quote,
    pub net_pnl: Quote,
    pub exit_reason: ExitReason,
    pub signal_reason: String,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.net_pnl.is_positive()
    }
}

// 4.2: the pnl formula, signed by side
pub fn calculate_pnl(
    side: Side,
    contracts: u32,
    entry_price: Price,
    exit_price: Price,
    point_value: Decimal,
) -> Quote {
    let points = exit_price.value() - entry_price.value();
    Quote::new(side.sign() * points * point_value * Decimal::from(contracts))
}

/// Portion of a position closed by an opposite-side fill.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedLeg {
    pub side: Side,
    pub contracts: u32,
    pub entry_price: Price,
    pub entry_time: Timestamp,
    pub exit_price: Price,
    pub gross_pnl: Quote,
    pub signal_reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    /// None when the fill flattened the symbol. never a zero-contract row.
    pub new_position: Option<Position>,
    pub closed: Option<ClosedLeg>,
}

// 4.3: adds to existing position. averages the entry price by contracts
pub fn increase_position(
    position: &Position,
    contracts: u32,
    fill_price: Price,
    timestamp: Timestamp,
) -> Position {
    let old = Decimal::from(position.contracts);
    let added = Decimal::from(contracts);
    let total = old + added;

    let new_entry = if total > Decimal::ZERO {
        let weighted = old * position.entry_price.value() + added * fill_price.value();
        Price::new_unchecked(weighted / total)
    } else {
        fill_price
    };

    let mut updated = position.clone();
    updated.contracts = position.contracts.saturating_add(contracts);
    updated.entry_price = new_entry;
    if position.contracts == 0 {
        updated.entry_time = timestamp;
    }
    updated
}

pub fn reduce_position(
    position: &Position,
    contracts: u32,
    fill_price: Price,
    point_value: Decimal,
) -> PositionUpdate {
    let closed_contracts = contracts.min(position.contracts);
    let gross = calculate_pnl(
        position.side,
        closed_contracts,
        position.entry_price,
        fill_price,
        point_value,
    );

    let closed = ClosedLeg {
        side: position.side,
        contracts: closed_contracts,
        entry_price: position.entry_price,
        entry_time: position.entry_time,
        exit_price: fill_price,
        gross_pnl: gross,
        signal_reason: position.signal_reason.clone(),
    };

    let remaining = position.contracts - closed_contracts;
    if remaining == 0 {
        return PositionUpdate {
            new_position: None,
            closed: Some(closed),
        };
    }

    // partial close, entry price unchanged
    let mut rest = position.clone();
    rest.contracts = remaining;
    rest.realized_pnl = position.realized_pnl.add(gross);
    PositionUpdate {
        new_position: Some(rest),
        closed: Some(closed),
    }
}

// 4.4: close everything, open the excess on the other side
pub fn flip_position(
    position: &Position,
    contracts: u32,
    fill_price: Price,
    point_value: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    let close = reduce_position(position, position.contracts, fill_price, point_value);
    let excess = contracts.saturating_sub(position.contracts);
    let new_position = if excess > 0 {
        Some(Position::open(
            &position.symbol,
            position.side.opposite(),
            excess,
            fill_price,
            timestamp,
        ))
    } else {
        None
    };

    PositionUpdate {
        new_position,
        closed: close.closed,
    }
}

/// Apply a fill of `contracts` on `side` to whatever is open on the symbol.
pub fn apply_fill(
    existing: Option<&Position>,
    symbol: &str,
    side: Side,
    contracts: u32,
    fill_price: Price,
    point_value: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    match existing {
        None => PositionUpdate {
            new_position: (contracts > 0)
                .then(|| Position::open(symbol, side, contracts, fill_price, timestamp)),
            closed: None,
        },
        Some(pos) if pos.side == side => PositionUpdate {
            new_position: Some(increase_position(pos, contracts, fill_price, timestamp)),
            closed: None,
        },
        Some(pos) if contracts > pos.contracts => {
            flip_position(pos, contracts, fill_price, point_value, timestamp)
        }
        Some(pos) => reduce_position(pos, contracts, fill_price, point_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn short_cover_profit() {
        // (5000 - 4970) * 5 = 150
        let pnl = calculate_pnl(Side::Short, 1, px(dec!(5000)), px(dec!(4970)), dec!(5));
        assert_eq!(pnl.value(), dec!(150));
    }

    #[test]
    fn long_loss() {
        let pnl = calculate_pnl(Side::Long, 2, px(dec!(5000)), px(dec!(4990)), dec!(50));
        assert_eq!(pnl.value(), dec!(-1000));
    }

    #[test]
    fn increase_averages_entry() {
        let pos = Position::open("ES", Side::Long, 2, px(dec!(5000)), ts(0));
        let bigger = increase_position(&pos, 2, px(dec!(5010)), ts(1));
        assert_eq!(bigger.contracts, 4);
        assert_eq!(bigger.entry_price.value(), dec!(5005));
        assert_eq!(bigger.entry_time, ts(0));
    }

    #[test]
    fn full_close_removes_position() {
        let pos = Position::open("ES", Side::Long, 3, px(dec!(5000)), ts(0));
        let update = reduce_position(&pos, 3, px(dec!(5002)), dec!(50));
        assert!(update.new_position.is_none());
        let closed = update.closed.unwrap();
        assert_eq!(closed.contracts, 3);
        assert_eq!(closed.gross_pnl.value(), dec!(300));
    }

    #[test]
    fn partial_close_keeps_entry() {
        let pos = Position::open("ES", Side::Short, 3, px(dec!(5000)), ts(0));
        let update = reduce_position(&pos, 1, px(dec!(4990)), dec!(50));
        let rest = update.new_position.unwrap();
        assert_eq!(rest.contracts, 2);
        assert_eq!(rest.entry_price.value(), dec!(5000));
        assert_eq!(rest.realized_pnl.value(), dec!(500));
    }

    #[test]
    fn flip_opens_excess() {
        let pos = Position::open("ES", Side::Long, 1, px(dec!(5000)), ts(0));
        let update = apply_fill(Some(&pos), "ES", Side::Short, 3, px(dec!(5004)), dec!(50), ts(5));
        let flipped = update.new_position.unwrap();
        assert_eq!(flipped.side, Side::Short);
        assert_eq!(flipped.contracts, 2);
        assert_eq!(flipped.entry_time, ts(5));
        assert_eq!(update.closed.unwrap().gross_pnl.value(), dec!(200));
    }

    #[test]
    fn zero_contract_open_is_nothing() {
        let update = apply_fill(None, "ES", Side::Long, 0, px(dec!(5000)), dec!(50), ts(0));
        assert!(update.new_position.is_none());
        assert!(update.closed.is_none());
    }

    #[test]
    fn mark_to_market() {
        let mut pos = Position::open("MES", Side::Long, 2, px(dec!(5000)), ts(0));
        pos.mark(px(dec!(5003.25)), dec!(5));
        assert_eq!(pos.unrealized_pnl.value(), dec!(32.50));
    }
}
