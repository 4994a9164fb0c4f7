//! Position and trade queries, plus recovery of persisted positions.

use super::core::SimulatedExecutor;
use super::results::ExecutionError;
use crate::position::{Position, Trade};
use crate::types::Quote;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl SimulatedExecutor {
    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().positions.get(symbol).cloned()
    }

    /// Open positions sorted by symbol.
    pub fn positions(&self) -> Vec<Position> {
        let mut out: Vec<Position> = self.state.lock().positions.values().cloned().collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn unrealized_pnl(&self) -> Quote {
        self.state
            .lock()
            .positions
            .values()
            .map(|p| p.unrealized_pnl)
            .sum()
    }

    pub fn trade_count(&self) -> usize {
        self.state.lock().trades.len()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.state.lock().trades.clone()
    }

    pub fn trades_since(&self, start: usize) -> Vec<Trade> {
        let state = self.state.lock();
        state.trades.get(start..).map(<[Trade]>::to_vec).unwrap_or_default()
    }

    /// Replace open positions with persisted ones. Rows for unknown symbols or
    /// with zero contracts are dropped.
    pub fn restore_positions(
        &self,
        cancel: &CancellationToken,
        positions: Vec<Position>,
    ) -> Result<usize, ExecutionError> {
        self.guard(cancel)?;
        let mut state = self.state.lock();
        state.positions.clear();
        for pos in positions {
            if pos.is_empty() {
                continue;
            }
            if !self.instruments.contains(&pos.symbol) {
                warn!(symbol = %pos.symbol, "dropping restored position for unknown symbol");
                continue;
            }
            state.positions.insert(pos.symbol.clone(), pos);
        }
        let restored = state.positions.len();
        info!(restored, "positions restored");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use crate::executor::{ExecutionConfig, SimulatedExecutor};
    use crate::instrument::InstrumentTable;
    use crate::position::Position;
    use crate::types::{Price, Side, Timestamp};
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn restore_skips_empty_and_unknown() {
        let ex = SimulatedExecutor::new(ExecutionConfig::default(), InstrumentTable::cme_defaults());
        let cancel = CancellationToken::new();
        let px = Price::new_unchecked(dec!(5000));
        let ts = Timestamp::from_millis(0);
        let restored = ex
            .restore_positions(
                &cancel,
                vec![
                    Position::open("ES", Side::Long, 2, px, ts),
                    Position::open("MES", Side::Short, 0, px, ts),
                    Position::open("XYZ", Side::Long, 1, px, ts),
                ],
            )
            .unwrap();
        assert_eq!(restored, 1);
        assert_eq!(ex.positions().len(), 1);
        assert_eq!(ex.position("ES").unwrap().contracts, 2);
        assert!(ex.trades_since(5).is_empty());
    }
}
