//! Broker abstraction.
//!
//! The runner only talks to this trait. [`super::SimulatedExecutor`] is the
//! backtest implementation; a live broker client implements the same calls
//! and keeps its network I/O outside any engine lock.

use super::results::ExecutionError;
use crate::market::MarketEvent;
use crate::position::{Position, Trade};
use crate::signal::{OrderIntent, OrderResult};
use tokio_util::sync::CancellationToken;

pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Feed one bar. Returns any bracket exits it triggered.
    fn on_market(
        &self,
        cancel: &CancellationToken,
        event: &MarketEvent,
    ) -> Result<Vec<OrderResult>, ExecutionError>;

    fn place_order(
        &self,
        cancel: &CancellationToken,
        intent: &OrderIntent,
    ) -> Result<OrderResult, ExecutionError>;

    fn cancel_order(
        &self,
        cancel: &CancellationToken,
        client_order_id: &str,
    ) -> Result<(), ExecutionError>;

    fn position(&self, symbol: &str) -> Option<Position>;

    fn positions(&self) -> Vec<Position>;

    fn open_orders(&self) -> Vec<OrderIntent>;

    fn trade_count(&self) -> usize;

    /// Trades recorded at or after index `start`.
    fn trades_since(&self, start: usize) -> Vec<Trade>;

    fn trades(&self) -> Vec<Trade> {
        self.trades_since(0)
    }

    /// Replace open positions with persisted ones. Returns how many were kept.
    fn restore_positions(
        &self,
        cancel: &CancellationToken,
        positions: Vec<Position>,
    ) -> Result<usize, ExecutionError>;

    /// Drop all state for a fresh run. Does not undo a shutdown.
    fn reset(&self);

    /// Idempotent.
    fn shutdown(&self) -> Result<(), ExecutionError>;
}
