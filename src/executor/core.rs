// 7.1 executor/core.rs: the simulated executor. all mutable state sits behind one lock.
// fill handlers run after that lock is released, in fill order, on the calling thread.

use super::backend::ExecutionBackend;
use super::config::ExecutionConfig;
use super::results::ExecutionError;
use crate::instrument::{InstrumentSpec, InstrumentTable};
use crate::market::MarketEvent;
use crate::position::{ExitReason, Position, Trade};
use crate::signal::{FillSource, OrderIntent, OrderResult, OrderStatus};
use crate::types::{Price, Quote, Side, Timestamp};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Called once per fill. Must not block for long and should not call back
/// into the executor.
pub type FillHandler = Arc<dyn Fn(&OrderResult) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub(super) struct LastPrice {
    pub(super) price: Price,
    pub(super) timestamp: Timestamp,
}

#[derive(Debug, Default)]
pub(super) struct ExecState {
    pub(super) positions: HashMap<String, Position>,
    pub(super) last_prices: HashMap<String, LastPrice>,
    pub(super) used_ids: HashSet<String>,
    pub(super) history: Vec<OrderResult>,
    pub(super) trades: Vec<Trade>,
    pub(super) next_exit_id: u64,
}

/** 7.2: main executor struct */
pub struct SimulatedExecutor {
    pub(super) config: ExecutionConfig,
    pub(super) instruments: InstrumentTable,
    pub(super) state: Mutex<ExecState>,
    handlers: RwLock<Vec<FillHandler>>,
    shut_down: AtomicBool,
}

impl fmt::Debug for SimulatedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedExecutor")
            .field("config", &self.config)
            .field("handlers", &self.handlers.read().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl SimulatedExecutor {
    pub fn new(config: ExecutionConfig, instruments: InstrumentTable) -> Self {
        Self {
            config,
            instruments,
            state: Mutex::new(ExecState::default()),
            handlers: RwLock::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn on_fill(&self, handler: FillHandler) {
        self.handlers.write().push(handler);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub(super) fn guard(&self, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        if self.is_shut_down() {
            return Err(ExecutionError::Shutdown);
        }
        Ok(())
    }

    /// Latest close seen for a symbol.
    pub fn last_price(&self, symbol: &str) -> Option<(Price, Timestamp)> {
        self.state
            .lock()
            .last_prices
            .get(symbol)
            .map(|lp| (lp.price, lp.timestamp))
    }

    // 7.3: one bar in. stop is checked before target, so a bar touching both is a loss.
    // a gap through the stop still fills at the stop, not the open.
    pub fn update_market(
        &self,
        cancel: &CancellationToken,
        event: &MarketEvent,
    ) -> Result<Vec<OrderResult>, ExecutionError> {
        self.guard(cancel)?;

        let mut fills = Vec::new();
        {
            let mut state = self.state.lock();
            state.last_prices.insert(
                event.symbol.clone(),
                LastPrice {
                    price: event.close,
                    timestamp: event.timestamp,
                },
            );

            let Some(spec) = self.instruments.get(&event.symbol) else {
                return Ok(fills);
            };
            let Some(position) = state.positions.get(&event.symbol).cloned() else {
                return Ok(fills);
            };

            match bracket_trigger(&position, event) {
                Some((source, trigger)) => {
                    let result = self.close_on_trigger(&mut state, spec, &position, source, trigger, event.timestamp);
                    fills.push(result);
                }
                None => {
                    if let Some(pos) = state.positions.get_mut(&event.symbol) {
                        pos.mark(event.close, spec.point_value);
                    }
                }
            }
        }

        self.dispatch(&fills);
        Ok(fills)
    }

    fn close_on_trigger(
        &self,
        state: &mut ExecState,
        spec: &InstrumentSpec,
        position: &Position,
        source: FillSource,
        trigger: Price,
        timestamp: Timestamp,
    ) -> OrderResult {
        let exit_side = position.side.opposite();
        let fill_price = self.slipped(spec, exit_side, trigger);
        let commission = self.commission(position.contracts);
        let gross = crate::position::calculate_pnl(
            position.side,
            position.contracts,
            position.entry_price,
            fill_price,
            spec.point_value,
        );
        let exit_reason = match source {
            FillSource::StopLoss => ExitReason::StopLoss,
            _ => ExitReason::TakeProfit,
        };

        let trade = Trade {
            symbol: position.symbol.clone(),
            side: position.side,
            contracts: position.contracts,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            exit_price: fill_price,
            exit_time: timestamp,
            gross_pnl: gross,
            commission,
            net_pnl: gross.sub(commission),
            exit_reason,
            signal_reason: position.signal_reason.clone(),
        };
        info!(
            symbol = %trade.symbol,
            reason = ?exit_reason,
            contracts = trade.contracts,
            exit = %fill_price,
            net = %trade.net_pnl,
            "bracket exit"
        );
        state.positions.remove(&position.symbol);
        state.trades.push(trade);

        state.next_exit_id += 1;
        let tag = match source {
            FillSource::StopLoss => "SL",
            _ => "TP",
        };
        let client_order_id = format!("{tag}-{}-{}", position.symbol, state.next_exit_id);
        state.used_ids.insert(client_order_id.clone());

        let result = OrderResult {
            client_order_id,
            symbol: position.symbol.clone(),
            side: exit_side,
            status: OrderStatus::Filled,
            source,
            filled_contracts: position.contracts,
            average_price: Some(fill_price),
            commission,
            slippage: self.slippage_cost(spec, position.contracts),
            timestamp,
        };
        self.record(state, result.clone());
        result
    }

    // 7.4: slippage always moves the fill against the trader. buys pay up, sells give up.
    pub(super) fn slipped(&self, spec: &InstrumentSpec, side: Side, price: Price) -> Price {
        let ticks = if side.is_buy() {
            self.config.slippage_ticks
        } else {
            -self.config.slippage_ticks
        };
        price.offset(ticks, spec.tick_size).unwrap_or(price)
    }

    pub(super) fn slippage_cost(&self, spec: &InstrumentSpec, contracts: u32) -> Quote {
        Quote::new(self.config.slippage_ticks * spec.tick_value * Decimal::from(contracts))
    }

    pub(super) fn commission(&self, contracts: u32) -> Quote {
        Quote::new(self.config.commission_per_side * Decimal::from(contracts))
    }

    // history is bounded, oldest results drop first
    pub(super) fn record(&self, state: &mut ExecState, result: OrderResult) {
        state.history.push(result);
        if state.history.len() > self.config.max_order_history {
            let drain_count = state.history.len() - self.config.max_order_history;
            state.history.drain(0..drain_count);
        }
    }

    /// Must be called without holding `state`.
    pub(super) fn dispatch(&self, results: &[OrderResult]) {
        let handlers: Vec<FillHandler> = self.handlers.read().clone();
        if handlers.is_empty() {
            return;
        }
        for result in results.iter().filter(|r| r.is_filled()) {
            for handler in &handlers {
                handler(result);
            }
        }
    }

    pub fn order_history(&self) -> Vec<OrderResult> {
        self.state.lock().history.clone()
    }

    pub fn recent_orders(&self, count: usize) -> Vec<OrderResult> {
        let state = self.state.lock();
        let start = state.history.len().saturating_sub(count);
        state.history[start..].to_vec()
    }

    /// Clear positions, prices, ids, history and trades. Handlers stay registered.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = ExecState::default();
        debug!("executor reset");
    }

    pub fn shutdown(&self) -> Result<(), ExecutionError> {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            let state = self.state.lock();
            info!(
                open_positions = state.positions.len(),
                trades = state.trades.len(),
                "executor shut down"
            );
        }
        Ok(())
    }
}

/// Which bracket, if any, this bar touched. Stop first.
pub(super) fn bracket_trigger(position: &Position, event: &MarketEvent) -> Option<(FillSource, Price)> {
    let stop_hit = position.stop_loss.filter(|stop| match position.side {
        Side::Long => event.low <= *stop,
        Side::Short => event.high >= *stop,
    });
    if let Some(stop) = stop_hit {
        return Some((FillSource::StopLoss, stop));
    }
    let target_hit = position.take_profit.filter(|tp| match position.side {
        Side::Long => event.high >= *tp,
        Side::Short => event.low <= *tp,
    });
    target_hit.map(|tp| (FillSource::TakeProfit, tp))
}

impl ExecutionBackend for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn on_market(
        &self,
        cancel: &CancellationToken,
        event: &MarketEvent,
    ) -> Result<Vec<OrderResult>, ExecutionError> {
        self.update_market(cancel, event)
    }

    fn place_order(
        &self,
        cancel: &CancellationToken,
        intent: &OrderIntent,
    ) -> Result<OrderResult, ExecutionError> {
        SimulatedExecutor::place_order(self, cancel, intent)
    }

    fn cancel_order(
        &self,
        cancel: &CancellationToken,
        client_order_id: &str,
    ) -> Result<(), ExecutionError> {
        SimulatedExecutor::cancel_order(self, cancel, client_order_id)
    }

    fn position(&self, symbol: &str) -> Option<Position> {
        SimulatedExecutor::position(self, symbol)
    }

    fn positions(&self) -> Vec<Position> {
        SimulatedExecutor::positions(self)
    }

    fn open_orders(&self) -> Vec<OrderIntent> {
        SimulatedExecutor::open_orders(self)
    }

    fn trade_count(&self) -> usize {
        SimulatedExecutor::trade_count(self)
    }

    fn trades_since(&self, start: usize) -> Vec<Trade> {
        SimulatedExecutor::trades_since(self, start)
    }

    fn restore_positions(
        &self,
        cancel: &CancellationToken,
        positions: Vec<Position>,
    ) -> Result<usize, ExecutionError> {
        SimulatedExecutor::restore_positions(self, cancel, positions)
    }

    fn reset(&self) {
        SimulatedExecutor::reset(self)
    }

    fn shutdown(&self) -> Result<(), ExecutionError> {
        SimulatedExecutor::shutdown(self)
    }
}
