//! Order placement and fills.

use super::core::SimulatedExecutor;
use super::results::ExecutionError;
use crate::position::{apply_fill, ExitReason, Trade};
use crate::signal::{FillSource, OrderIntent, OrderResult, OrderStatus};
use crate::types::Quote;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl SimulatedExecutor {
    /// Fill a market order at the latest price for its symbol.
    ///
    /// Rejections (duplicate id, unknown symbol, no price yet) leave no trace,
    /// so the caller may retry under a fresh id. An expired intent consumes its
    /// id and comes back as [`OrderStatus::Expired`] without a fill.
    pub fn place_order(
        &self,
        cancel: &CancellationToken,
        intent: &OrderIntent,
    ) -> Result<OrderResult, ExecutionError> {
        self.guard(cancel)?;

        let result = {
            let mut state = self.state.lock();

            if state.used_ids.contains(&intent.client_order_id) {
                warn!(id = %intent.client_order_id, symbol = %intent.symbol, "duplicate order rejected");
                return Err(ExecutionError::DuplicateOrder(intent.client_order_id.clone()));
            }
            let spec = self
                .instruments
                .get(&intent.symbol)
                .ok_or_else(|| ExecutionError::UnknownSymbol(intent.symbol.clone()))?;
            let last = state
                .last_prices
                .get(&intent.symbol)
                .copied()
                .ok_or_else(|| ExecutionError::NoMarketData(intent.symbol.clone()))?;

            state.used_ids.insert(intent.client_order_id.clone());

            if intent.is_expired(last.timestamp) || intent.contracts == 0 {
                let status = if intent.contracts == 0 {
                    OrderStatus::Rejected
                } else {
                    OrderStatus::Expired
                };
                info!(id = %intent.client_order_id, ?status, "order not filled");
                let result = OrderResult {
                    client_order_id: intent.client_order_id.clone(),
                    symbol: intent.symbol.clone(),
                    side: intent.side,
                    status,
                    source: FillSource::Order,
                    filled_contracts: 0,
                    average_price: None,
                    commission: Quote::zero(),
                    slippage: Quote::zero(),
                    timestamp: last.timestamp,
                };
                self.record(&mut state, result.clone());
                return Ok(result);
            }

            let fill_price = self.slipped(spec, intent.side, last.price);
            let commission = self.commission(intent.contracts);

            let update = apply_fill(
                state.positions.get(&intent.symbol),
                &intent.symbol,
                intent.side,
                intent.contracts,
                fill_price,
                spec.point_value,
                last.timestamp,
            );

            if let Some(leg) = update.closed {
                // the closing side's commission, on the contracts actually closed
                let leg_commission = self.commission(leg.contracts);
                let trade = Trade {
                    symbol: intent.symbol.clone(),
                    side: leg.side,
                    contracts: leg.contracts,
                    entry_price: leg.entry_price,
                    entry_time: leg.entry_time,
                    exit_price: leg.exit_price,
                    exit_time: last.timestamp,
                    gross_pnl: leg.gross_pnl,
                    commission: leg_commission,
                    net_pnl: leg.gross_pnl.sub(leg_commission),
                    exit_reason: ExitReason::Signal,
                    signal_reason: leg.signal_reason,
                };
                info!(
                    symbol = %trade.symbol,
                    contracts = trade.contracts,
                    exit = %trade.exit_price,
                    net = %trade.net_pnl,
                    "position closed by order"
                );
                state.trades.push(trade);
            }

            match update.new_position {
                Some(mut pos) => {
                    // orders on the position's side bring their own brackets
                    if pos.side == intent.side {
                        pos.stop_loss = Some(intent.stop_loss);
                        pos.take_profit = Some(intent.take_profit);
                        if pos.signal_reason.is_empty() {
                            pos.signal_reason = intent.signal_reason.clone();
                        }
                    }
                    pos.mark(last.price, spec.point_value);
                    state.positions.insert(intent.symbol.clone(), pos);
                }
                None => {
                    state.positions.remove(&intent.symbol);
                }
            }

            let result = OrderResult {
                client_order_id: intent.client_order_id.clone(),
                symbol: intent.symbol.clone(),
                side: intent.side,
                status: OrderStatus::Filled,
                source: FillSource::Order,
                filled_contracts: intent.contracts,
                average_price: Some(fill_price),
                commission,
                slippage: self.slippage_cost(spec, intent.contracts),
                timestamp: last.timestamp,
            };
            info!(
                id = %result.client_order_id,
                symbol = %result.symbol,
                side = %result.side,
                contracts = result.filled_contracts,
                price = %fill_price,
                "order filled"
            );
            self.record(&mut state, result.clone());
            result
        };

        self.dispatch(std::slice::from_ref(&result));
        Ok(result)
    }

    /// Market orders fill on placement, so nothing is ever resting.
    pub fn cancel_order(
        &self,
        cancel: &CancellationToken,
        client_order_id: &str,
    ) -> Result<(), ExecutionError> {
        self.guard(cancel)?;
        Err(ExecutionError::OrderNotFound(client_order_id.to_string()))
    }

    pub fn open_orders(&self) -> Vec<OrderIntent> {
        Vec::new()
    }

    /// Commission charged across every recorded fill.
    pub fn total_commission(&self) -> Quote {
        self.state
            .lock()
            .history
            .iter()
            .map(|r| r.commission)
            .sum()
    }

    pub fn is_order_known(&self, client_order_id: &str) -> bool {
        self.state.lock().used_ids.contains(client_order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingConfig;
    use crate::instrument::InstrumentTable;
    use crate::market::MarketEvent;
    use crate::types::{Price, Side, Timestamp};
    use crate::executor::ExecutionConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn executor(config: ExecutionConfig) -> SimulatedExecutor {
        SimulatedExecutor::new(config, InstrumentTable::cme_defaults())
    }

    fn tick(ex: &SimulatedExecutor, symbol: &str, ms: i64, price: Decimal) {
        let bar = MarketEvent::bar(symbol, Timestamp::from_millis(ms), price, price, price, price).unwrap();
        ex.update_market(&CancellationToken::new(), &bar).unwrap();
    }

    fn order(id: &str, symbol: &str, side: Side, contracts: u32) -> OrderIntent {
        let entry = dec!(5000);
        let (stop, tp) = match side {
            Side::Long => (dec!(4900), dec!(5200)),
            Side::Short => (dec!(5100), dec!(4800)),
        };
        OrderIntent {
            client_order_id: id.to_string(),
            symbol: symbol.to_string(),
            side,
            contracts,
            entry_price: Price::new_unchecked(entry),
            stop_loss: Price::new_unchecked(stop),
            take_profit: Price::new_unchecked(tp),
            risk_amount: Quote::new(dec!(100)),
            created_at: Timestamp::from_millis(0),
            expires_at: Timestamp::from_millis(60_000),
            signal_reason: "entry".into(),
        }
    }

    #[test]
    fn buy_slips_up_sell_slips_down() {
        let ex = executor(ExecutionConfig::default());
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 0, dec!(5000));
        let buy = ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap();
        assert_eq!(buy.average_price.unwrap().value(), dec!(5000.25));
        assert_eq!(buy.commission.value(), dec!(0.62));
        assert_eq!(buy.slippage.value(), dec!(12.50));
        let sell = ex.place_order(&cancel, &order("B", "ES", Side::Short, 1)).unwrap();
        assert_eq!(sell.average_price.unwrap().value(), dec!(4999.75));
    }

    #[test]
    fn scratch_trade_pays_commission() {
        let config = ExecutionConfig {
            slippage_ticks: dec!(0),
            ..ExecutionConfig::default()
        };
        let ex = executor(config);
        let cancel = CancellationToken::new();
        tick(&ex, "MES", 0, dec!(5000));
        ex.place_order(&cancel, &order("A", "MES", Side::Long, 1)).unwrap();
        ex.place_order(&cancel, &order("B", "MES", Side::Short, 1)).unwrap();
        let trades = ex.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].gross_pnl.value(), dec!(0));
        assert_eq!(trades[0].net_pnl.value(), dec!(-0.62));
        assert_eq!(trades[0].exit_reason, ExitReason::Signal);
        assert!(ex.position("MES").is_none());
        assert_eq!(ex.total_commission().value(), dec!(1.24));
    }

    #[test]
    fn duplicate_id_changes_nothing() {
        let ex = executor(TradingConfig::frictionless().execution);
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 0, dec!(5000));
        ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap();
        let err = ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap_err();
        assert_eq!(err, ExecutionError::DuplicateOrder("A".into()));
        assert_eq!(ex.position("ES").unwrap().contracts, 1);
        assert_eq!(ex.order_history().len(), 1);
        assert_eq!(ex.trade_count(), 0);
    }

    #[test]
    fn rejections_do_not_burn_the_id() {
        let ex = executor(ExecutionConfig::default());
        let cancel = CancellationToken::new();
        let err = ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap_err();
        assert_eq!(err, ExecutionError::NoMarketData("ES".into()));
        let err = ex.place_order(&cancel, &order("B", "ZZ", Side::Long, 1)).unwrap_err();
        assert_eq!(err, ExecutionError::UnknownSymbol("ZZ".into()));
        assert!(!ex.is_order_known("A"));
        tick(&ex, "ES", 0, dec!(5000));
        assert!(ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap().is_filled());
    }

    #[test]
    fn expired_intent_consumes_id() {
        let ex = executor(ExecutionConfig::default());
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 60_001, dec!(5000));
        let result = ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap();
        assert_eq!(result.status, OrderStatus::Expired);
        assert!(ex.position("ES").is_none());
        assert!(ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).is_err());
    }

    #[test]
    fn larger_opposite_order_reverses() {
        let ex = executor(TradingConfig::frictionless().execution);
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 0, dec!(5000));
        ex.place_order(&cancel, &order("A", "ES", Side::Long, 2)).unwrap();
        tick(&ex, "ES", 1, dec!(5010));
        ex.place_order(&cancel, &order("B", "ES", Side::Short, 5)).unwrap();

        let trades = ex.trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].contracts, 2);
        assert_eq!(trades[0].gross_pnl.value(), dec!(1000));

        let pos = ex.position("ES").unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.contracts, 3);
        assert_eq!(pos.stop_loss.unwrap().value(), dec!(5100));
    }

    #[test]
    fn partial_close_keeps_brackets() {
        let ex = executor(TradingConfig::frictionless().execution);
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 0, dec!(5000));
        ex.place_order(&cancel, &order("A", "ES", Side::Long, 3)).unwrap();
        ex.place_order(&cancel, &order("B", "ES", Side::Short, 1)).unwrap();
        let pos = ex.position("ES").unwrap();
        assert_eq!(pos.contracts, 2);
        assert_eq!(pos.stop_loss.unwrap().value(), dec!(4900));
    }

    #[test]
    fn cancelled_and_cancel_order() {
        let ex = executor(ExecutionConfig::default());
        let cancel = CancellationToken::new();
        tick(&ex, "ES", 0, dec!(5000));
        assert_eq!(
            ex.cancel_order(&cancel, "nope").unwrap_err(),
            ExecutionError::OrderNotFound("nope".into())
        );
        cancel.cancel();
        let err = ex.place_order(&cancel, &order("A", "ES", Side::Long, 1)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!ex.is_order_known("A"));
    }
}
