//! Orchestration loop.
//!
//! One event at a time, start to finish, on the calling thread:
//!
//! 1. start/end filter (before start is skipped, past end stops the run)
//! 2. indicator enrichment
//! 3. executor sees the bar (bracket exits happen here)
//! 4. strategy signals, each through the risk engine, approved ones to the executor
//! 5. equity += net pnl of every trade closed this tick
//! 6. executor positions pushed into the risk engine's exposure view
//! 7. risk engine equity update (may trip the kill switch)
//! 8. one equity point, traded or not, then the progress callback
//!
//! A rejected signal never stops the run. Cancellation does, with
//! [`RunError::Cancelled`].

use crate::clock::ManualClock;
use crate::executor::{ExecutionBackend, ExecutionError};
use crate::feed::{FeedError, MarketFeed};
use crate::indicators::IndicatorCalculator;
use crate::market::MarketEvent;
use crate::metrics::PerformanceMetrics;
use crate::persistence::{StateStore, StoreError};
use crate::position::Trade;
use crate::risk::{RiskEngine, RiskError};
use crate::strategy::Strategy;
use crate::types::{Quote, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub initial_equity: Quote,
    /// Events before this are skipped.
    pub start: Option<Timestamp>,
    /// The first event after this ends the run.
    pub end: Option<Timestamp>,
    pub atr_period: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            initial_equity: Quote::new(dec!(100000)),
            start: None,
            end: None,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: Timestamp,
    pub equity: Quote,
    pub high_water_mark: Quote,
    /// From the runner's own peak, as a fraction.
    pub drawdown: Decimal,
    pub open_positions: usize,
}

/// Running totals handed to the progress callback after each bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub bars: usize,
    pub timestamp: Timestamp,
    pub equity: Quote,
    pub trades: usize,
    pub win_rate: Decimal,
}

pub type ProgressFn = Box<dyn FnMut(&Progress) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub feed: String,
    pub start_equity: Quote,
    pub end_equity: Quote,
    pub total_return: Decimal,
    pub max_drawdown: Decimal,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: Decimal,
    pub profit_factor: Decimal,
    pub bars_processed: usize,
    pub signals: usize,
    pub rejected_signals: usize,
    pub kill_switch_active: bool,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }

    fn from_feed(e: FeedError) -> Self {
        if e.is_cancelled() {
            RunError::Cancelled
        } else {
            RunError::Feed(e)
        }
    }

    fn from_execution(e: ExecutionError) -> Self {
        if e.is_cancelled() {
            RunError::Cancelled
        } else {
            RunError::Execution(e)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    bars: usize,
    signals: usize,
    rejected: usize,
    wins: usize,
}

pub struct Runner {
    config: RunnerConfig,
    feed: Box<dyn MarketFeed>,
    strategy: Box<dyn Strategy>,
    risk: Arc<RiskEngine>,
    executor: Arc<dyn ExecutionBackend>,
    indicators: IndicatorCalculator,
    replay_clock: Option<Arc<ManualClock>>,
    progress: Option<ProgressFn>,
    equity: Quote,
    peak: Quote,
    start_equity: Quote,
    trades: Vec<Trade>,
    trades_seen: usize,
    curve: Vec<EquityPoint>,
    counters: Counters,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("feed", &self.feed.name())
            .field("strategy", &self.strategy.name())
            .field("executor", &self.executor.name())
            .field("equity", &self.equity)
            .field("bars", &self.counters.bars)
            .finish()
    }
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        feed: Box<dyn MarketFeed>,
        strategy: Box<dyn Strategy>,
        risk: Arc<RiskEngine>,
        executor: Arc<dyn ExecutionBackend>,
    ) -> Self {
        let indicators = IndicatorCalculator::new(config.atr_period);
        let equity = config.initial_equity;
        Self {
            config,
            feed,
            strategy,
            risk,
            executor,
            indicators,
            replay_clock: None,
            progress: None,
            equity,
            peak: equity,
            start_equity: equity,
            trades: Vec::new(),
            trades_seen: 0,
            curve: Vec::new(),
            counters: Counters::default(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Move this clock to each bar's time before the bar is processed, so
    /// ids and halt times follow the replayed data rather than the wall.
    pub fn with_replay_clock(mut self, clock: Arc<ManualClock>) -> Self {
        self.replay_clock = Some(clock);
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn equity(&self) -> Quote {
        self.equity
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.curve
    }

    pub fn risk(&self) -> &Arc<RiskEngine> {
        &self.risk
    }

    pub fn run(&mut self, cancel: &CancellationToken) -> Result<BacktestResult, RunError> {
        info!(
            feed = %self.feed.name(),
            strategy = %self.strategy.name(),
            equity = %self.equity,
            "run started"
        );
        loop {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            let Some(event) = self.feed.next_event(cancel).map_err(RunError::from_feed)? else {
                break;
            };
            if self.config.start.is_some_and(|start| event.timestamp < start) {
                continue;
            }
            if self.config.end.is_some_and(|end| event.timestamp > end) {
                debug!(ts = %event.timestamp, "end of window reached");
                break;
            }
            self.process_event(cancel, event)?;
        }

        let result = self.result();
        info!(
            bars = result.bars_processed,
            trades = result.total_trades,
            end_equity = %result.end_equity,
            total_return = %result.total_return,
            max_drawdown = %result.max_drawdown,
            "run finished"
        );
        Ok(result)
    }

    fn process_event(&mut self, cancel: &CancellationToken, mut event: MarketEvent) -> Result<(), RunError> {
        if let Some(clock) = &self.replay_clock {
            clock.set(event.timestamp);
        }
        self.indicators.enrich(&mut event);

        self.executor
            .on_market(cancel, &event)
            .map_err(RunError::from_execution)?;

        for signal in self.strategy.on_event(cancel, &event) {
            self.counters.signals += 1;
            let intent = match self.risk.validate_and_size(cancel, &signal, &event) {
                Ok(intent) => intent,
                Err(RiskError::Cancelled) => return Err(RunError::Cancelled),
                Err(_) => {
                    // already logged by the risk engine
                    self.counters.rejected += 1;
                    continue;
                }
            };
            match self.executor.place_order(cancel, &intent) {
                // the next signal on this bar must see the new exposure
                Ok(result) if result.is_filled() => self.push_position(cancel, &intent.symbol)?,
                Ok(result) => {
                    self.counters.rejected += 1;
                    debug!(id = %result.client_order_id, status = ?result.status, "order not filled");
                }
                Err(e) if e.is_cancelled() => return Err(RunError::Cancelled),
                Err(e @ ExecutionError::Shutdown) => return Err(RunError::Execution(e)),
                Err(e) => {
                    self.counters.rejected += 1;
                    warn!(id = %intent.client_order_id, error = %e, "order rejected by executor");
                }
            }
        }

        // realized pnl of everything closed this tick, bracket exits included
        let closed = self.executor.trades_since(self.trades_seen);
        self.trades_seen += closed.len();
        for trade in closed {
            self.equity = self.equity.add(trade.net_pnl);
            if trade.is_winner() {
                self.counters.wins += 1;
            }
            self.trades.push(trade);
        }

        self.sync_positions(cancel)?;
        match self.risk.update_equity(cancel, self.equity) {
            Ok(_) => {}
            Err(RiskError::Cancelled) => return Err(RunError::Cancelled),
            Err(e) => warn!(error = %e, "equity update failed"),
        }

        if self.equity > self.peak {
            self.peak = self.equity;
        }
        let drawdown = if self.peak.is_positive() {
            (self.peak.value() - self.equity.value()) / self.peak.value()
        } else {
            Decimal::ZERO
        };
        self.curve.push(EquityPoint {
            timestamp: event.timestamp,
            equity: self.equity,
            high_water_mark: self.peak,
            drawdown: drawdown.max(Decimal::ZERO),
            open_positions: self.executor.positions().len(),
        });
        self.counters.bars += 1;

        if let Some(progress) = self.progress.as_mut() {
            let win_rate = if self.trades.is_empty() {
                Decimal::ZERO
            } else {
                Decimal::from(self.counters.wins as u64) / Decimal::from(self.trades.len() as u64)
            };
            progress(&Progress {
                bars: self.counters.bars,
                timestamp: event.timestamp,
                equity: self.equity,
                trades: self.trades.len(),
                win_rate,
            });
        }
        Ok(())
    }

    // the risk engine's exposure view follows the executor after every tick
    fn push_position(&self, cancel: &CancellationToken, symbol: &str) -> Result<(), RunError> {
        match self.risk.update_position(cancel, symbol, self.executor.position(symbol)) {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(RunError::Cancelled),
            Err(e) => {
                warn!(%symbol, error = %e, "position sync failed");
                Ok(())
            }
        }
    }

    fn sync_positions(&self, cancel: &CancellationToken) -> Result<(), RunError> {
        let mut symbols: HashSet<String> = self.risk.positions().into_iter().map(|p| p.symbol).collect();
        let open = self.executor.positions();
        symbols.extend(open.iter().map(|p| p.symbol.clone()));
        for symbol in symbols {
            let current = open.iter().find(|p| p.symbol == symbol).cloned();
            if let Err(e) = self.risk.update_position(cancel, &symbol, current) {
                if e.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                warn!(%symbol, error = %e, "position sync failed");
            }
        }
        Ok(())
    }

    fn result(&self) -> BacktestResult {
        let values: Vec<Decimal> = std::iter::once(self.start_equity.value())
            .chain(self.curve.iter().map(|p| p.equity.value()))
            .collect();
        let metrics = PerformanceMetrics::compute(&values, &self.trades);
        BacktestResult {
            strategy: self.strategy.name().to_string(),
            feed: self.feed.name().to_string(),
            start_equity: self.start_equity,
            end_equity: self.equity,
            total_return: metrics.total_return,
            max_drawdown: metrics.max_drawdown,
            total_trades: metrics.trade_count,
            winning_trades: metrics.winning_trades,
            losing_trades: metrics.losing_trades,
            win_rate: metrics.win_rate,
            profit_factor: metrics.profit_factor,
            bars_processed: self.counters.bars,
            signals: self.counters.signals,
            rejected_signals: self.counters.rejected,
            kill_switch_active: self.risk.is_safe_mode(),
            trades: self.trades.clone(),
            equity_curve: self.curve.clone(),
            metrics,
        }
    }

    /// Fresh run against the same configuration: executor, strategy,
    /// indicators, risk engine and the local curve all start over, and a
    /// restartable feed is rewound.
    pub fn reset(&mut self) {
        self.executor.reset();
        self.strategy.reset();
        self.indicators.reset();
        self.risk.reset(self.config.initial_equity);
        if self.feed.is_restartable() {
            if let Err(e) = self.feed.restart() {
                warn!(error = %e, "feed restart failed");
            }
        }
        self.equity = self.config.initial_equity;
        self.peak = self.equity;
        self.start_equity = self.equity;
        self.trades.clear();
        self.trades_seen = 0;
        self.curve.clear();
        self.counters = Counters::default();
        debug!("runner reset");
    }

    // 8.1: persistence. startup and shutdown only, never inside the loop.

    /// Load saved state, if any. Returns false on a first start.
    pub fn recover(&mut self, cancel: &CancellationToken, store: &dyn StateStore) -> Result<bool, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let Some(saved) = store.load_bot_state()? else {
            return Ok(false);
        };
        self.risk.restore(&saved);
        self.equity = saved.equity;
        self.peak = saved.high_water_mark.max(saved.equity);
        self.start_equity = saved.equity;

        let positions = store.load_positions()?;
        self.executor
            .restore_positions(cancel, positions)
            .map_err(RunError::from_execution)?;
        self.sync_positions(cancel)?;
        let pending = store.load_pending_orders()?;
        if !pending.is_empty() {
            // market orders are never resubmitted after a restart
            warn!(count = pending.len(), "discarding pending orders from previous session");
        }
        Ok(true)
    }

    pub fn save(&self, store: &dyn StateStore) -> Result<(), RunError> {
        store.save_bot_state(&self.risk.bot_state())?;
        store.save_positions(&self.executor.positions())?;
        store.save_pending_orders(&self.executor.open_orders())?;
        if let Some(last) = self.curve.last() {
            store.save_snapshot(last)?;
        }
        info!(equity = %self.equity, "state saved");
        Ok(())
    }

    /// Save, then stop the executor and close the feed. Safe to call twice.
    pub fn shutdown(&mut self, store: Option<&dyn StateStore>) -> Result<(), RunError> {
        if let Some(store) = store {
            self.save(store)?;
        }
        self.executor.shutdown()?;
        self.feed.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SequentialIdGenerator;
    use crate::executor::{ExecutionConfig, SimulatedExecutor};
    use crate::feed::ReplayFeed;
    use crate::instrument::InstrumentTable;
    use crate::persistence::MemoryStore;
    use crate::risk::RiskConfig;
    use crate::signal::Signal;
    use crate::types::Side;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Goes long on the first bar, short on the third.
    struct Scripted {
        bar: usize,
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn on_event(&mut self, _cancel: &CancellationToken, event: &MarketEvent) -> Vec<Signal> {
            self.bar += 1;
            let side = match self.bar {
                1 => Side::Long,
                3 => Side::Short,
                _ => return Vec::new(),
            };
            vec![Signal::new(&event.symbol, side, event.timestamp).with_stop_ticks(dec!(40))]
        }

        fn reset(&mut self) {
            self.bar = 0;
        }
    }

    fn bars(closes: &[Decimal]) -> Vec<MarketEvent> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                MarketEvent::bar("MES", Timestamp::from_millis(i as i64 * 60_000), *c, *c + dec!(1), *c - dec!(1), *c)
                    .unwrap()
            })
            .collect()
    }

    fn runner(config: RunnerConfig, closes: &[Decimal]) -> Runner {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let risk = Arc::new(RiskEngine::new(
            RiskConfig::default(),
            InstrumentTable::cme_defaults(),
            config.initial_equity,
            clock.clone(),
            Arc::new(SequentialIdGenerator::new("T")),
        ));
        let executor = Arc::new(SimulatedExecutor::new(
            ExecutionConfig::default(),
            InstrumentTable::cme_defaults(),
        ));
        Runner::new(
            config,
            Box::new(ReplayFeed::new("replay", bars(closes))),
            Box::new(Scripted { bar: 0 }),
            risk,
            executor,
        )
        .with_replay_clock(clock)
    }

    #[test]
    fn equity_follows_trades() {
        let mut r = runner(RunnerConfig::default(), &[dec!(5000), dec!(5002), dec!(5004), dec!(5003)]);
        let result = r.run(&CancellationToken::new()).unwrap();
        assert_eq!(result.bars_processed, 4);
        assert_eq!(result.equity_curve.len(), 4);
        assert_eq!(result.total_trades, 1);
        let net: Quote = result.trades.iter().map(|t| t.net_pnl).sum();
        assert_eq!(result.end_equity.sub(result.start_equity), net);
        assert!(result.trades[0].is_winner());
    }

    /// Two identical longs on the first bar.
    struct DoubleLong {
        fired: bool,
    }

    impl Strategy for DoubleLong {
        fn name(&self) -> &str {
            "double-long"
        }

        fn on_event(&mut self, _cancel: &CancellationToken, event: &MarketEvent) -> Vec<Signal> {
            if std::mem::replace(&mut self.fired, true) {
                return Vec::new();
            }
            let signal = Signal::new(&event.symbol, Side::Long, event.timestamp).with_stop_ticks(dec!(1));
            vec![signal.clone(), signal]
        }

        fn reset(&mut self) {
            self.fired = false;
        }
    }

    #[test]
    fn same_bar_signals_see_earlier_fills() {
        let config = RunnerConfig {
            initial_equity: Quote::new(dec!(10000)),
            ..RunnerConfig::default()
        };
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let risk = Arc::new(RiskEngine::new(
            RiskConfig::default(),
            InstrumentTable::cme_defaults(),
            config.initial_equity,
            clock.clone(),
            Arc::new(SequentialIdGenerator::new("T")),
        ));
        let executor = Arc::new(SimulatedExecutor::new(
            ExecutionConfig::default(),
            InstrumentTable::cme_defaults(),
        ));
        let mut r = Runner::new(
            config,
            Box::new(ReplayFeed::new("replay", bars(&[dec!(5000)]))),
            Box::new(DoubleLong { fired: false }),
            risk.clone(),
            executor.clone(),
        )
        .with_replay_clock(clock);

        // 100 / (1 tick * 1.25) = 80 contracts each, 80 * 50 = 4000 under the 5000 cap
        let result = r.run(&CancellationToken::new()).unwrap();
        assert_eq!(result.signals, 2);
        assert_eq!(result.rejected_signals, 1);
        assert_eq!(executor.position("MES").map(|p| p.contracts), Some(80));
        assert_eq!(risk.position("MES").map(|p| p.contracts), Some(80));
        assert!(risk.total_exposure().value() <= dec!(5000));
    }

    #[test]
    fn window_filters() {
        let config = RunnerConfig {
            start: Some(Timestamp::from_millis(60_000)),
            end: Some(Timestamp::from_millis(120_000)),
            ..RunnerConfig::default()
        };
        let mut r = runner(config, &[dec!(5000), dec!(5001), dec!(5002), dec!(5003), dec!(5004)]);
        let result = r.run(&CancellationToken::new()).unwrap();
        assert_eq!(result.bars_processed, 2);
        assert_eq!(result.equity_curve[0].timestamp.as_millis(), 60_000);
    }

    #[test]
    fn progress_called_per_bar() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut r = runner(RunnerConfig::default(), &[dec!(5000), dec!(5001), dec!(5002)])
            .with_progress(Box::new(move |_p: &Progress| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        r.run(&CancellationToken::new()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancelled_run_is_distinct() {
        let mut r = runner(RunnerConfig::default(), &[dec!(5000)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(r.run(&cancel).unwrap_err().is_cancelled());
    }

    #[test]
    fn reset_reproduces() {
        let closes = [dec!(5000), dec!(4990), dec!(5010), dec!(5020), dec!(5015)];
        let mut r = runner(RunnerConfig::default(), &closes);
        let first = r.run(&CancellationToken::new()).unwrap();
        r.reset();
        let second = r.run(&CancellationToken::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_and_recover() {
        let store = MemoryStore::new();
        let mut r = runner(RunnerConfig::default(), &[dec!(5000), dec!(5001)]);
        r.run(&CancellationToken::new()).unwrap();
        r.save(&store).unwrap();
        assert_eq!(store.load_positions().unwrap().len(), 1);

        let mut fresh = runner(RunnerConfig::default(), &[dec!(5001)]);
        assert!(fresh.recover(&CancellationToken::new(), &store).unwrap());
        assert_eq!(fresh.risk().positions().len(), 1);
        assert_eq!(fresh.equity(), r.equity());

        fresh.shutdown(Some(&store)).unwrap();
        fresh.shutdown(None).unwrap();
    }
}
