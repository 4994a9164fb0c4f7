//! Risk engine: kill switch, stop placement, sizing and exposure limits.
//!
//! Every signal passes through [`RiskEngine::validate_and_size`] before it can
//! become an order. The engine owns the high water mark tracker, one sizer per
//! instrument and its own view of open positions (used for margin exposure
//! only, never for execution).
//!
//! The kill switch is a two-state machine. `Normal -> SafeMode` fires when
//! drawdown reaches the configured maximum, whether the breach is noticed on an
//! equity update or by a signal validation. `SafeMode -> Normal` only happens on
//! an explicit [`RiskEngine::exit_safe_mode`] (or a full [`RiskEngine::reset`]);
//! recovering equity does not clear it. The check and the transition run under
//! one lock, so two signals racing at the threshold cannot both get through.

use crate::clock::{Clock, OrderIdGenerator};
use crate::hwm::{HighWaterMark, HwmSnapshot};
use crate::instrument::{InstrumentSpec, InstrumentTable};
use crate::market::MarketEvent;
use crate::persistence::BotState;
use crate::position::Position;
use crate::signal::{OrderIntent, Signal};
use crate::sizing::{PositionSizer, SizingRejection};
use crate::types::{Price, Quote, Side, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Risk parameters. All percentages are fractions (0.01 = 1%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade.
    pub max_risk_per_trade_pct: Decimal,
    /// Drawdown from peak at which the kill switch trips (inclusive).
    pub max_drawdown_pct: Decimal,
    /// Margin cap for one symbol as a fraction of equity.
    pub max_exposure_per_symbol_pct: Decimal,
    /// Margin cap across all symbols as a fraction of equity.
    pub max_total_exposure_pct: Decimal,
    pub stop_loss_atr_multiple: Decimal,
    pub take_profit_atr_multiple: Decimal,
    /// How long a minted intent stays valid after its signal bar.
    pub order_ttl_ms: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade_pct: dec!(0.01),
            max_drawdown_pct: dec!(0.10),
            max_exposure_per_symbol_pct: dec!(0.50),
            max_total_exposure_pct: dec!(0.80),
            stop_loss_atr_multiple: dec!(1.5),
            take_profit_atr_multiple: dec!(3.0),
            order_ttl_ms: 60_000,
        }
    }
}

impl RiskConfig {
    /// Take-profit distance as a multiple of stop distance.
    pub fn reward_ratio(&self) -> Decimal {
        if self.stop_loss_atr_multiple <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.take_profit_atr_multiple / self.stop_loss_atr_multiple
    }
}

/// Why the engine is halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    Drawdown { drawdown: Decimal, limit: Decimal },
    Manual { reason: String },
    /// Loaded from persisted state that was already halted.
    Restored,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::Drawdown { drawdown, limit } => {
                write!(f, "drawdown {drawdown} reached limit {limit}")
            }
            HaltReason::Manual { reason } => write!(f, "manual halt: {reason}"),
            HaltReason::Restored => write!(f, "restored halted state"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineMode {
    Normal,
    SafeMode { since: Timestamp, reason: HaltReason },
}

impl EngineMode {
    pub fn is_safe_mode(&self) -> bool {
        matches!(self, EngineMode::SafeMode { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureScope {
    Symbol(String),
    Total,
}

impl fmt::Display for ExposureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposureScope::Symbol(s) => write!(f, "symbol {s}"),
            ExposureScope::Total => write!(f, "total"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RiskError {
    #[error("kill switch active since {since}")]
    KillSwitchActive { since: Timestamp },

    #[error("invalid symbol {0}")]
    InvalidSymbol(String),

    #[error("signal for {signal} paired with market event for {event}")]
    SymbolMismatch { signal: String, event: String },

    #[error("no stop for {symbol}: no explicit stop and ATR is zero")]
    MissingStop { symbol: String },

    #[error("sizing rejected: {0}")]
    Sizing(#[from] SizingRejection),

    #[error("{scope} exposure {required} exceeds limit {limit}")]
    ExposureLimit {
        scope: ExposureScope,
        required: Quote,
        limit: Quote,
    },

    #[error("take profit for {symbol} falls outside the positive price range")]
    InvalidTakeProfit { symbol: String },

    #[error("cancelled")]
    Cancelled,
}

impl RiskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RiskError::Cancelled)
    }

    /// Expected, frequent rejections that say nothing is wrong with the caller.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            RiskError::KillSwitchActive { .. }
                | RiskError::ExposureLimit { .. }
                | RiskError::Sizing(_)
                | RiskError::InvalidSymbol(_)
        )
    }
}

#[derive(Debug)]
struct RiskState {
    sizers: HashMap<String, PositionSizer>,
    positions: HashMap<String, Position>,
    mode: EngineMode,
}

impl RiskState {
    // 6.1: one-way trip. only exit_safe_mode/reset walk it back.
    fn trip(&mut self, reason: HaltReason, now: Timestamp) {
        if self.mode.is_safe_mode() {
            return;
        }
        error!(%reason, since = %now, "kill switch activated, entering safe mode");
        self.mode = EngineMode::SafeMode { since: now, reason };
    }

    fn check_safe_mode(&self) -> Result<(), RiskError> {
        match &self.mode {
            EngineMode::SafeMode { since, .. } => Err(RiskError::KillSwitchActive { since: *since }),
            EngineMode::Normal => Ok(()),
        }
    }
}

pub struct RiskEngine {
    config: RiskConfig,
    instruments: InstrumentTable,
    /// Own lock for readers. writers only touch it while holding `state`.
    tracker: HighWaterMark,
    state: Mutex<RiskState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn OrderIdGenerator>,
}

impl fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskEngine")
            .field("config", &self.config)
            .field("tracker", &self.tracker.snapshot())
            .field("mode", &self.mode())
            .finish()
    }
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        instruments: InstrumentTable,
        initial_equity: Quote,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn OrderIdGenerator>,
    ) -> Self {
        let sizers = instruments
            .symbols()
            .filter_map(|s| instruments.get(s))
            .map(|spec| (spec.symbol.clone(), PositionSizer::new(spec.clone())))
            .collect();

        Self {
            config,
            instruments,
            tracker: HighWaterMark::new(initial_equity),
            state: Mutex::new(RiskState {
                sizers,
                positions: HashMap::new(),
                mode: EngineMode::Normal,
            }),
            clock,
            ids,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn instruments(&self) -> &InstrumentTable {
        &self.instruments
    }

    // 6.2: the validation pipeline. holds the state lock start to finish.
    pub fn validate_and_size(
        &self,
        cancel: &CancellationToken,
        signal: &Signal,
        event: &MarketEvent,
    ) -> Result<OrderIntent, RiskError> {
        if cancel.is_cancelled() {
            return Err(RiskError::Cancelled);
        }

        let mut state = self.state.lock();

        if let Err(e) = state.check_safe_mode() {
            info!(symbol = %signal.symbol, side = %signal.side, "signal rejected: kill switch active");
            return Err(e);
        }

        // first breach trips here, not only on the next equity poll
        let snap = self.tracker.snapshot();
        if snap.drawdown >= self.config.max_drawdown_pct {
            let now = self.clock.now();
            state.trip(
                HaltReason::Drawdown {
                    drawdown: snap.drawdown,
                    limit: self.config.max_drawdown_pct,
                },
                now,
            );
            return Err(RiskError::KillSwitchActive { since: now });
        }

        let result = self.size_signal(&state, snap.equity, signal, event);
        match &result {
            Ok(intent) => info!(
                id = %intent.client_order_id,
                symbol = %intent.symbol,
                side = %intent.side,
                contracts = intent.contracts,
                entry = %intent.entry_price,
                stop = %intent.stop_loss,
                target = %intent.take_profit,
                risk = %intent.risk_amount,
                "order approved"
            ),
            Err(e) if e.is_policy() => info!(symbol = %signal.symbol, error = %e, "signal rejected"),
            Err(e) => warn!(symbol = %signal.symbol, error = %e, "signal rejected"),
        }
        result
    }

    fn size_signal(
        &self,
        state: &RiskState,
        equity: Quote,
        signal: &Signal,
        event: &MarketEvent,
    ) -> Result<OrderIntent, RiskError> {
        let sizer = state
            .sizers
            .get(&signal.symbol)
            .ok_or_else(|| RiskError::InvalidSymbol(signal.symbol.clone()))?;
        if event.symbol != signal.symbol {
            return Err(RiskError::SymbolMismatch {
                signal: signal.symbol.clone(),
                event: event.symbol.clone(),
            });
        }
        let spec = sizer.spec();

        let stop_ticks = self.stop_ticks(spec, signal, event)?;
        let entry = event.close;
        let sized = sizer.calculate_with_details(
            equity,
            self.config.max_risk_per_trade_pct,
            stop_ticks,
            entry,
            signal.side,
        )?;

        self.check_exposure(state, spec, sized.contracts, equity)?;

        // stop distance scaled by tp/sl, not snapped to the tick grid
        let take_profit = stop_ticks
            .checked_mul(self.config.reward_ratio())
            .and_then(|tp_ticks| entry.offset(signal.side.sign() * tp_ticks, spec.tick_size))
            .filter(|tp| tp.value() != entry.value())
            .ok_or_else(|| RiskError::InvalidTakeProfit {
                symbol: signal.symbol.clone(),
            })?;

        let client_order_id = self.ids.next_id(self.clock.now());

        Ok(OrderIntent {
            client_order_id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            contracts: sized.contracts,
            entry_price: entry,
            stop_loss: sized.stop_loss,
            take_profit,
            risk_amount: sized.risk_amount,
            created_at: event.timestamp,
            expires_at: event.timestamp.plus_millis(self.config.order_ttl_ms),
            signal_reason: signal.reason.clone(),
        })
    }

    // 6.3: explicit stop wins, else ceil(ATR * multiple / tick). never a made-up default.
    fn stop_ticks(
        &self,
        spec: &InstrumentSpec,
        signal: &Signal,
        event: &MarketEvent,
    ) -> Result<Decimal, RiskError> {
        if let Some(ticks) = signal.explicit_stop() {
            return Ok(ticks);
        }
        let atr = event.atr();
        if atr <= Decimal::ZERO || spec.tick_size <= Decimal::ZERO {
            return Err(RiskError::MissingStop {
                symbol: signal.symbol.clone(),
            });
        }
        atr.checked_mul(self.config.stop_loss_atr_multiple)
            .and_then(|d| d.checked_div(spec.tick_size))
            .map(|ticks| ticks.ceil())
            .ok_or(RiskError::Sizing(SizingRejection::StopOutOfRange {
                stop_ticks: Decimal::MAX,
            }))
    }

    // 6.4: margin exposure. the sized symbol counts existing + new whatever the side,
    // the others count as they stand.
    fn check_exposure(
        &self,
        state: &RiskState,
        spec: &InstrumentSpec,
        contracts: u32,
        equity: Quote,
    ) -> Result<(), RiskError> {
        let resulting = state
            .positions
            .get(&spec.symbol)
            .map_or(contracts, |pos| pos.contracts.saturating_add(contracts));
        let symbol_margin = Quote::new(spec.exposure_margin() * Decimal::from(resulting));
        let symbol_limit = equity.mul(self.config.max_exposure_per_symbol_pct);
        if symbol_margin > symbol_limit {
            return Err(RiskError::ExposureLimit {
                scope: ExposureScope::Symbol(spec.symbol.clone()),
                required: symbol_margin,
                limit: symbol_limit,
            });
        }

        let others: Quote = state
            .positions
            .values()
            .filter(|p| p.symbol != spec.symbol)
            .map(|p| self.position_margin(p))
            .sum();
        let total = others.add(symbol_margin);
        let total_limit = equity.mul(self.config.max_total_exposure_pct);
        if total > total_limit {
            return Err(RiskError::ExposureLimit {
                scope: ExposureScope::Total,
                required: total,
                limit: total_limit,
            });
        }
        Ok(())
    }

    fn position_margin(&self, position: &Position) -> Quote {
        self.instruments
            .get(&position.symbol)
            .map(|spec| Quote::new(spec.exposure_margin() * Decimal::from(position.contracts)))
            .unwrap_or_else(Quote::zero)
    }

    /// Record new account equity and trip the kill switch if drawdown breached.
    pub fn update_equity(
        &self,
        cancel: &CancellationToken,
        equity: Quote,
    ) -> Result<HwmSnapshot, RiskError> {
        if cancel.is_cancelled() {
            return Err(RiskError::Cancelled);
        }
        let mut state = self.state.lock();
        self.tracker.update(equity);
        let snap = self.tracker.snapshot();
        if snap.drawdown >= self.config.max_drawdown_pct {
            state.trip(
                HaltReason::Drawdown {
                    drawdown: snap.drawdown,
                    limit: self.config.max_drawdown_pct,
                },
                self.clock.now(),
            );
        }
        Ok(snap)
    }

    /// Replace the engine's view of one symbol. None or zero contracts removes it.
    pub fn update_position(
        &self,
        cancel: &CancellationToken,
        symbol: &str,
        position: Option<Position>,
    ) -> Result<(), RiskError> {
        if cancel.is_cancelled() {
            return Err(RiskError::Cancelled);
        }
        let mut state = self.state.lock();
        match position.filter(|p| !p.is_empty()) {
            Some(p) => {
                state.positions.insert(symbol.to_string(), p);
            }
            None => {
                state.positions.remove(symbol);
            }
        }
        Ok(())
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.state.lock().positions.get(symbol).cloned()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state.lock().positions.values().cloned().collect()
    }

    /// Margin currently committed across the engine's position view.
    pub fn total_exposure(&self) -> Quote {
        let state = self.state.lock();
        state.positions.values().map(|p| self.position_margin(p)).sum()
    }

    pub fn mode(&self) -> EngineMode {
        self.state.lock().mode.clone()
    }

    pub fn is_safe_mode(&self) -> bool {
        self.state.lock().mode.is_safe_mode()
    }

    pub fn safe_mode_since(&self) -> Option<Timestamp> {
        match &self.state.lock().mode {
            EngineMode::SafeMode { since, .. } => Some(*since),
            EngineMode::Normal => None,
        }
    }

    /// Operator halt. Sticky like a drawdown trip.
    pub fn enter_safe_mode(&self, reason: &str) {
        let mut state = self.state.lock();
        state.trip(
            HaltReason::Manual {
                reason: reason.to_string(),
            },
            self.clock.now(),
        );
    }

    /// The only way back to normal. Does not touch the peak, so if drawdown is
    /// still past the limit the next validation trips again; call
    /// [`RiskEngine::rebase_high_water_mark`] first to accept the loss.
    pub fn exit_safe_mode(&self) -> bool {
        let mut state = self.state.lock();
        if !state.mode.is_safe_mode() {
            return false;
        }
        warn!(equity = %self.tracker.equity(), "safe mode cleared by operator");
        state.mode = EngineMode::Normal;
        true
    }

    /// Make current equity the new peak.
    pub fn rebase_high_water_mark(&self) {
        let _state = self.state.lock();
        let equity = self.tracker.equity();
        self.tracker.reset(equity);
        info!(%equity, "high water mark rebased");
    }

    pub fn snapshot(&self) -> HwmSnapshot {
        self.tracker.snapshot()
    }

    pub fn equity(&self) -> Quote {
        self.tracker.equity()
    }

    /// Fresh start for a replay: new equity and peak, no positions, normal mode.
    pub fn reset(&self, equity: Quote) {
        let mut state = self.state.lock();
        self.tracker.reset(equity);
        state.positions.clear();
        state.mode = EngineMode::Normal;
    }

    // 6.5: persistence hooks, used at startup and shutdown only
    pub fn bot_state(&self) -> BotState {
        let state = self.state.lock();
        let snap = self.tracker.snapshot();
        let since = match &state.mode {
            EngineMode::SafeMode { since, .. } => Some(*since),
            EngineMode::Normal => None,
        };
        BotState {
            equity: snap.equity,
            high_water_mark: snap.high_water_mark,
            kill_switch_active: since.is_some(),
            kill_switch_since: since,
            saved_at: self.clock.now(),
        }
    }

    /// Load persisted equity, peak and kill switch. A halted state stays halted.
    pub fn restore(&self, saved: &BotState) {
        let mut state = self.state.lock();
        self.tracker.restore(saved.equity, saved.high_water_mark);
        if saved.kill_switch_active {
            state.mode = EngineMode::SafeMode {
                since: saved.kill_switch_since.unwrap_or(saved.saved_at),
                reason: HaltReason::Restored,
            };
        }
        info!(
            equity = %saved.equity,
            hwm = %saved.high_water_mark,
            halted = saved.kill_switch_active,
            "risk state restored"
        );
    }
}

/// True when stop and target sit on the correct sides of entry for `side`.
pub fn brackets_are_ordered(side: Side, stop: Price, entry: Price, target: Price) -> bool {
    match side {
        Side::Long => stop < entry && entry < target,
        Side::Short => stop > entry && entry > target,
    }
}
