// 11.0: strategies turn bars into directional signals. sizing, stops and limits are
// the risk engine's job, a strategy only says which way and why.

use crate::market::MarketEvent;
use crate::signal::Signal;
use crate::types::Side;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Signals for this bar. A cancelled call returns nothing.
    fn on_event(&mut self, cancel: &CancellationToken, event: &MarketEvent) -> Vec<Signal>;

    /// Forget all history before a fresh run.
    fn reset(&mut self);
}

// 11.1: simple moving average crossover. fast above slow = long, below = short.
// a cross only counts when the gap clears min_edge and the cooldown has passed.
#[derive(Debug, Clone)]
struct MaCrossState {
    fast_win: VecDeque<Decimal>,
    slow_win: VecDeque<Decimal>,
    fast_sum: Decimal,
    slow_sum: Decimal,
    prev_sign: i8,
    since_last: u32,
}

impl MaCrossState {
    fn new(cooldown_bars: u32) -> Self {
        Self {
            fast_win: VecDeque::new(),
            slow_win: VecDeque::new(),
            fast_sum: Decimal::ZERO,
            slow_sum: Decimal::ZERO,
            prev_sign: 0,
            // first cross may fire immediately
            since_last: cooldown_bars,
        }
    }

    fn push_window(win: &mut VecDeque<Decimal>, sum: &mut Decimal, cap: usize, v: Decimal) {
        if win.len() == cap {
            if let Some(x) = win.pop_front() {
                *sum -= x;
            }
        }
        win.push_back(v);
        *sum += v;
    }
}

#[derive(Debug, Clone)]
pub struct MaCrossStrategy {
    name: String,
    fast: usize,
    slow: usize,
    min_edge: Decimal,
    cooldown_bars: u32,
    states: HashMap<String, MaCrossState>,
}

impl MaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        let fast = fast.max(1);
        let slow = slow.max(fast + 1);
        Self {
            name: format!("ma_cross_{fast}_{slow}"),
            fast,
            slow,
            min_edge: Decimal::ZERO,
            cooldown_bars: 0,
            states: HashMap::new(),
        }
    }

    /// Ignore crosses where |fast - slow| is below this many points.
    pub fn with_min_edge(mut self, min_edge: Decimal) -> Self {
        self.min_edge = min_edge.max(Decimal::ZERO);
        self
    }

    pub fn with_cooldown(mut self, bars: u32) -> Self {
        self.cooldown_bars = bars;
        self
    }

    fn step(&mut self, event: &MarketEvent) -> Option<Signal> {
        let cooldown = self.cooldown_bars;
        let st = self
            .states
            .entry(event.symbol.clone())
            .or_insert_with(|| MaCrossState::new(cooldown));

        let close = event.close.value();
        MaCrossState::push_window(&mut st.fast_win, &mut st.fast_sum, self.fast, close);
        MaCrossState::push_window(&mut st.slow_win, &mut st.slow_sum, self.slow, close);
        st.since_last = st.since_last.saturating_add(1);

        if st.fast_win.len() < self.fast || st.slow_win.len() < self.slow {
            return None;
        }
        let fast = st.fast_sum / Decimal::from(self.fast as u64);
        let slow = st.slow_sum / Decimal::from(self.slow as u64);
        let diff = fast - slow;
        if diff.is_zero() || diff.abs() < self.min_edge {
            return None;
        }
        let sign: i8 = if diff > Decimal::ZERO { 1 } else { -1 };

        // the first full window only sets the baseline
        if st.prev_sign == 0 {
            st.prev_sign = sign;
            return None;
        }
        if sign == st.prev_sign || st.since_last < cooldown {
            return None;
        }
        st.prev_sign = sign;
        st.since_last = 0;

        let (side, reason) = if sign > 0 {
            (Side::Long, "golden cross")
        } else {
            (Side::Short, "dead cross")
        };
        debug!(symbol = %event.symbol, %fast, %slow, reason, "crossover");
        Some(Signal::new(&event.symbol, side, event.timestamp).with_reason(format!(
            "{reason}: sma{}={} sma{}={}",
            self.fast,
            fast.round_dp(4),
            self.slow,
            slow.round_dp(4)
        )))
    }
}

impl Strategy for MaCrossStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, cancel: &CancellationToken, event: &MarketEvent) -> Vec<Signal> {
        if cancel.is_cancelled() {
            return Vec::new();
        }
        self.step(event).into_iter().collect()
    }

    fn reset(&mut self) {
        self.states.clear();
    }
}
