// 3.0: high water mark tracker. peak equity vs current equity gives drawdown.
// has its own lock so readers (dashboards, equity pollers) never wait on the risk engine.

use crate::types::Quote;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One consistent (current, peak, drawdown) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwmSnapshot {
    pub equity: Quote,
    pub high_water_mark: Quote,
    pub drawdown: Decimal,
}

#[derive(Debug, Default)]
struct HwmState {
    current: Quote,
    peak: Quote,
}

impl HwmState {
    // 3.1: zero peak means nothing to draw down from
    fn drawdown(&self) -> Decimal {
        let peak = self.peak.value();
        let current = self.current.value();
        if peak <= Decimal::ZERO || current >= peak {
            return Decimal::ZERO;
        }
        (peak - current) / peak
    }
}

#[derive(Debug, Default)]
pub struct HighWaterMark {
    state: RwLock<HwmState>,
}

impl HighWaterMark {
    pub fn new(initial_equity: Quote) -> Self {
        Self {
            state: RwLock::new(HwmState {
                current: initial_equity,
                peak: initial_equity,
            }),
        }
    }

    /// Load persisted values. A peak below current is raised to current.
    pub fn restore(&self, equity: Quote, peak: Quote) {
        let mut state = self.state.write();
        state.current = equity;
        state.peak = peak.max(equity);
    }

    /// Record new equity. Returns true when this set a new peak.
    pub fn update(&self, equity: Quote) -> bool {
        let mut state = self.state.write();
        state.current = equity;
        if equity > state.peak {
            state.peak = equity;
            true
        } else {
            false
        }
    }

    pub fn drawdown(&self) -> Decimal {
        self.state.read().drawdown()
    }

    pub fn equity(&self) -> Quote {
        self.state.read().current
    }

    pub fn high_water_mark(&self) -> Quote {
        self.state.read().peak
    }

    pub fn snapshot(&self) -> HwmSnapshot {
        let state = self.state.read();
        HwmSnapshot {
            equity: state.current,
            high_water_mark: state.peak,
            drawdown: state.drawdown(),
        }
    }

    /// Start over from a fresh equity value, forgetting the old peak.
    pub fn reset(&self, equity: Quote) {
        let mut state = self.state.write();
        state.current = equity;
        state.peak = equity;
    }
}
