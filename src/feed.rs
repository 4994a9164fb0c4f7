// 12.0: market data sources. a replay feed is finite and can start over, a live feed
// runs until closed. the runner pulls one event at a time.

use crate::market::MarketEvent;
use crate::types::Timestamp;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("feed {0} is closed")]
    Closed(String),

    #[error("feed {0} cannot be restarted")]
    NotRestartable(String),

    #[error("feed source error: {0}")]
    Source(String),

    #[error("cancelled")]
    Cancelled,
}

impl FeedError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Cancelled)
    }
}

pub trait MarketFeed: Send {
    fn name(&self) -> &str;

    /// Next bar, or None once a finite feed is exhausted.
    fn next_event(&mut self, cancel: &CancellationToken) -> Result<Option<MarketEvent>, FeedError>;

    /// Idempotent. Later `next_event` calls return [`FeedError::Closed`].
    fn close(&mut self);

    fn is_restartable(&self) -> bool {
        false
    }

    /// Rewind to the first event and reopen.
    fn restart(&mut self) -> Result<(), FeedError> {
        Err(FeedError::NotRestartable(self.name().to_string()))
    }
}

/// Replays a fixed list of bars in the order given.
#[derive(Debug, Clone)]
pub struct ReplayFeed {
    name: String,
    events: Vec<MarketEvent>,
    cursor: usize,
    closed: bool,
}

impl ReplayFeed {
    pub fn new(name: &str, events: Vec<MarketEvent>) -> Self {
        Self {
            name: name.to_string(),
            events,
            cursor: 0,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }
}

impl MarketFeed for ReplayFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_event(&mut self, cancel: &CancellationToken) -> Result<Option<MarketEvent>, FeedError> {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        if self.closed {
            return Err(FeedError::Closed(self.name.clone()));
        }
        let event = self.events.get(self.cursor).cloned();
        if event.is_some() {
            self.cursor += 1;
        }
        Ok(event)
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(feed = %self.name, "feed closed");
        }
        self.closed = true;
    }

    fn is_restartable(&self) -> bool {
        true
    }

    fn restart(&mut self) -> Result<(), FeedError> {
        self.cursor = 0;
        self.closed = false;
        Ok(())
    }
}

// 12.1: synthetic bars. a tick-quantized random walk, reproducible from its seed.
#[derive(Debug, Clone)]
pub struct RandomWalkConfig {
    pub symbol: String,
    pub start_price: Decimal,
    pub tick_size: Decimal,
    /// Largest close-to-close move per bar, in ticks.
    pub max_step_ticks: i64,
    /// Largest wick beyond open/close, in ticks.
    pub max_wick_ticks: i64,
    pub start: Timestamp,
    pub bar_ms: i64,
    /// None runs until closed.
    pub bars: Option<usize>,
    pub seed: u64,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            symbol: "MES".to_string(),
            start_price: dec!(5000),
            tick_size: dec!(0.25),
            max_step_ticks: 8,
            max_wick_ticks: 4,
            start: Timestamp::from_millis(0),
            bar_ms: 60_000,
            bars: Some(1_000),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomWalkFeed {
    config: RandomWalkConfig,
    rng: StdRng,
    last_close: Decimal,
    produced: usize,
    closed: bool,
}

impl RandomWalkFeed {
    pub fn new(config: RandomWalkConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let last_close = config.start_price;
        Self {
            config,
            rng,
            last_close,
            produced: 0,
            closed: false,
        }
    }

    pub fn config(&self) -> &RandomWalkConfig {
        &self.config
    }

    fn ticks(&mut self, max: i64, signed: bool) -> Decimal {
        let max = max.max(0);
        let n = if signed {
            self.rng.gen_range(-max..=max)
        } else {
            self.rng.gen_range(0..=max)
        };
        Decimal::from(n) * self.config.tick_size
    }

    fn generate(&mut self) -> Option<MarketEvent> {
        let floor = self.config.tick_size.max(dec!(0.01));
        let open = self.last_close;
        let close = (open + self.ticks(self.config.max_step_ticks, true)).max(floor);
        let high = open.max(close) + self.ticks(self.config.max_wick_ticks, false);
        let low = (open.min(close) - self.ticks(self.config.max_wick_ticks, false)).max(floor);
        let ts = self
            .config
            .start
            .plus_millis(self.config.bar_ms * self.produced as i64);
        self.last_close = close;
        let volume = Decimal::from(self.rng.gen_range(100u32..=5_000u32));
        MarketEvent::bar(&self.config.symbol, ts, open, high, low, close).map(|b| b.with_volume(volume))
    }
}

impl MarketFeed for RandomWalkFeed {
    fn name(&self) -> &str {
        "random_walk"
    }

    fn next_event(&mut self, cancel: &CancellationToken) -> Result<Option<MarketEvent>, FeedError> {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        if self.closed {
            return Err(FeedError::Closed(self.name().to_string()));
        }
        if self.config.bars.is_some_and(|n| self.produced >= n) {
            return Ok(None);
        }
        let event = self
            .generate()
            .ok_or_else(|| FeedError::Source("generated bar was not a valid OHLC".into()))?;
        self.produced += 1;
        Ok(Some(event))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_restartable(&self) -> bool {
        self.config.bars.is_some()
    }

    fn restart(&mut self) -> Result<(), FeedError> {
        if !self.is_restartable() {
            return Err(FeedError::NotRestartable(self.name().to_string()));
        }
        *self = Self::new(self.config.clone());
        Ok(())
    }
}
