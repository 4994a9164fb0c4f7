// futures-engine: algorithmic futures trading core.
// risk-first architecture: every signal is sized and checked before it can become an order.
// all money math is decimal, the runner is deterministic given the same feed.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Side, Price, Quote, Timestamp
//   1.1x instrument.rs: static contract specs (tick, point value, margin)
//   2.x  signal.rs: Signal -> OrderIntent -> OrderResult
//   3.x  hwm.rs: high water mark and drawdown
//   3.1x sizing.rs: fixed-fractional contract sizing
//   4.x  position.rs: position struct, PnL, increase/reduce/flip, trades
//   5.x  clock.rs: injected clock and client order id generators
//   5.1x market.rs: OHLCV bar events
//   5.2x indicators.rs: ATR enrichment
//   6.x  risk.rs: kill switch, stop placement, exposure limits
//   7.x  executor/: simulated fills, brackets, backend trait
//   8.x  runner.rs: orchestration loop and backtest report
//   9.x  persistence.rs: state store for restart recovery
//   10.x metrics.rs: performance statistics
//   11.x strategy.rs: strategy trait, MA crossover
//   12.x feed.rs: replay and random walk feeds
//   13.x config.rs: aggregate config, presets, validation

// core trading modules
pub mod instrument;
pub mod market;
pub mod position;
pub mod signal;
pub mod types;

// risk and safety modules
pub mod hwm;
pub mod risk;
pub mod sizing;

// execution and orchestration
pub mod clock;
pub mod executor;
pub mod feed;
pub mod indicators;
pub mod runner;
pub mod strategy;

// reporting and integration modules
pub mod config;
pub mod metrics;
pub mod persistence;

// re exports for convenience
pub use clock::{Clock, ClientIdGenerator, ManualClock, OrderIdGenerator, SequentialIdGenerator, SystemClock};
pub use config::{ConfigError, TradingConfig};
pub use executor::{ExecutionBackend, ExecutionConfig, ExecutionError, FillHandler, SimulatedExecutor};
pub use feed::{FeedError, MarketFeed, RandomWalkConfig, RandomWalkFeed, ReplayFeed};
pub use hwm::{HighWaterMark, HwmSnapshot};
pub use indicators::IndicatorCalculator;
pub use instrument::{InstrumentSpec, InstrumentTable};
pub use market::{MarketEvent, ATR};
pub use metrics::PerformanceMetrics;
pub use persistence::{BotState, JsonFileStore, MemoryStore, StateStore, StoreError};
pub use position::*;
pub use risk::{EngineMode, ExposureScope, HaltReason, RiskConfig, RiskEngine, RiskError};
pub use runner::{BacktestResult, EquityPoint, Progress, ProgressFn, RunError, Runner, RunnerConfig};
pub use signal::*;
pub use sizing::{PositionSizer, SizingRejection, SizingResult, MAX_RISK_PCT};
pub use strategy::{MaCrossStrategy, Strategy};
pub use types::*;
