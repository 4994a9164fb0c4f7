// 7.0: simulated execution. fills risk-approved intents against the latest bar,
// resolves stop/target brackets, keeps positions, trades and order history.
// the backend trait is the seam a live broker plugs into.

mod backend;
mod config;
mod core;
mod orders;
mod positions;
mod results;

pub use backend::ExecutionBackend;
pub use config::ExecutionConfig;
pub use core::{FillHandler, SimulatedExecutor};
pub use results::ExecutionError;
