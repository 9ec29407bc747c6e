//! Event-driven tick-replay backtesting.
//!
//! The engine replays a uniformly sampled tick stream against either
//! constructor family: orders are re-evaluated on a 5-second cadence (plus a
//! simulated latency gap after fills), matched against ticks with maker-limit
//! semantics, and the run terminates early on deep drawdown or proximity to
//! the bankruptcy price.

pub mod engine;
pub mod report;

pub use engine::{BacktestEngine, BacktestParams, BacktestSummary, Fill, FillStatus};
pub use report::{write_fills_csv, write_report_json, BacktestReport};

use crate::strategy::StrategyError;

#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("tick stream must hold at least two samples to infer spacing")]
    UnsampledTicks,
    #[error("not enough ticks to seed the moving averages: have {have}, need {need}")]
    InsufficientWarmup { have: usize, need: usize },
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error("failed to write {what}: {source}")]
    Export {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
}
