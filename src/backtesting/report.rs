//! Run summaries and fill-log export.

use serde::Serialize;
use std::path::Path;

use crate::backtesting::{BacktestError, BacktestSummary, Fill};
use crate::math::round_dynamic;

/// Aggregate view over one replay, written next to the fill log.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub starting_balance: f64,
    pub final_balance: f64,
    pub final_equity: f64,

    /// `final_balance / starting_balance`.
    pub gain: f64,

    /// `gain` normalised to one day of backtest span.
    pub average_daily_gain: f64,

    /// `average_daily_gain` compounded over the configured period.
    pub average_periodic_gain: f64,
    pub periodic_gain_n_days: f64,

    pub n_days: f64,
    pub n_fills: usize,
    pub n_entries: usize,
    pub n_closes: usize,
    pub realized_pnl_sum: f64,
    pub fee_sum: f64,
    pub lowest_eqbal_ratio: f64,
    pub closest_bkr: f64,
    pub completed: bool,
}

impl BacktestReport {
    /// Build the report from a finished run. `span_ms` is the replayed
    /// stream's time span.
    pub fn from_run(
        fills: &[Fill],
        summary: &BacktestSummary,
        starting_balance: f64,
        span_ms: i64,
        periodic_gain_n_days: f64,
    ) -> Self {
        let final_balance = fills.last().map_or(starting_balance, |f| f.balance);
        let final_equity = fills.last().map_or(starting_balance, |f| f.equity);
        let gain = final_balance / starting_balance;
        let n_days = span_ms as f64 / (1000.0 * 60.0 * 60.0 * 24.0);
        let average_daily_gain = if n_days > 0.0 && gain > 0.0 {
            gain.powf(1.0 / n_days)
        } else {
            0.0
        };
        let average_periodic_gain = if average_daily_gain > 0.0 {
            average_daily_gain.powf(periodic_gain_n_days)
        } else {
            0.0
        };
        Self {
            starting_balance,
            final_balance,
            final_equity,
            gain,
            average_daily_gain,
            average_periodic_gain,
            periodic_gain_n_days,
            n_days,
            n_fills: fills.len(),
            n_entries: fills.iter().filter(|f| f.kind.is_entry()).count(),
            n_closes: fills.iter().filter(|f| f.kind.is_close()).count(),
            realized_pnl_sum: fills.iter().map(|f| f.pnl).sum(),
            fee_sum: fills.iter().map(|f| f.fee_paid).sum(),
            lowest_eqbal_ratio: summary.lowest_eqbal_ratio,
            closest_bkr: summary.closest_bkr,
            completed: summary.completed,
        }
    }

    /// Human-readable summary for the runner's log output.
    pub fn summary_lines(&self) -> String {
        format!(
            "balance {} -> {} (gain {}x, adg {})\n\
             fills {} (entries {}, closes {}), pnl {}, fees {}\n\
             lowest equity/balance {}, closest bankruptcy {}, completed: {}",
            round_dynamic(self.starting_balance, 6),
            round_dynamic(self.final_balance, 6),
            round_dynamic(self.gain, 6),
            round_dynamic(self.average_daily_gain, 6),
            self.n_fills,
            self.n_entries,
            self.n_closes,
            round_dynamic(self.realized_pnl_sum, 6),
            round_dynamic(self.fee_sum, 6),
            round_dynamic(self.lowest_eqbal_ratio, 4),
            round_dynamic(self.closest_bkr, 4),
            self.completed,
        )
    }
}

/// Write the fill log as CSV with one row per fill.
pub fn write_fills_csv(path: &Path, fills: &[Fill]) -> Result<(), BacktestError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| io_export("fill log", e))?;
    for fill in fills {
        writer.serialize(fill).map_err(|e| io_export("fill log", e))?;
    }
    writer
        .flush()
        .map_err(|source| BacktestError::Export { what: "fill log", source })?;
    Ok(())
}

/// Write the run report as pretty-printed JSON.
pub fn write_report_json(path: &Path, report: &BacktestReport) -> Result<(), BacktestError> {
    let json = serde_json::to_string_pretty(report).map_err(|source| BacktestError::Export {
        what: "report",
        source: source.into(),
    })?;
    std::fs::write(path, json).map_err(|source| BacktestError::Export {
        what: "report",
        source,
    })
}

fn io_export(what: &'static str, source: csv::Error) -> BacktestError {
    BacktestError::Export {
        what,
        source: source.into(),
    }
}
