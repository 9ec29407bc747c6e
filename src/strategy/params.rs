//! Strategy parameter records, loaded from live configs.
//!
//! Coefficient matrices have one `[quadratic, absolute]` row per feature
//! (one per EMA span for the MA-ratio features, a single row for the
//! position-base-ratio features).

use serde::{Deserialize, Serialize};

/// Per-side parameters for the EMA-band constructor family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaSideParams {
    /// Negative: band-limited single close. Zero: plain markup close.
    /// Positive: stop-close budget once pbr exceeds `pbr_limit`.
    pub pbr_stop_loss: f64,

    /// Position-base-ratio ceiling for reentries.
    pub pbr_limit: f64,

    pub iqty_const: f64,
    pub iprc_const: f64,
    pub rqty_const: f64,
    pub rprc_const: f64,
    pub markup_const: f64,

    pub iqty_mar_coeffs: Vec<[f64; 2]>,
    pub iprc_mar_coeffs: Vec<[f64; 2]>,
    pub rprc_pbr_coeffs: Vec<[f64; 2]>,
    pub rqty_mar_coeffs: Vec<[f64; 2]>,
    pub rprc_mar_coeffs: Vec<[f64; 2]>,
    pub markup_mar_coeffs: Vec<[f64; 2]>,
}

/// Full parameter set for the EMA-band strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaBandParams {
    /// EMA spans in minutes.
    pub spans: Vec<f64>,
    pub do_long: bool,
    pub do_shrt: bool,
    pub long: EmaSideParams,
    pub shrt: EmaSideParams,
}

/// Per-side parameters for the scalp grid family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalpSideParams {
    /// Initial entry cost as a fraction of balance.
    pub primary_iqty_pct: f64,

    /// Fraction of the position size added on each primary reentry.
    pub primary_ddown_factor: f64,

    /// Relative distance between the position price and the next primary
    /// reentry.
    pub primary_grid_spacing: f64,

    /// Widens the primary spacing as pbr grows; single-row matrix.
    pub primary_spacing_pbr_coeffs: Vec<[f64; 2]>,

    pub primary_pbr_limit: f64,

    pub secondary_ddown_factor: f64,
    pub secondary_grid_spacing: f64,
    pub secondary_pbr_limit: f64,

    /// Lowest take-profit markup over the position price.
    pub min_markup: f64,

    /// Width of the take-profit ladder above `min_markup`.
    pub markup_range: f64,

    /// Number of rungs in the take-profit ladder.
    pub n_close_orders: usize,
}

/// Full parameter set for the scalp grid strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalpParams {
    pub do_long: bool,
    pub do_shrt: bool,
    pub long: ScalpSideParams,
    pub shrt: ScalpSideParams,
}

/// The two constructor families. The simulator dispatches on the variant
/// when requesting the next order set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyParams {
    EmaBand(EmaBandParams),
    Scalp(ScalpParams),
}

impl StrategyParams {
    pub fn do_long(&self) -> bool {
        match self {
            StrategyParams::EmaBand(p) => p.do_long,
            StrategyParams::Scalp(p) => p.do_long,
        }
    }

    pub fn do_shrt(&self) -> bool {
        match self {
            StrategyParams::EmaBand(p) => p.do_shrt,
            StrategyParams::Scalp(p) => p.do_shrt,
        }
    }

    /// Spot markets trade long only.
    pub fn force_spot_sides(&mut self) {
        match self {
            StrategyParams::EmaBand(p) => {
                p.do_long = true;
                p.do_shrt = false;
            }
            StrategyParams::Scalp(p) => {
                p.do_long = true;
                p.do_shrt = false;
            }
        }
    }
}
