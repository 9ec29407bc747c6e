//! Order construction.
//!
//! Two constructor families share the order record and the downstream fill
//! detector: the EMA-band family prices entries off a multi-span EMA
//! envelope, the scalp family ladders a price grid off the position price.
//! Both are pure functions of a state snapshot; re-running them on unchanged
//! inputs yields identical orders.

pub mod ema_band;
pub mod orders;
pub mod params;
pub mod scalp;

pub use ema_band::{calc_long_orders, calc_orders, calc_shrt_orders, OrderSet};
pub use orders::{Order, OrderKind};
pub use params::{EmaBandParams, EmaSideParams, ScalpParams, ScalpSideParams, StrategyParams};
pub use scalp::{calc_long_close_grid, calc_long_entry, calc_shrt_close_grid, calc_shrt_entry};

/// Quadratic-plus-absolute polynomial feature:
/// `Σ (vals_i² − minus)·coeffs_i0 + |vals_i − minus|·coeffs_i1`.
///
/// MA-ratio features hover around 1 and use `minus = 1`; position-base-ratio
/// features start at 0 and use `minus = 0`.
pub fn eqf(vals: &[f64], coeffs: &[[f64; 2]], minus: f64) -> f64 {
    vals.iter()
        .zip(coeffs)
        .map(|(v, c)| (v * v - minus) * c[0] + (v - minus).abs() * c[1])
        .sum()
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("long position size is negative: {0}")]
    NegativeLongPosition(f64),
    #[error("short position size is positive: {0}")]
    PositiveShrtPosition(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eqf_zero_coeffs() {
        assert_eq!(eqf(&[1.01, 0.99], &[[0.0, 0.0], [0.0, 0.0]], 1.0), 0.0);
    }

    #[test]
    fn test_eqf_combines_quadratic_and_absolute_terms() {
        // Single feature v = 2, minus = 1: (4 - 1)·c0 + |2 - 1|·c1.
        let got = eqf(&[2.0], &[[0.5, 0.25]], 1.0);
        assert!((got - (3.0 * 0.5 + 1.0 * 0.25)).abs() < 1e-12);
        // minus = 0 variant used for pbr features.
        let got = eqf(&[0.5], &[[1.0, 2.0]], 0.0);
        assert!((got - (0.25 + 1.0)).abs() < 1e-12);
    }
}
