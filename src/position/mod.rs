//! Position accounting for inverse and linear contracts.
//!
//! All functions take the long size as ≥ 0 and the short size as ≤ 0; a
//! position with size 0 has price 0.

use crate::market::MarketSpec;
use crate::math::{nan_to_0, round_, round_dn, round_up};
use serde::{Deserialize, Serialize};

/// One side of a position as reported by the venue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Signed size: ≥ 0 for the long side, ≤ 0 for the short side.
    pub size: f64,

    /// Average entry price; 0 when flat.
    pub price: f64,

    pub leverage: f64,
    pub liquidation_price: f64,
    pub upnl: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size == 0.0
    }
}

/// Margin cost of holding `qty` at `price`.
pub fn qty_to_cost(qty: f64, price: f64, spec: &MarketSpec) -> f64 {
    if spec.inverse {
        let per_price = if price > 0.0 { (qty / price).abs() } else { 0.0 };
        per_price * spec.c_mult
    } else {
        (qty * price).abs()
    }
}

/// Quantity purchasable for `cost` at `price`; inverse of [`qty_to_cost`].
pub fn cost_to_qty(cost: f64, price: f64, spec: &MarketSpec) -> f64 {
    if spec.inverse {
        cost * price / spec.c_mult
    } else if price > 0.0 {
        cost / price
    } else {
        0.0
    }
}

/// Smallest acceptable entry quantity at `price`, honoring both the venue's
/// min qty and min cost filters.
pub fn calc_min_entry_qty(price: f64, spec: &MarketSpec) -> f64 {
    if spec.inverse {
        spec.min_qty
    } else {
        let cost_floor = if price > 0.0 { spec.min_cost / price } else { 0.0 };
        spec.min_qty.max(round_up(cost_floor, spec.qty_step))
    }
}

/// PnL of closing `qty` of a long opened at `entry_price` at `close_price`.
pub fn calc_long_pnl(entry_price: f64, close_price: f64, qty: f64, spec: &MarketSpec) -> f64 {
    if spec.inverse {
        if entry_price == 0.0 || close_price == 0.0 {
            return 0.0;
        }
        qty.abs() * spec.c_mult * (1.0 / entry_price - 1.0 / close_price)
    } else {
        qty.abs() * (close_price - entry_price)
    }
}

/// PnL of closing `qty` of a short opened at `entry_price` at `close_price`.
pub fn calc_shrt_pnl(entry_price: f64, close_price: f64, qty: f64, spec: &MarketSpec) -> f64 {
    if spec.inverse {
        if entry_price == 0.0 || close_price == 0.0 {
            return 0.0;
        }
        qty.abs() * spec.c_mult * (1.0 / close_price - 1.0 / entry_price)
    } else {
        qty.abs() * (entry_price - close_price)
    }
}

/// Combined unrealized PnL of both sides at `last_price`.
pub fn calc_upnl(
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    last_price: f64,
    spec: &MarketSpec,
) -> f64 {
    calc_long_pnl(long_pprice, last_price, long_psize, spec)
        + calc_shrt_pnl(shrt_pprice, last_price, shrt_psize, spec)
}

/// Balance plus unrealized PnL of whichever sides are open.
pub fn calc_equity(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    last_price: f64,
    spec: &MarketSpec,
) -> f64 {
    let mut equity = balance;
    if long_pprice != 0.0 && long_psize != 0.0 {
        equity += calc_long_pnl(long_pprice, last_price, long_psize, spec);
    }
    if shrt_pprice != 0.0 && shrt_psize != 0.0 {
        equity += calc_shrt_pnl(shrt_pprice, last_price, shrt_psize, spec);
    }
    equity
}

/// Margin still available for new entries under the venue's max leverage.
/// Never negative.
pub fn calc_available_margin(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    last_price: f64,
    spec: &MarketSpec,
) -> f64 {
    let mut used_margin = 0.0;
    let mut equity = balance;
    if long_pprice != 0.0 && long_psize != 0.0 {
        equity += calc_long_pnl(long_pprice, last_price, long_psize, spec);
        used_margin += qty_to_cost(long_psize, long_pprice, spec);
    }
    if shrt_pprice != 0.0 && shrt_psize != 0.0 {
        equity += calc_shrt_pnl(shrt_pprice, last_price, shrt_psize, spec);
        used_margin += qty_to_cost(shrt_psize, shrt_pprice, spec);
    }
    (equity * spec.max_leverage - used_margin).max(0.0)
}

/// New position size and volume-weighted price after filling `qty` at
/// `price`. Returns `(0, 0)` when the rounded new size is zero.
pub fn calc_new_psize_pprice(
    psize: f64,
    pprice: f64,
    qty: f64,
    price: f64,
    qty_step: f64,
) -> (f64, f64) {
    if qty == 0.0 {
        return (psize, pprice);
    }
    let new_psize = round_(psize + qty, qty_step);
    if new_psize == 0.0 {
        return (0.0, 0.0);
    }
    (
        new_psize,
        nan_to_0(pprice) * (psize / new_psize) + price * (qty / new_psize),
    )
}

/// Price at which equity reaches zero given current balance and positions.
/// Returns 0 when the denominator vanishes; never negative.
pub fn calc_bankruptcy_price(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    spec: &MarketSpec,
) -> f64 {
    let long_pprice = nan_to_0(long_pprice);
    let shrt_pprice = nan_to_0(shrt_pprice);
    let long_psize = long_psize * spec.c_mult;
    let abs_shrt_psize = shrt_psize.abs() * spec.c_mult;
    let bankruptcy_price = if spec.inverse {
        let shrt_cost = if shrt_pprice > 0.0 {
            abs_shrt_psize / shrt_pprice
        } else {
            0.0
        };
        let long_cost = if long_pprice > 0.0 {
            long_psize / long_pprice
        } else {
            0.0
        };
        let denominator = shrt_cost - long_cost - balance;
        if denominator == 0.0 {
            return 0.0;
        }
        (abs_shrt_psize - long_psize) / denominator
    } else {
        let denominator = long_psize - abs_shrt_psize;
        if denominator == 0.0 {
            return 0.0;
        }
        (-balance + long_psize * long_pprice - abs_shrt_psize * shrt_pprice) / denominator
    };
    bankruptcy_price.max(0.0)
}

/// Largest entry quantity purchasable with `available_margin` at
/// `entry_price`, rounded down to the qty grid.
pub fn calc_max_entry_qty(entry_price: f64, available_margin: f64, spec: &MarketSpec) -> f64 {
    round_dn(cost_to_qty(available_margin, entry_price, spec), spec.qty_step)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> MarketSpec {
        MarketSpec::default()
    }

    fn inverse() -> MarketSpec {
        MarketSpec {
            inverse: true,
            min_qty: 1.0,
            qty_step: 1.0,
            price_step: 0.5,
            ..MarketSpec::default()
        }
    }

    #[test]
    fn test_cost_qty_round_trip() {
        let spec = linear();
        let cost = qty_to_cost(0.5, 40_000.0, &spec);
        assert_eq!(cost, 20_000.0);
        assert!((cost_to_qty(cost, 40_000.0, &spec) - 0.5).abs() < 1e-12);

        let spec = inverse();
        let cost = qty_to_cost(100.0, 50_000.0, &spec);
        assert!((cost - 0.002).abs() < 1e-12);
        assert!((cost_to_qty(cost, 50_000.0, &spec) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_pnl() {
        let spec = inverse();
        let long = calc_long_pnl(50_000.0, 55_000.0, 100.0, &spec);
        assert!((long - 100.0 * (1.0 / 50_000.0 - 1.0 / 55_000.0)).abs() < 1e-12);
        let shrt = calc_shrt_pnl(50_000.0, 55_000.0, -100.0, &spec);
        assert!((shrt + long).abs() < 1e-12);
    }

    #[test]
    fn test_linear_pnl_sign_symmetry() {
        let spec = linear();
        assert_eq!(calc_long_pnl(100.0, 110.0, 2.0, &spec), 20.0);
        assert_eq!(
            calc_long_pnl(110.0, 100.0, 2.0, &spec),
            -calc_long_pnl(100.0, 110.0, 2.0, &spec)
        );
        assert_eq!(calc_long_pnl(100.0, 100.0, 2.0, &spec), 0.0);
    }

    #[test]
    fn test_min_entry_qty_honors_min_cost() {
        let spec = MarketSpec {
            min_cost: 5.0,
            ..MarketSpec::default()
        };
        // 5 / 100 = 0.05, already on the qty grid.
        assert_eq!(calc_min_entry_qty(100.0, &spec), 0.05);
        assert_eq!(calc_min_entry_qty(100.0, &inverse()), 1.0);
    }

    #[test]
    fn test_new_psize_pprice_weighted() {
        let (psize, pprice) = calc_new_psize_pprice(1.0, 100.0, 1.0, 110.0, 0.001);
        assert_eq!(psize, 2.0);
        assert!((pprice - 105.0).abs() < 1e-9);

        // Closing the whole position resets both.
        assert_eq!(calc_new_psize_pprice(1.0, 100.0, -1.0, 120.0, 0.001), (0.0, 0.0));
        // A zero qty is a no-op.
        assert_eq!(calc_new_psize_pprice(1.0, 100.0, 0.0, 0.0, 0.001), (1.0, 100.0));
    }

    #[test]
    fn test_bankruptcy_price_linear() {
        let spec = linear();
        // One long contract at 100 with balance 10: equity zero at 90.
        let bkr = calc_bankruptcy_price(10.0, 1.0, 100.0, 0.0, 0.0, &spec);
        assert!((bkr - 90.0).abs() < 1e-9);
        // No position: denominator is zero.
        assert_eq!(calc_bankruptcy_price(10.0, 0.0, 0.0, 0.0, 0.0, &spec), 0.0);
    }

    #[test]
    fn test_available_margin_bounds() {
        let spec = MarketSpec {
            max_leverage: 5.0,
            ..MarketSpec::default()
        };
        let margin = calc_available_margin(100.0, 1.0, 100.0, 0.0, 0.0, 100.0, &spec);
        assert!((margin - (100.0 * 5.0 - 100.0)).abs() < 1e-9);
        // Deep under water: clamped at zero.
        assert_eq!(
            calc_available_margin(1.0, 1.0, 100.0, 0.0, 0.0, 1.0, &spec),
            0.0
        );
    }
}
