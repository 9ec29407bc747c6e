//! Scalp grid order construction.
//!
//! Entries ladder down (long) / up (short) from the position price in two
//! bands gated by the position-base-ratio: a primary grid whose spacing
//! widens with pbr, and a coarser secondary grid past the primary limit.
//! Closes are an evenly sized take-profit ladder across the markup range.

use crate::market::MarketSpec;
use crate::math::{round_, round_dn, round_up};
use crate::position::{calc_min_entry_qty, cost_to_qty, qty_to_cost};
use crate::strategy::{eqf, Order, OrderKind, ScalpSideParams};

/// Next long entry. `last_pfill` is the most recent fill on the long side
/// (`(0, 0)` when none): a negative qty there means the previous fill was a
/// partial close, which pins the reentry floor near that fill's price.
pub fn calc_long_entry(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    last_pfill: (f64, f64),
    highest_bid: f64,
    do_long: bool,
    spec: &MarketSpec,
    p: &ScalpSideParams,
) -> Order {
    if !(do_long || long_psize > 0.0) {
        return Order::none();
    }
    let entry_price = highest_bid;
    let base_entry_qty = round_dn(
        cost_to_qty(balance * p.primary_iqty_pct, entry_price, spec),
        spec.qty_step,
    );
    if long_psize == 0.0 {
        let min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = round_dn(
            cost_to_qty(balance * p.primary_pbr_limit, entry_price, spec),
            spec.qty_step,
        );
        let entry_qty = min_entry_qty.max(max_entry_qty.min(base_entry_qty));
        Order::new(entry_qty, entry_price, OrderKind::LongIentry)
    } else if long_psize > 0.0 {
        let pbr = qty_to_cost(long_psize, long_pprice, spec) / balance;
        if pbr < p.primary_pbr_limit {
            let grid_spacing = (1.0 - p.primary_grid_spacing)
                - eqf(&[pbr], &p.primary_spacing_pbr_coeffs, 0.0);
            let mut entry_price = round_dn(long_pprice * grid_spacing, spec.price_step);
            let entry_kind = if last_pfill.0 < 0.0 {
                // Previous fill was a partial close.
                entry_price = entry_price.max(round_dn(
                    last_pfill.1 * (1.0 - p.primary_grid_spacing),
                    spec.price_step,
                ));
                OrderKind::LongPrimaryRentryAfterPartialClose
            } else {
                OrderKind::LongPrimaryRentry
            };
            let entry_price = highest_bid.min(entry_price);
            let min_entry_qty = calc_min_entry_qty(entry_price, spec);
            let max_entry_qty = round_dn(
                cost_to_qty(balance * p.primary_pbr_limit, entry_price, spec) - long_psize,
                spec.qty_step,
            );
            let entry_qty = min_entry_qty.max(max_entry_qty.min(round_dn(
                base_entry_qty + long_psize * p.primary_ddown_factor,
                spec.qty_step,
            )));
            Order::new(entry_qty, entry_price, entry_kind)
        } else if pbr < p.secondary_pbr_limit {
            let entry_price = highest_bid.min(round_dn(
                long_pprice * (1.0 - p.secondary_grid_spacing),
                spec.price_step,
            ));
            let min_entry_qty = calc_min_entry_qty(entry_price, spec);
            let max_entry_qty = round_dn(
                cost_to_qty(balance * p.secondary_pbr_limit, entry_price, spec) - long_psize,
                spec.qty_step,
            );
            let entry_qty = max_entry_qty.min(min_entry_qty.max(round_dn(
                base_entry_qty + long_psize * p.secondary_ddown_factor,
                spec.qty_step,
            )));
            if entry_qty < min_entry_qty {
                Order::none()
            } else {
                Order::new(entry_qty, entry_price, OrderKind::LongSecondaryRentry)
            }
        } else {
            Order::none()
        }
    } else {
        Order::none()
    }
}

/// Next short entry; mirror of [`calc_long_entry`], except that the
/// after-partial-close cap anchors on the position price.
pub fn calc_shrt_entry(
    balance: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    last_pfill: (f64, f64),
    lowest_ask: f64,
    do_shrt: bool,
    spec: &MarketSpec,
    p: &ScalpSideParams,
) -> Order {
    if !(do_shrt || shrt_psize < 0.0) {
        return Order::none();
    }
    let entry_price = lowest_ask;
    let base_entry_qty = round_dn(
        cost_to_qty(balance * p.primary_iqty_pct, entry_price, spec),
        spec.qty_step,
    );
    if shrt_psize == 0.0 {
        let min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = round_dn(
            cost_to_qty(balance * p.primary_pbr_limit, entry_price, spec),
            spec.qty_step,
        );
        let entry_qty = min_entry_qty.max(max_entry_qty.min(base_entry_qty));
        Order::new(-entry_qty, entry_price, OrderKind::ShrtIentry)
    } else if shrt_psize < 0.0 {
        let pbr = qty_to_cost(shrt_psize, shrt_pprice, spec) / balance;
        if pbr < p.primary_pbr_limit {
            let grid_spacing = (1.0 + p.primary_grid_spacing)
                + eqf(&[pbr], &p.primary_spacing_pbr_coeffs, 0.0);
            let mut entry_price = round_dn(shrt_pprice * grid_spacing, spec.price_step);
            let entry_kind = if last_pfill.0 > 0.0 {
                // Previous fill was a partial close.
                entry_price = entry_price.min(round_up(
                    shrt_pprice * (1.0 + p.primary_grid_spacing),
                    spec.price_step,
                ));
                OrderKind::ShrtPrimaryRentryAfterPartialClose
            } else {
                OrderKind::ShrtPrimaryRentry
            };
            let entry_price = lowest_ask.max(entry_price);
            let min_entry_qty = calc_min_entry_qty(entry_price, spec);
            let max_entry_qty = round_dn(
                cost_to_qty(balance * p.primary_pbr_limit, entry_price, spec) + shrt_psize,
                spec.qty_step,
            );
            let entry_qty = min_entry_qty.max(max_entry_qty.min(round_dn(
                base_entry_qty - shrt_psize * p.primary_ddown_factor,
                spec.qty_step,
            )));
            Order::new(-entry_qty, entry_price, entry_kind)
        } else if pbr < p.secondary_pbr_limit {
            let entry_price = lowest_ask.min(round_dn(
                shrt_pprice * (1.0 + p.secondary_grid_spacing),
                spec.price_step,
            ));
            let min_entry_qty = calc_min_entry_qty(entry_price, spec);
            let max_entry_qty = round_dn(
                cost_to_qty(balance * p.secondary_pbr_limit, entry_price, spec) + shrt_psize,
                spec.qty_step,
            );
            let entry_qty = max_entry_qty.min(min_entry_qty.max(round_dn(
                base_entry_qty - shrt_psize * p.secondary_ddown_factor,
                spec.qty_step,
            )));
            if entry_qty < min_entry_qty {
                Order::none()
            } else {
                Order::new(-entry_qty, entry_price, OrderKind::ShrtSecondaryRentry)
            }
        } else {
            Order::none()
        }
    } else {
        Order::none()
    }
}

/// Take-profit ladder for a long position: `n_close_orders` prices spread
/// linearly across the markup range, deduplicated after price-step rounding,
/// the position split evenly across the surviving rungs.
pub fn calc_long_close_grid(
    long_psize: f64,
    long_pprice: f64,
    lowest_ask: f64,
    spec: &MarketSpec,
    p: &ScalpSideParams,
) -> Vec<Order> {
    if long_psize == 0.0 {
        return vec![Order::none()];
    }
    let minm = long_pprice * (1.0 + p.min_markup);
    let maxm = long_pprice * (1.0 + p.min_markup + p.markup_range);
    let mut close_prices: Vec<f64> = Vec::new();
    for i in 0..p.n_close_orders {
        let t = if p.n_close_orders > 1 {
            i as f64 / (p.n_close_orders - 1) as f64
        } else {
            0.0
        };
        let price = lowest_ask.max(round_up(minm + (maxm - minm) * t, spec.price_step));
        if close_prices.last() != Some(&price) {
            close_prices.push(price);
        }
    }
    if close_prices.is_empty() {
        return vec![Order::new(-long_psize, lowest_ask, OrderKind::LongNclose)];
    }
    if close_prices.len() == 1 {
        return vec![Order::new(-long_psize, close_prices[0], OrderKind::LongNclose)];
    }
    let min_close_qty = calc_min_entry_qty(close_prices[0], spec);
    let default_qty = round_dn(long_psize / close_prices.len() as f64, spec.qty_step);
    if default_qty == 0.0 {
        return vec![Order::new(-long_psize, close_prices[0], OrderKind::LongNclose)];
    }
    let default_qty = min_close_qty.max(default_qty);
    let mut long_closes: Vec<Order> = Vec::new();
    let mut remaining = long_psize;
    for &close_price in &close_prices {
        if remaining == 0.0 || remaining / default_qty < 0.5 {
            break;
        }
        let close_qty = remaining.min(default_qty.max(min_close_qty));
        long_closes.push(Order::new(-close_qty, close_price, OrderKind::LongNclose));
        remaining = round_(remaining - close_qty, spec.qty_step);
    }
    if remaining != 0.0 {
        if let Some(last) = long_closes.last_mut() {
            last.qty = round_(last.qty - remaining, spec.qty_step);
        } else {
            long_closes = vec![Order::new(-long_psize, close_prices[0], OrderKind::LongNclose)];
        }
    }
    long_closes
}

/// Take-profit ladder for a short position; mirror of
/// [`calc_long_close_grid`] with decreasing prices. The minimum close qty is
/// taken at the last (lowest) rung.
pub fn calc_shrt_close_grid(
    shrt_psize: f64,
    shrt_pprice: f64,
    highest_bid: f64,
    spec: &MarketSpec,
    p: &ScalpSideParams,
) -> Vec<Order> {
    if shrt_psize == 0.0 {
        return vec![Order::none()];
    }
    let minm = shrt_pprice * (1.0 - p.min_markup);
    let maxm = shrt_pprice * (1.0 - p.min_markup - p.markup_range);
    let mut close_prices: Vec<f64> = Vec::new();
    for i in 0..p.n_close_orders {
        let t = if p.n_close_orders > 1 {
            i as f64 / (p.n_close_orders - 1) as f64
        } else {
            0.0
        };
        let price = highest_bid.min(round_dn(minm + (maxm - minm) * t, spec.price_step));
        if close_prices.last() != Some(&price) {
            close_prices.push(price);
        }
    }
    if close_prices.is_empty() {
        return vec![Order::new(-shrt_psize, highest_bid, OrderKind::ShrtNclose)];
    }
    if close_prices.len() == 1 {
        return vec![Order::new(-shrt_psize, close_prices[0], OrderKind::ShrtNclose)];
    }
    let min_close_qty = calc_min_entry_qty(close_prices[close_prices.len() - 1], spec);
    let default_qty = round_dn(-shrt_psize / close_prices.len() as f64, spec.qty_step);
    if default_qty == 0.0 {
        return vec![Order::new(-shrt_psize, close_prices[0], OrderKind::ShrtNclose)];
    }
    let default_qty = min_close_qty.max(default_qty);
    let mut shrt_closes: Vec<Order> = Vec::new();
    let mut remaining = -shrt_psize;
    for &close_price in &close_prices {
        if remaining == 0.0 || remaining / default_qty < 0.5 {
            break;
        }
        let close_qty = remaining.min(default_qty);
        shrt_closes.push(Order::new(close_qty, close_price, OrderKind::ShrtNclose));
        remaining = round_(remaining - close_qty, spec.qty_step);
    }
    if remaining != 0.0 {
        if let Some(last) = shrt_closes.last_mut() {
            last.qty = round_(last.qty + remaining, spec.qty_step);
        } else {
            shrt_closes = vec![Order::new(-shrt_psize, close_prices[0], OrderKind::ShrtNclose)];
        }
    }
    shrt_closes
}
