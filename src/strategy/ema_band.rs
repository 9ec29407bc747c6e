//! EMA-band order construction.
//!
//! Entries are anchored on the lower (long) / upper (short) edge of the EMA
//! band, scaled by the polynomial features of the MA ratios; closes are a
//! markup over the position price, with an optional defensive stop close at
//! the opposite band edge once the position-base-ratio exceeds its limit.

use crate::ema::{band_snapshot, BandSnapshot};
use crate::market::MarketSpec;
use crate::math::{round_dn, round_up};
use crate::position::{
    calc_available_margin, calc_bankruptcy_price, calc_equity, calc_min_entry_qty, cost_to_qty,
    qty_to_cost,
};
use crate::strategy::{eqf, EmaBandParams, EmaSideParams, Order, OrderKind, StrategyError};

/// Everything one decision step produces.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSet {
    pub long_entry: Order,
    pub shrt_entry: Order,
    pub long_close: Order,
    pub shrt_close: Order,
    pub bkr_price: f64,
    pub available_margin: f64,
}

/// Next long entry and close for the EMA-band strategy.
#[allow(clippy::too_many_arguments)]
pub fn calc_long_orders(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    highest_bid: f64,
    lowest_ask: f64,
    band: &BandSnapshot,
    available_margin: f64,
    spec: &MarketSpec,
    p: &EmaSideParams,
) -> Result<(Order, Order), StrategyError> {
    let mut entry_price = highest_bid.min(round_dn(
        band.lower * (p.iprc_const + eqf(&band.ratios, &p.iprc_mar_coeffs, 1.0)),
        spec.price_step,
    ));
    let mut entry_qty;
    let entry_kind;
    let min_entry_qty;
    let mut long_close;

    if long_psize == 0.0 || (spec.spot && long_psize < calc_min_entry_qty(long_pprice, spec)) {
        min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = cost_to_qty(
            (balance * (p.pbr_limit + p.pbr_stop_loss.max(0.0))).min(available_margin),
            entry_price,
            spec,
        );
        let base_entry_qty = cost_to_qty(balance, entry_price, spec)
            * (p.iqty_const + eqf(&band.ratios, &p.iqty_mar_coeffs, 1.0));
        entry_qty = min_entry_qty.max(round_dn(max_entry_qty.min(base_entry_qty), spec.qty_step));
        entry_kind = OrderKind::LongIentry;
        long_close = Order::new(0.0, 0.0, OrderKind::LongNclose);
    } else if long_psize > 0.0 {
        let pbr = qty_to_cost(long_psize, long_pprice, spec) / balance;
        entry_price = entry_price.min(round_dn(
            long_pprice
                * (p.rprc_const
                    + eqf(&band.ratios, &p.rprc_mar_coeffs, 1.0)
                    + eqf(&[pbr], &p.rprc_pbr_coeffs, 0.0)),
            spec.price_step,
        ));
        min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = cost_to_qty(
            (balance * (p.pbr_limit + p.pbr_stop_loss.max(0.0) - pbr)).min(available_margin),
            entry_price,
            spec,
        );
        let base_entry_qty = cost_to_qty(balance, entry_price, spec)
            * (p.iqty_const + eqf(&band.ratios, &p.iqty_mar_coeffs, 1.0));
        entry_qty = round_dn(
            max_entry_qty.min(min_entry_qty.max(
                base_entry_qty
                    + long_psize * (p.rqty_const + eqf(&band.ratios, &p.rqty_mar_coeffs, 1.0)),
            )),
            spec.qty_step,
        );
        let nclose_price = lowest_ask.max(round_up(
            long_pprice * (p.markup_const + eqf(&band.ratios, &p.markup_mar_coeffs, 1.0)),
            spec.price_step,
        ));
        if entry_qty < min_entry_qty {
            entry_qty = 0.0;
        }

        if p.pbr_stop_loss < 0.0 {
            // Single close clamped into the band.
            let close_price =
                lowest_ask.max(nclose_price.min(round_up(band.upper, spec.price_step)));
            let close_kind = if close_price > long_pprice {
                OrderKind::LongNclose
            } else {
                OrderKind::LongSclose
            };
            long_close = Order::new(-long_psize, close_price, close_kind);
        } else if p.pbr_stop_loss == 0.0 {
            long_close = Order::new(-long_psize, nclose_price, OrderKind::LongNclose);
        } else if pbr > p.pbr_limit {
            let sclose_price = lowest_ask.max(round_up(band.upper, spec.price_step));
            let sclose_qty = -long_psize.min(spec.min_qty.max(round_dn(
                cost_to_qty(
                    balance * (pbr - p.pbr_limit).min(1.0),
                    sclose_price,
                    spec,
                ),
                spec.qty_step,
            )));
            if sclose_price >= nclose_price {
                long_close = Order::new(-long_psize, nclose_price, OrderKind::LongNclose);
            } else {
                long_close = Order::new(sclose_qty, sclose_price, OrderKind::LongSclose);
            }
        } else {
            entry_qty = entry_qty.max(min_entry_qty);
            long_close = Order::new(-long_psize, nclose_price, OrderKind::LongNclose);
        }
        entry_kind = OrderKind::LongRentry;
    } else {
        return Err(StrategyError::NegativeLongPosition(long_psize));
    }

    if spec.spot {
        // Entries may not spend more than equity; closes below the venue
        // minimum are suppressed instead of resting forever.
        if entry_qty != 0.0 {
            let equity = calc_equity(balance, long_psize, long_pprice, 0.0, 0.0, highest_bid, spec);
            let excess_cost =
                (qty_to_cost(long_psize + entry_qty, highest_bid, spec) - equity).max(0.0);
            if excess_cost != 0.0 {
                entry_qty = round_dn(
                    (qty_to_cost(entry_qty, entry_price, spec) - excess_cost) / entry_price,
                    spec.qty_step,
                );
                if entry_qty < min_entry_qty {
                    entry_qty = 0.0;
                }
            }
        }
        if long_close.qty != 0.0 {
            let min_close_qty = calc_min_entry_qty(long_close.price, spec);
            let close_qty = round_dn(
                long_psize.min(min_close_qty.max(long_close.qty.abs())),
                spec.qty_step,
            );
            if close_qty < min_close_qty {
                long_close = Order::new(0.0, 0.0, OrderKind::LongNclose);
            } else {
                long_close.qty = -close_qty;
            }
        }
    }

    Ok((Order::new(entry_qty, entry_price, entry_kind), long_close))
}

/// Next short entry and close for the EMA-band strategy. Mirror of
/// [`calc_long_orders`] anchored on the upper band edge.
#[allow(clippy::too_many_arguments)]
pub fn calc_shrt_orders(
    balance: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    highest_bid: f64,
    lowest_ask: f64,
    band: &BandSnapshot,
    available_margin: f64,
    spec: &MarketSpec,
    p: &EmaSideParams,
) -> Result<(Order, Order), StrategyError> {
    let mut entry_price = lowest_ask.max(round_up(
        band.upper * (p.iprc_const + eqf(&band.ratios, &p.iprc_mar_coeffs, 1.0)),
        spec.price_step,
    ));
    let mut entry_qty;
    let entry_kind;
    let shrt_close;

    if shrt_psize == 0.0 {
        let min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = cost_to_qty(
            (balance * (p.pbr_limit + p.pbr_stop_loss.max(0.0))).min(available_margin),
            entry_price,
            spec,
        );
        let base_entry_qty = cost_to_qty(balance, entry_price, spec)
            * (p.iqty_const + eqf(&band.ratios, &p.iqty_mar_coeffs, 1.0));
        entry_qty = min_entry_qty.max(round_dn(max_entry_qty.min(base_entry_qty), spec.qty_step));
        entry_kind = OrderKind::ShrtIentry;
        shrt_close = Order::new(0.0, 0.0, OrderKind::ShrtNclose);
    } else if shrt_psize < 0.0 {
        let pbr = qty_to_cost(shrt_psize, shrt_pprice, spec) / balance;
        entry_price = entry_price.max(round_up(
            shrt_pprice
                * (p.rprc_const
                    + eqf(&band.ratios, &p.rprc_mar_coeffs, 1.0)
                    + eqf(&[pbr], &p.rprc_pbr_coeffs, 0.0)),
            spec.price_step,
        ));
        let min_entry_qty = calc_min_entry_qty(entry_price, spec);
        let max_entry_qty = cost_to_qty(
            (balance * (p.pbr_limit + p.pbr_stop_loss.max(0.0) - pbr)).min(available_margin),
            entry_price,
            spec,
        );
        let base_entry_qty = cost_to_qty(balance, entry_price, spec)
            * (p.iqty_const + eqf(&band.ratios, &p.iqty_mar_coeffs, 1.0));
        entry_qty = round_dn(
            max_entry_qty.min(min_entry_qty.max(
                base_entry_qty
                    - shrt_psize * (p.rqty_const + eqf(&band.ratios, &p.rqty_mar_coeffs, 1.0)),
            )),
            spec.qty_step,
        );
        let nclose_price = highest_bid.min(round_dn(
            shrt_pprice * (p.markup_const + eqf(&band.ratios, &p.markup_mar_coeffs, 1.0)),
            spec.price_step,
        ));
        if entry_qty < min_entry_qty {
            entry_qty = 0.0;
        }
        if p.pbr_stop_loss < 0.0 {
            let close_price =
                highest_bid.min(nclose_price.max(round_dn(band.lower, spec.price_step)));
            let close_kind = if close_price < shrt_pprice {
                OrderKind::ShrtNclose
            } else {
                OrderKind::ShrtSclose
            };
            shrt_close = Order::new(-shrt_psize, close_price, close_kind);
        } else if p.pbr_stop_loss == 0.0 {
            shrt_close = Order::new(-shrt_psize, nclose_price, OrderKind::ShrtNclose);
        } else if pbr > p.pbr_limit {
            let sclose_price = highest_bid.min(round_dn(band.lower, spec.price_step));
            let sclose_qty = (-shrt_psize).min(spec.min_qty.max(round_dn(
                cost_to_qty(
                    balance * (pbr - p.pbr_limit).min(1.0),
                    sclose_price,
                    spec,
                ),
                spec.qty_step,
            )));
            if sclose_price <= nclose_price {
                shrt_close = Order::new(-shrt_psize, nclose_price, OrderKind::ShrtNclose);
            } else {
                shrt_close = Order::new(sclose_qty, sclose_price, OrderKind::ShrtSclose);
            }
        } else {
            entry_qty = entry_qty.max(min_entry_qty);
            shrt_close = Order::new(-shrt_psize, nclose_price, OrderKind::ShrtNclose);
        }
        entry_kind = OrderKind::ShrtRentry;
    } else {
        return Err(StrategyError::PositiveShrtPosition(shrt_psize));
    }

    Ok((Order::new(-entry_qty, entry_price, entry_kind), shrt_close))
}

/// Full decision step: both sides' entries and closes plus the bankruptcy
/// price and available margin. In non-hedge mode a side may only act while
/// no position is open on either side or that side is already non-zero.
#[allow(clippy::too_many_arguments)]
pub fn calc_orders(
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    highest_bid: f64,
    lowest_ask: f64,
    last_price: f64,
    mas: &[f64],
    spec: &MarketSpec,
    params: &EmaBandParams,
) -> Result<OrderSet, StrategyError> {
    let band = band_snapshot(mas, last_price);
    let available_margin = calc_available_margin(
        balance, long_psize, long_pprice, shrt_psize, shrt_pprice, last_price, spec,
    );
    let (do_long, do_shrt) = if spec.hedge_mode {
        (params.do_long, params.do_shrt)
    } else {
        let no_pos = long_psize == 0.0 && shrt_psize == 0.0;
        (
            (no_pos && params.do_long) || long_psize != 0.0,
            (no_pos && params.do_shrt) || shrt_psize != 0.0,
        )
    };
    let (long_entry, long_close) = if spec.spot || do_long {
        calc_long_orders(
            balance,
            long_psize,
            long_pprice,
            highest_bid,
            lowest_ask,
            &band,
            available_margin,
            spec,
            &params.long,
        )?
    } else {
        (Order::none(), Order::none())
    };
    let (shrt_entry, shrt_close) = if do_shrt && !spec.spot {
        calc_shrt_orders(
            balance,
            shrt_psize,
            shrt_pprice,
            highest_bid,
            lowest_ask,
            &band,
            available_margin,
            spec,
            &params.shrt,
        )?
    } else {
        (Order::none(), Order::none())
    };
    let bkr_price =
        calc_bankruptcy_price(balance, long_psize, long_pprice, shrt_psize, shrt_pprice, spec);
    Ok(OrderSet {
        long_entry,
        shrt_entry,
        long_close,
        shrt_close,
        bkr_price,
        available_margin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ema::BandSnapshot;

    fn side_params() -> EmaSideParams {
        EmaSideParams {
            pbr_stop_loss: 0.0,
            pbr_limit: 1.0,
            iqty_const: 0.01,
            iprc_const: 0.97,
            rqty_const: 0.5,
            rprc_const: 0.98,
            markup_const: 1.01,
            iqty_mar_coeffs: vec![[0.0, 0.0], [0.0, 0.0]],
            iprc_mar_coeffs: vec![[0.0, 0.0], [0.0, 0.0]],
            rprc_pbr_coeffs: vec![[0.0, 0.0]],
            rqty_mar_coeffs: vec![[0.0, 0.0], [0.0, 0.0]],
            rprc_mar_coeffs: vec![[0.0, 0.0], [0.0, 0.0]],
            markup_mar_coeffs: vec![[0.0, 0.0], [0.0, 0.0]],
        }
    }

    fn band() -> BandSnapshot {
        BandSnapshot {
            lower: 10.0,
            upper: 11.0,
            ratios: vec![1.0, 1.0],
        }
    }

    fn spec() -> MarketSpec {
        MarketSpec::default()
    }

    #[test]
    fn test_initial_entry_anchored_below_band() {
        let (entry, close) = calc_long_orders(
            1000.0,
            0.0,
            0.0,
            10.5,
            10.51,
            &band(),
            10_000.0,
            &spec(),
            &side_params(),
        )
        .unwrap();
        // 10.0 · 0.97 = 9.70, below the bid.
        assert_eq!(entry.price, 9.7);
        assert_eq!(entry.kind, OrderKind::LongIentry);
        // cost_to_qty(1000, 9.7) · 0.01 rounded down to the qty grid.
        assert_eq!(entry.qty, 1.030);
        assert!(close.is_none());
    }

    #[test]
    fn test_stop_close_triggers_above_pbr_limit() {
        let mut p = side_params();
        p.pbr_stop_loss = 0.5;
        p.pbr_limit = 1.0;
        p.markup_const = 1.2;
        // psize 13 @ 10 on balance 100: pbr = 1.3 > limit.
        let (_, close) = calc_long_orders(
            100.0,
            13.0,
            10.0,
            10.4,
            10.5,
            &band(),
            10_000.0,
            &spec(),
            &p,
        )
        .unwrap();
        assert_eq!(close.kind, OrderKind::LongSclose);
        // max(lowest_ask, round_up(band.upper)).
        assert_eq!(close.price, 11.0);
        // -min(psize, round_dn(cost_to_qty(100 · 0.3, 11.0))).
        assert_eq!(close.qty, -2.727);
    }

    #[test]
    fn test_stop_close_replaced_by_normal_close_when_not_cheaper() {
        let mut p = side_params();
        p.pbr_stop_loss = 0.5;
        p.pbr_limit = 1.0;
        p.markup_const = 1.01;
        // nclose at max(10.5, 10.1) = 10.5 ≤ stop price 11.0, so the stop is
        // dropped in favour of a full normal close.
        let (_, close) = calc_long_orders(
            100.0,
            13.0,
            10.0,
            10.4,
            10.5,
            &band(),
            10_000.0,
            &spec(),
            &p,
        )
        .unwrap();
        assert_eq!(close.kind, OrderKind::LongNclose);
        assert_eq!(close.qty, -13.0);
        assert_eq!(close.price, 10.5);
    }

    #[test]
    fn test_shrt_orders_mirror() {
        let (entry, close) = calc_shrt_orders(
            1000.0,
            0.0,
            0.0,
            10.49,
            10.5,
            &band(),
            10_000.0,
            &spec(),
            &side_params(),
        )
        .unwrap();
        // 11.0 · 0.97 = 10.67 ≥ ask.
        assert_eq!(entry.price, 10.67);
        assert!(entry.qty < 0.0);
        assert_eq!(entry.kind, OrderKind::ShrtIentry);
        assert!(close.is_none());
    }

    #[test]
    fn test_negative_psize_is_an_error() {
        let err = calc_long_orders(
            1000.0,
            -1.0,
            10.0,
            10.4,
            10.5,
            &band(),
            10_000.0,
            &spec(),
            &side_params(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_non_hedge_gating_blocks_opposite_side() {
        let mut spec = spec();
        spec.hedge_mode = false;
        let params = EmaBandParams {
            spans: vec![15.0, 60.0],
            do_long: true,
            do_shrt: true,
            long: side_params(),
            shrt: side_params(),
        };
        // Long already open: the short side must stay silent.
        let orders = calc_orders(
            1000.0,
            1.0,
            10.0,
            0.0,
            0.0,
            10.4,
            10.5,
            10.45,
            &[10.0, 11.0],
            &spec,
            &params,
        )
        .unwrap();
        assert!(orders.shrt_entry.is_none());
        assert!(orders.shrt_close.is_none());
        assert!(!orders.long_entry.is_none() || !orders.long_close.is_none());
    }

    #[test]
    fn test_constructor_is_idempotent() {
        let params = EmaBandParams {
            spans: vec![15.0, 60.0],
            do_long: true,
            do_shrt: true,
            long: side_params(),
            shrt: side_params(),
        };
        let run = || {
            calc_orders(
                1000.0,
                2.0,
                10.2,
                0.0,
                0.0,
                10.4,
                10.5,
                10.45,
                &[10.0, 11.0],
                &spec(),
                &params,
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
