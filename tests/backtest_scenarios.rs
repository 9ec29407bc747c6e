//! End-to-end replay scenarios against both constructor families.

use grid_lab::backtesting::{BacktestEngine, BacktestParams, FillStatus};
use grid_lab::market::{MarketSpec, Tick};
use grid_lab::strategy::{
    EmaBandParams, EmaSideParams, OrderKind, ScalpParams, ScalpSideParams, StrategyParams,
};

fn tick(timestamp: i64, qty: f64, price: f64) -> Tick {
    Tick {
        timestamp,
        qty,
        price,
    }
}

fn linear_spec() -> MarketSpec {
    MarketSpec {
        qty_step: 0.001,
        price_step: 0.01,
        min_qty: 0.001,
        min_cost: 0.0,
        c_mult: 1.0,
        inverse: false,
        spot: false,
        hedge_mode: true,
        max_leverage: 25.0,
    }
}

fn scalp_side(iqty_pct: f64, primary_pbr_limit: f64) -> ScalpSideParams {
    ScalpSideParams {
        primary_iqty_pct: iqty_pct,
        primary_ddown_factor: 1.0,
        primary_grid_spacing: 0.05,
        primary_spacing_pbr_coeffs: vec![[0.0, 0.0]],
        primary_pbr_limit,
        secondary_ddown_factor: 1.0,
        secondary_grid_spacing: 0.15,
        secondary_pbr_limit: primary_pbr_limit * 2.0,
        min_markup: 0.005,
        markup_range: 0.0,
        n_close_orders: 1,
    }
}

fn scalp_long_only(iqty_pct: f64, primary_pbr_limit: f64) -> StrategyParams {
    StrategyParams::Scalp(ScalpParams {
        do_long: true,
        do_shrt: false,
        long: scalp_side(iqty_pct, primary_pbr_limit),
        shrt: scalp_side(iqty_pct, primary_pbr_limit),
    })
}

fn no_fee_params(starting_balance: f64) -> BacktestParams {
    BacktestParams {
        starting_balance,
        latency_simulation_ms: 1_000,
        maker_fee: 0.0,
    }
}

#[test]
fn test_round_trip_linear_long() {
    // Entry placed at 100 on the first decision fills on the dip to 99.5;
    // the single-rung close at 100.5 fills on the rally to 101.
    let ticks = vec![
        tick(0, 10.0, 100.0),
        tick(4_000, 10.0, 99.5),
        tick(9_000, 10.0, 100.0),
        tick(12_000, 10.0, 101.0),
    ];
    let engine = BacktestEngine::new(
        linear_spec(),
        scalp_long_only(0.01, 0.1),
        no_fee_params(1_000.0),
    );
    let (fills, summary) = engine.run(&ticks).unwrap();

    assert_eq!(fills.len(), 2);
    let entry = &fills[0];
    assert_eq!(entry.kind, OrderKind::LongIentry);
    assert_eq!(entry.status, FillStatus::Full);
    assert_eq!(entry.qty, 0.1);
    assert_eq!(entry.price, 100.0);
    assert_eq!(entry.psize, 0.1);
    assert_eq!(entry.pprice, 100.0);

    let close = &fills[1];
    assert_eq!(close.kind, OrderKind::LongNclose);
    assert_eq!(close.price, 100.5);
    assert!((close.pnl - 0.05).abs() < 1e-9);
    assert_eq!(close.psize, 0.0);
    assert_eq!(close.pprice, 0.0);
    assert!((close.balance - 1_000.05).abs() < 1e-9);
    assert!(summary.completed);
}

#[test]
fn test_full_cycle_restores_balance_minus_fees() {
    let ticks = vec![
        tick(0, 10.0, 100.0),
        tick(4_000, 10.0, 99.5),
        tick(9_000, 10.0, 100.0),
        tick(12_000, 10.0, 101.0),
    ];
    let params = BacktestParams {
        starting_balance: 1_000.0,
        latency_simulation_ms: 1_000,
        maker_fee: 0.0002,
    };
    let engine = BacktestEngine::new(linear_spec(), scalp_long_only(0.01, 0.1), params);
    let (fills, _) = engine.run(&ticks).unwrap();
    assert_eq!(fills.len(), 2);
    let pnl_sum: f64 = fills.iter().map(|f| f.pnl).sum();
    let fee_sum: f64 = fills.iter().map(|f| f.fee_paid).sum();
    let last = fills.last().unwrap();
    assert!((last.balance - (1_000.0 + pnl_sum + fee_sum)).abs() < 1e-9);
    assert!(fee_sum < 0.0);
    assert_eq!(last.psize, 0.0);
}

#[test]
fn test_bankruptcy_liquidation() {
    // One long contract at 100 on a balance of 10: bankruptcy at 90. The
    // slide to 95 brings the mark within 6% of it while equity is still
    // above the drawdown gate.
    let ticks = vec![
        tick(0, 10.0, 100.0),
        tick(4_000, 10.0, 99.0),
        tick(9_000, 10.0, 98.0),
        tick(14_000, 10.0, 95.0),
    ];
    let engine = BacktestEngine::new(
        linear_spec(),
        scalp_long_only(10.0, 20.0),
        no_fee_params(10.0),
    );
    let (fills, summary) = engine.run(&ticks).unwrap();

    assert!(!summary.completed);
    assert!(summary.closest_bkr < 0.06);
    let last = fills.last().unwrap();
    assert_eq!(last.kind, OrderKind::LongBankruptcy);
    assert_eq!(last.balance, 0.0);
    assert_eq!(last.equity, 0.0);
    assert_eq!(last.qty, -1.0);
    assert!((last.pnl + 5.0).abs() < 1e-9);
}

#[test]
fn test_drawdown_termination_without_liquidation() {
    // Balance large relative to the position: the bankruptcy price stays
    // far away, but the crash wipes out 90% of the equity.
    let ticks = vec![
        tick(0, 10.0, 100.0),
        tick(4_000, 10.0, 99.0),
        tick(9_000, 10.0, 9.5),
        tick(14_000, 10.0, 9.4),
    ];
    let engine = BacktestEngine::new(
        linear_spec(),
        scalp_long_only(10.0, 20.0),
        no_fee_params(10.0),
    );
    let (fills, summary) = engine.run(&ticks).unwrap();
    assert!(!summary.completed);
    // Terminated by drawdown: no synthetic bankruptcy fill appended.
    assert!(fills.iter().all(|f| f.kind != OrderKind::LongBankruptcy));
    assert!(summary.lowest_eqbal_ratio < 1.0);
}

#[test]
fn test_partial_fill_consumes_tick_qty() {
    // Pending entry of 2.0 @ 99; ticks are smaller than the order.
    let ticks = vec![
        tick(0, 10.0, 99.0),
        tick(2_000, 0.7, 98.9),
        tick(2_500, 0.6, 98.8),
    ];
    let engine = BacktestEngine::new(
        linear_spec(),
        scalp_long_only(0.198, 1.0),
        no_fee_params(1_000.0),
    );
    let (fills, _) = engine.run(&ticks).unwrap();

    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].status, FillStatus::Partial);
    assert_eq!(fills[0].qty, 0.7);
    assert_eq!(fills[0].price, 99.0);
    assert_eq!(fills[0].psize, 0.7);
    assert_eq!(fills[0].pprice, 99.0);
    // The residual (1.3 @ 99) survived the latency window and kept filling.
    assert_eq!(fills[1].status, FillStatus::Partial);
    assert_eq!(fills[1].qty, 0.6);
    assert_eq!(fills[1].price, 99.0);
    assert!((fills[1].psize - 1.3).abs() < 1e-9);
}

#[test]
fn test_non_hedge_mode_keeps_one_side() {
    let mut spec = linear_spec();
    spec.hedge_mode = false;
    let strategy = StrategyParams::Scalp(ScalpParams {
        do_long: true,
        do_shrt: true,
        long: scalp_side(0.01, 0.1),
        shrt: scalp_side(0.01, 0.1),
    });
    let ticks = vec![
        tick(0, 10.0, 100.0),
        tick(4_000, 10.0, 99.0),
        tick(9_000, 10.0, 98.0),
        tick(12_000, 10.0, 101.0),
        tick(14_000, 10.0, 101.5),
    ];
    let engine = BacktestEngine::new(spec, strategy, no_fee_params(1_000.0));
    let (fills, _) = engine.run(&ticks).unwrap();
    assert!(!fills.is_empty());
    // The long side opened first; no short fill may appear while it is on.
    let mut long_open = false;
    for fill in &fills {
        if fill.kind.is_shrt() {
            assert!(!long_open, "short fill while long position open: {fill:?}");
        }
        if fill.kind.is_long() {
            long_open = fill.psize != 0.0;
        }
    }
}

fn ema_side() -> EmaSideParams {
    EmaSideParams {
        pbr_stop_loss: 0.0,
        pbr_limit: 1.0,
        iqty_const: 0.01,
        iprc_const: 0.99,
        rqty_const: 0.5,
        rprc_const: 0.98,
        markup_const: 1.01,
        iqty_mar_coeffs: vec![[0.0, 0.0]],
        iprc_mar_coeffs: vec![[0.0, 0.0]],
        rprc_pbr_coeffs: vec![[0.0, 0.0]],
        rqty_mar_coeffs: vec![[0.0, 0.0]],
        rprc_mar_coeffs: vec![[0.0, 0.0]],
        markup_mar_coeffs: vec![[0.0, 0.0]],
    }
}

#[test]
fn test_ema_band_round_trip() {
    // One-minute span over 1 s samples: 60 warm-up ticks, all at 100.
    let mut ticks: Vec<Tick> = (0..60).map(|i| tick(i * 1_000, 1.0, 100.0)).collect();
    ticks.push(tick(60_000, 10.0, 100.0)); // decision: ientry 0.101 @ 99
    ticks.push(tick(61_000, 10.0, 98.9)); // entry fills
    ticks.push(tick(62_000, 10.0, 99.2)); // decision: nclose 0.101 @ 99.99
    ticks.push(tick(63_000, 10.0, 99.0));
    ticks.push(tick(64_000, 10.0, 100.05)); // close fills

    let strategy = StrategyParams::EmaBand(EmaBandParams {
        spans: vec![1.0],
        do_long: true,
        do_shrt: false,
        long: ema_side(),
        shrt: ema_side(),
    });
    let engine = BacktestEngine::new(linear_spec(), strategy, no_fee_params(1_000.0));
    let (fills, summary) = engine.run(&ticks).unwrap();

    assert_eq!(fills.len(), 2);
    let entry = &fills[0];
    assert_eq!(entry.kind, OrderKind::LongIentry);
    assert_eq!(entry.price, 99.0);
    assert_eq!(entry.qty, 0.101);

    let close = &fills[1];
    assert_eq!(close.kind, OrderKind::LongNclose);
    assert_eq!(close.price, 99.99);
    assert!((close.pnl - 0.101 * 0.99).abs() < 1e-9);
    assert_eq!(close.psize, 0.0);
    assert_eq!(close.pprice, 0.0);
    assert!((close.balance - (1_000.0 + 0.101 * 0.99)).abs() < 1e-9);
    assert!(summary.completed);
}

#[test]
fn test_heartbeats_only_advance_emas() {
    // The same scenario with heartbeat ticks interleaved must produce the
    // same fills: zero-qty samples never match orders or trigger decisions.
    let mut ticks: Vec<Tick> = (0..60).map(|i| tick(i * 1_000, 1.0, 100.0)).collect();
    ticks.push(tick(60_000, 10.0, 100.0));
    ticks.push(tick(60_500, 0.0, 98.5)); // heartbeat: no fill, no decision
    ticks.push(tick(61_000, 10.0, 98.9));

    let strategy = StrategyParams::EmaBand(EmaBandParams {
        spans: vec![1.0],
        do_long: true,
        do_shrt: false,
        long: ema_side(),
        shrt: ema_side(),
    });
    let engine = BacktestEngine::new(linear_spec(), strategy, no_fee_params(1_000.0));
    let (fills, _) = engine.run(&ticks).unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].kind, OrderKind::LongIentry);
    assert_eq!(fills[0].price, 99.0);
}

#[test]
fn test_insufficient_warmup_is_an_error() {
    let ticks = vec![tick(0, 1.0, 100.0), tick(1_000, 1.0, 100.0)];
    let strategy = StrategyParams::EmaBand(EmaBandParams {
        spans: vec![60.0],
        do_long: true,
        do_shrt: false,
        long: ema_side(),
        shrt: ema_side(),
    });
    let engine = BacktestEngine::new(linear_spec(), strategy, no_fee_params(1_000.0));
    assert!(engine.run(&ticks).is_err());
}
