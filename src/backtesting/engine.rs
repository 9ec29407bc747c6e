//! Core tick-replay engine.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

use crate::backtesting::BacktestError;
use crate::ema::{band_snapshot, spans_to_samples, warmup_len, EmaBand};
use crate::market::{MarketSpec, Tick};
use crate::math::{calc_diff, round_};
use crate::position::{
    calc_bankruptcy_price, calc_equity, calc_long_pnl, calc_new_psize_pprice, calc_shrt_pnl,
    calc_upnl, qty_to_cost,
};
use crate::strategy::{
    calc_long_close_grid, calc_long_entry, calc_long_orders, calc_orders, calc_shrt_close_grid,
    calc_shrt_entry, calc_shrt_orders, EmaBandParams, Order, OrderKind, ScalpParams,
    StrategyParams,
};

/// Orders are refreshed once the decision snapshot is this stale.
const UPDATE_INTERVAL_MS: i64 = 5_000;

/// A run stops once equity falls below this fraction of starting balance.
const DRAWDOWN_LIMIT: f64 = 0.1;

/// Bankruptcy within this relative distance of the mark price counts as
/// liquidation.
const BANKRUPTCY_DISTANCE: f64 = 0.06;

/// Replay-wide knobs independent of the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub starting_balance: f64,

    /// Gap between a fill and the next decision, modelling bot↔exchange
    /// round-trip latency.
    pub latency_simulation_ms: i64,

    /// Maker fee rate; negative means a rebate.
    pub maker_fee: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            starting_balance: 1_000.0,
            latency_simulation_ms: 1_000,
            maker_fee: 0.0002,
        }
    }
}

/// Whether a fill consumed the whole resting order or only the tick's qty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStatus {
    Full,
    Partial,
}

/// One row of the fill log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fill {
    /// Tick index the fill happened on.
    pub index: usize,
    pub timestamp: i64,
    pub pnl: f64,
    pub fee_paid: f64,
    pub balance: f64,
    pub equity: f64,
    /// Position-base-ratio of the filled side after the fill.
    pub pbr: f64,
    pub qty: f64,
    pub price: f64,
    /// Position size of the filled side after the fill.
    pub psize: f64,
    /// Position price of the filled side after the fill.
    pub pprice: f64,
    pub kind: OrderKind,
    pub status: FillStatus,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BacktestSummary {
    /// False when the run was cut short by drawdown or liquidation.
    pub completed: bool,
    pub lowest_eqbal_ratio: f64,
    pub closest_bkr: f64,
}

/// Mutable replay state shared by both strategy families.
struct ReplayState {
    balance: f64,
    long_psize: f64,
    long_pprice: f64,
    shrt_psize: f64,
    shrt_pprice: f64,
    next_update_ts: i64,
    bkr_price: f64,
    available_margin: f64,
    closest_bkr: f64,
    lowest_eqbal_ratio: f64,
    prev_k: usize,
    fills: Vec<Fill>,
}

impl ReplayState {
    fn new(starting_balance: f64) -> Self {
        Self {
            balance: starting_balance,
            long_psize: 0.0,
            long_pprice: 0.0,
            shrt_psize: 0.0,
            shrt_pprice: 0.0,
            next_update_ts: 0,
            bkr_price: 0.0,
            available_margin: 0.0,
            closest_bkr: 1.0,
            lowest_eqbal_ratio: 1.0,
            prev_k: 0,
            fills: Vec::new(),
        }
    }

    fn finish(self, completed: bool) -> (Vec<Fill>, BacktestSummary) {
        let summary = BacktestSummary {
            completed,
            lowest_eqbal_ratio: self.lowest_eqbal_ratio,
            closest_bkr: self.closest_bkr,
        };
        (self.fills, summary)
    }
}

/// Replays a sampled tick stream against one strategy configuration.
pub struct BacktestEngine {
    spec: MarketSpec,
    strategy: StrategyParams,
    params: BacktestParams,
}

impl BacktestEngine {
    pub fn new(spec: MarketSpec, strategy: StrategyParams, params: BacktestParams) -> Self {
        Self {
            spec,
            strategy,
            params,
        }
    }

    /// Run the replay to completion or early termination.
    pub fn run(&self, ticks: &[Tick]) -> Result<(Vec<Fill>, BacktestSummary), BacktestError> {
        match &self.strategy {
            StrategyParams::EmaBand(p) => self.run_ema_band(ticks, p),
            StrategyParams::Scalp(p) => self.run_scalp(ticks, p),
        }
    }

    /// Zero both sides out at the liquidation tick, charging the position
    /// cost as a fee and realizing the loss against the tick price.
    fn liquidate(&self, st: &mut ReplayState, k: usize, tick: &Tick) {
        let spec = &self.spec;
        if st.long_psize != 0.0 {
            let fee_paid =
                -qty_to_cost(st.long_psize, st.long_pprice, spec) * self.params.maker_fee;
            let pnl = calc_long_pnl(st.long_pprice, tick.price, -st.long_psize, spec);
            let closed = st.long_psize;
            st.balance = 0.0;
            st.long_psize = 0.0;
            st.long_pprice = 0.0;
            st.fills.push(Fill {
                index: k,
                timestamp: tick.timestamp,
                pnl,
                fee_paid,
                balance: 0.0,
                equity: 0.0,
                pbr: 0.0,
                qty: -closed,
                price: tick.price,
                psize: 0.0,
                pprice: 0.0,
                kind: OrderKind::LongBankruptcy,
                status: FillStatus::Full,
            });
        }
        if st.shrt_psize != 0.0 {
            let fee_paid =
                -qty_to_cost(st.shrt_psize, st.shrt_pprice, spec) * self.params.maker_fee;
            let pnl = calc_shrt_pnl(st.shrt_pprice, tick.price, -st.shrt_psize, spec);
            let closed = st.shrt_psize;
            st.balance = 0.0;
            st.shrt_psize = 0.0;
            st.shrt_pprice = 0.0;
            st.fills.push(Fill {
                index: k,
                timestamp: tick.timestamp,
                pnl,
                fee_paid,
                balance: 0.0,
                equity: 0.0,
                pbr: 0.0,
                qty: -closed,
                price: tick.price,
                psize: 0.0,
                pprice: 0.0,
                kind: OrderKind::ShrtBankruptcy,
                status: FillStatus::Full,
            });
        }
    }

    fn run_ema_band(
        &self,
        ticks: &[Tick],
        p: &EmaBandParams,
    ) -> Result<(Vec<Fill>, BacktestSummary), BacktestError> {
        let spec = &self.spec;
        let maker_fee = self.params.maker_fee;
        let starting_balance = self.params.starting_balance;
        if ticks.len() < 2 {
            return Err(BacktestError::UnsampledTicks);
        }
        let spans = spans_to_samples(&p.spans, ticks[1].timestamp - ticks[0].timestamp);
        let start_idx = warmup_len(&spans).max(1);
        if start_idx >= ticks.len() {
            return Err(BacktestError::InsufficientWarmup {
                have: ticks.len(),
                need: start_idx + 1,
            });
        }
        let seed: Vec<f64> = ticks[..start_idx].iter().map(|t| t.price).collect();
        let mut mas = EmaBand::seed(&seed, &spans);
        let mut prev_mas = mas.values().to_vec();

        let mut st = ReplayState::new(starting_balance);
        let mut long_entry = Order::none();
        let mut shrt_entry = Order::none();
        let mut long_close = Order::none();
        let mut shrt_close = Order::none();

        for k in start_idx..ticks.len() {
            let tick = ticks[k];
            let new_mas = mas.advanced(tick.price);
            if tick.qty == 0.0 {
                mas.commit(new_mas);
                continue;
            }

            st.closest_bkr = st.closest_bkr.min(calc_diff(st.bkr_price, tick.price));
            if tick.timestamp >= st.next_update_ts {
                let orders = calc_orders(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    tick.price,
                    tick.price,
                    mas.values(),
                    spec,
                    p,
                )?;
                long_entry = orders.long_entry;
                shrt_entry = orders.shrt_entry;
                long_close = orders.long_close;
                shrt_close = orders.shrt_close;
                st.bkr_price = orders.bkr_price;
                st.available_margin = orders.available_margin;
                let equity = st.balance
                    + calc_upnl(
                        st.long_psize,
                        st.long_pprice,
                        st.shrt_psize,
                        st.shrt_pprice,
                        tick.price,
                        spec,
                    );
                st.lowest_eqbal_ratio = st.lowest_eqbal_ratio.min(equity / st.balance);
                st.next_update_ts = tick.timestamp + UPDATE_INTERVAL_MS;
                st.prev_k = k;
                prev_mas = mas.values().to_vec();

                if equity / starting_balance < DRAWDOWN_LIMIT {
                    return Ok(st.finish(false));
                }
                if st.closest_bkr < BANKRUPTCY_DISTANCE {
                    self.liquidate(&mut st, k, &tick);
                    return Ok(st.finish(false));
                }
            }

            if long_entry.qty > 0.0 && tick.price < long_entry.price {
                let (status, fill_qty) = if tick.qty < long_entry.qty {
                    (FillStatus::Partial, tick.qty)
                } else {
                    (FillStatus::Full, long_entry.qty)
                };
                let (psize, pprice) = calc_new_psize_pprice(
                    st.long_psize,
                    st.long_pprice,
                    fill_qty,
                    long_entry.price,
                    spec.qty_step,
                );
                st.long_psize = psize;
                st.long_pprice = pprice;
                let fee_paid = -qty_to_cost(fill_qty, long_entry.price, spec) * maker_fee;
                st.balance += fee_paid;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl: 0.0,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.long_psize, st.long_pprice, spec) / st.balance,
                    qty: fill_qty,
                    price: long_entry.price,
                    psize: st.long_psize,
                    pprice: st.long_pprice,
                    kind: long_entry.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    long_entry.qty = round_(long_entry.qty - fill_qty, spec.qty_step);
                } else {
                    // The live bot would still be acting on its last
                    // snapshot: recompute the entry only, against the
                    // previous decision tick.
                    let band = band_snapshot(&prev_mas, ticks[st.prev_k].price);
                    let (entry, _) = calc_long_orders(
                        st.balance,
                        st.long_psize,
                        st.long_pprice,
                        ticks[st.prev_k].price,
                        ticks[st.prev_k].price,
                        &band,
                        st.available_margin,
                        spec,
                        &p.long,
                    )?;
                    long_entry = entry;
                }
            }

            if st.shrt_psize < 0.0 && shrt_close.qty > 0.0 && tick.price < shrt_close.price {
                let (status, mut close_qty) = if tick.qty < shrt_close.qty {
                    (FillStatus::Partial, tick.qty)
                } else {
                    (FillStatus::Full, shrt_close.qty)
                };
                let mut new_shrt_psize = round_(st.shrt_psize + close_qty, spec.qty_step);
                if new_shrt_psize > 0.0 {
                    warn!(
                        shrt_psize = st.shrt_psize,
                        shrt_pprice = st.shrt_pprice,
                        close_qty, "short close qty greater than short psize; clamping"
                    );
                    close_qty = -st.shrt_psize;
                    new_shrt_psize = 0.0;
                }
                st.shrt_psize = new_shrt_psize;
                let fee_paid = -qty_to_cost(close_qty, shrt_close.price, spec) * maker_fee;
                let pnl = calc_shrt_pnl(st.shrt_pprice, shrt_close.price, close_qty, spec);
                if st.shrt_psize == 0.0 {
                    st.shrt_pprice = 0.0;
                }
                st.balance += fee_paid + pnl;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.shrt_psize, st.shrt_pprice, spec) / st.balance,
                    qty: close_qty,
                    price: shrt_close.price,
                    psize: st.shrt_psize,
                    pprice: st.shrt_pprice,
                    kind: shrt_close.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    shrt_close.qty -= close_qty;
                } else {
                    shrt_close = Order::none();
                }
            }

            if shrt_entry.qty != 0.0 && tick.price > shrt_entry.price {
                let (status, fill_qty) = if tick.qty < -shrt_entry.qty {
                    (FillStatus::Partial, -tick.qty)
                } else {
                    (FillStatus::Full, shrt_entry.qty)
                };
                let (psize, pprice) = calc_new_psize_pprice(
                    st.shrt_psize,
                    st.shrt_pprice,
                    fill_qty,
                    shrt_entry.price,
                    spec.qty_step,
                );
                st.shrt_psize = psize;
                st.shrt_pprice = pprice;
                let fee_paid = -qty_to_cost(fill_qty, shrt_entry.price, spec) * maker_fee;
                st.balance += fee_paid;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl: 0.0,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.shrt_psize, st.shrt_pprice, spec) / st.balance,
                    qty: fill_qty,
                    price: shrt_entry.price,
                    psize: st.shrt_psize,
                    pprice: st.shrt_pprice,
                    kind: shrt_entry.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    shrt_entry.qty -= fill_qty;
                } else {
                    let band = band_snapshot(&prev_mas, ticks[st.prev_k].price);
                    let (entry, _) = calc_shrt_orders(
                        st.balance,
                        st.shrt_psize,
                        st.shrt_pprice,
                        ticks[st.prev_k].price,
                        ticks[st.prev_k].price,
                        &band,
                        st.available_margin,
                        spec,
                        &p.shrt,
                    )?;
                    shrt_entry = entry;
                }
            }

            if st.long_psize != 0.0 && long_close.qty != 0.0 && tick.price > long_close.price {
                let (status, mut close_qty) = if tick.qty < -long_close.qty {
                    (FillStatus::Partial, -tick.qty)
                } else {
                    (FillStatus::Full, long_close.qty)
                };
                let mut new_long_psize = round_(st.long_psize + close_qty, spec.qty_step);
                if new_long_psize < 0.0 {
                    warn!(
                        long_psize = st.long_psize,
                        long_pprice = st.long_pprice,
                        close_qty, "long close qty greater than long psize; clamping"
                    );
                    close_qty = -st.long_psize;
                    new_long_psize = 0.0;
                }
                st.long_psize = new_long_psize;
                let fee_paid = -qty_to_cost(close_qty, long_close.price, spec) * maker_fee;
                let pnl = calc_long_pnl(st.long_pprice, long_close.price, close_qty, spec);
                if st.long_psize == 0.0 {
                    st.long_pprice = 0.0;
                }
                st.balance += fee_paid + pnl;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.long_psize, st.long_pprice, spec) / st.balance,
                    qty: close_qty,
                    price: long_close.price,
                    psize: st.long_psize,
                    pprice: st.long_pprice,
                    kind: long_close.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    long_close.qty -= close_qty;
                } else {
                    long_close = Order::none();
                }
            }

            mas.commit(new_mas);
        }
        Ok(st.finish(true))
    }

    fn run_scalp(
        &self,
        ticks: &[Tick],
        p: &ScalpParams,
    ) -> Result<(Vec<Fill>, BacktestSummary), BacktestError> {
        let spec = &self.spec;
        let maker_fee = self.params.maker_fee;
        let starting_balance = self.params.starting_balance;

        let mut st = ReplayState::new(starting_balance);
        let mut long_entry = Order::none();
        let mut shrt_entry = Order::none();
        let mut long_closes: VecDeque<Order> = VecDeque::new();
        let mut shrt_closes: VecDeque<Order> = VecDeque::new();
        // Latest fill per side, reset to (0, 0) when that side flattens.
        let mut long_last_pfill = (0.0, 0.0);
        let mut shrt_last_pfill = (0.0, 0.0);

        for (k, tick) in ticks.iter().enumerate() {
            if tick.qty == 0.0 {
                continue;
            }

            st.closest_bkr = st.closest_bkr.min(calc_diff(st.bkr_price, tick.price));
            if tick.timestamp >= st.next_update_ts {
                let (do_long, do_shrt) = if spec.hedge_mode {
                    (p.do_long, p.do_shrt)
                } else {
                    let no_pos = st.long_psize == 0.0 && st.shrt_psize == 0.0;
                    (
                        (no_pos && p.do_long) || st.long_psize != 0.0,
                        (no_pos && p.do_shrt) || st.shrt_psize != 0.0,
                    )
                };
                long_entry = calc_long_entry(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    long_last_pfill,
                    tick.price,
                    do_long,
                    spec,
                    &p.long,
                );
                shrt_entry = calc_shrt_entry(
                    st.balance,
                    st.shrt_psize,
                    st.shrt_pprice,
                    shrt_last_pfill,
                    tick.price,
                    do_shrt,
                    spec,
                    &p.shrt,
                );
                long_closes =
                    calc_long_close_grid(st.long_psize, st.long_pprice, tick.price, spec, &p.long)
                        .into();
                shrt_closes =
                    calc_shrt_close_grid(st.shrt_psize, st.shrt_pprice, tick.price, spec, &p.shrt)
                        .into();
                st.bkr_price = calc_bankruptcy_price(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    spec,
                );
                let equity = st.balance
                    + calc_upnl(
                        st.long_psize,
                        st.long_pprice,
                        st.shrt_psize,
                        st.shrt_pprice,
                        tick.price,
                        spec,
                    );
                st.lowest_eqbal_ratio = st.lowest_eqbal_ratio.min(equity / st.balance);
                st.next_update_ts = tick.timestamp + UPDATE_INTERVAL_MS;
                st.prev_k = k;

                if equity / starting_balance < DRAWDOWN_LIMIT {
                    return Ok(st.finish(false));
                }
                if st.closest_bkr < BANKRUPTCY_DISTANCE {
                    self.liquidate(&mut st, k, tick);
                    return Ok(st.finish(false));
                }
            }

            if long_entry.qty > 0.0 && tick.price < long_entry.price {
                let (status, fill_qty) = if tick.qty < long_entry.qty {
                    (FillStatus::Partial, tick.qty)
                } else {
                    (FillStatus::Full, long_entry.qty)
                };
                long_last_pfill = (fill_qty, long_entry.price);
                let (psize, pprice) = calc_new_psize_pprice(
                    st.long_psize,
                    st.long_pprice,
                    fill_qty,
                    long_entry.price,
                    spec.qty_step,
                );
                st.long_psize = psize;
                st.long_pprice = pprice;
                let fee_paid = -qty_to_cost(fill_qty, long_entry.price, spec) * maker_fee;
                st.balance += fee_paid;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl: 0.0,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.long_psize, st.long_pprice, spec) / st.balance,
                    qty: fill_qty,
                    price: long_entry.price,
                    psize: st.long_psize,
                    pprice: st.long_pprice,
                    kind: long_entry.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    long_entry.qty = round_(long_entry.qty - fill_qty, spec.qty_step);
                } else {
                    long_entry = calc_long_entry(
                        st.balance,
                        st.long_psize,
                        st.long_pprice,
                        long_last_pfill,
                        ticks[st.prev_k].price,
                        p.do_long,
                        spec,
                        &p.long,
                    );
                }
            }

            while st.shrt_psize < 0.0 {
                let front = match shrt_closes.front() {
                    Some(front) if front.qty > 0.0 && tick.price < front.price => *front,
                    _ => break,
                };
                let (status, mut close_qty) = if tick.qty < front.qty {
                    (FillStatus::Partial, tick.qty)
                } else {
                    (FillStatus::Full, front.qty)
                };
                let mut new_shrt_psize = round_(st.shrt_psize + close_qty, spec.qty_step);
                if new_shrt_psize > 0.0 {
                    warn!(
                        shrt_psize = st.shrt_psize,
                        shrt_pprice = st.shrt_pprice,
                        close_qty, "short close qty greater than short psize; clamping"
                    );
                    close_qty = -st.shrt_psize;
                    new_shrt_psize = 0.0;
                }
                if new_shrt_psize == 0.0 {
                    shrt_last_pfill = (0.0, 0.0);
                } else {
                    shrt_last_pfill = (close_qty, front.price);
                }
                st.shrt_psize = new_shrt_psize;
                let fee_paid = -qty_to_cost(close_qty, front.price, spec) * maker_fee;
                let pnl = calc_shrt_pnl(st.shrt_pprice, front.price, close_qty, spec);
                if st.shrt_psize == 0.0 {
                    st.shrt_pprice = 0.0;
                }
                st.balance += fee_paid + pnl;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.shrt_psize, st.shrt_pprice, spec) / st.balance,
                    qty: close_qty,
                    price: front.price,
                    psize: st.shrt_psize,
                    pprice: st.shrt_pprice,
                    kind: front.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    if let Some(front) = shrt_closes.front_mut() {
                        front.qty -= close_qty;
                    }
                    break;
                }
                shrt_closes.pop_front();
            }

            if shrt_entry.qty < 0.0 && tick.price > shrt_entry.price {
                let (status, fill_qty) = if tick.qty < -shrt_entry.qty {
                    (FillStatus::Partial, -tick.qty)
                } else {
                    (FillStatus::Full, shrt_entry.qty)
                };
                shrt_last_pfill = (fill_qty, shrt_entry.price);
                let (psize, pprice) = calc_new_psize_pprice(
                    st.shrt_psize,
                    st.shrt_pprice,
                    fill_qty,
                    shrt_entry.price,
                    spec.qty_step,
                );
                st.shrt_psize = psize;
                st.shrt_pprice = pprice;
                let fee_paid = -qty_to_cost(fill_qty, shrt_entry.price, spec) * maker_fee;
                st.balance += fee_paid;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl: 0.0,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.shrt_psize, st.shrt_pprice, spec) / st.balance,
                    qty: fill_qty,
                    price: shrt_entry.price,
                    psize: st.shrt_psize,
                    pprice: st.shrt_pprice,
                    kind: shrt_entry.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    shrt_entry.qty -= fill_qty;
                } else {
                    shrt_entry = calc_shrt_entry(
                        st.balance,
                        st.shrt_psize,
                        st.shrt_pprice,
                        shrt_last_pfill,
                        ticks[st.prev_k].price,
                        p.do_shrt,
                        spec,
                        &p.shrt,
                    );
                }
            }

            while st.long_psize != 0.0 {
                let front = match long_closes.front() {
                    Some(front) if front.qty != 0.0 && tick.price > front.price => *front,
                    _ => break,
                };
                let (status, mut close_qty) = if tick.qty < -front.qty {
                    (FillStatus::Partial, -tick.qty)
                } else {
                    (FillStatus::Full, front.qty)
                };
                let mut new_long_psize = round_(st.long_psize + close_qty, spec.qty_step);
                if new_long_psize < 0.0 {
                    warn!(
                        long_psize = st.long_psize,
                        long_pprice = st.long_pprice,
                        close_qty, "long close qty greater than long psize; clamping"
                    );
                    close_qty = -st.long_psize;
                    new_long_psize = 0.0;
                }
                if new_long_psize == 0.0 {
                    long_last_pfill = (0.0, 0.0);
                } else {
                    long_last_pfill = (close_qty, front.price);
                }
                st.long_psize = new_long_psize;
                let fee_paid = -qty_to_cost(close_qty, front.price, spec) * maker_fee;
                let pnl = calc_long_pnl(st.long_pprice, front.price, close_qty, spec);
                if st.long_psize == 0.0 {
                    st.long_pprice = 0.0;
                }
                st.balance += fee_paid + pnl;
                let equity = calc_equity(
                    st.balance,
                    st.long_psize,
                    st.long_pprice,
                    st.shrt_psize,
                    st.shrt_pprice,
                    tick.price,
                    spec,
                );
                st.fills.push(Fill {
                    index: k,
                    timestamp: tick.timestamp,
                    pnl,
                    fee_paid,
                    balance: st.balance,
                    equity,
                    pbr: qty_to_cost(st.long_psize, st.long_pprice, spec) / st.balance,
                    qty: close_qty,
                    price: front.price,
                    psize: st.long_psize,
                    pprice: st.long_pprice,
                    kind: front.kind,
                    status,
                });
                st.next_update_ts = st
                    .next_update_ts
                    .min(tick.timestamp + self.params.latency_simulation_ms);
                if status == FillStatus::Partial {
                    if let Some(front) = long_closes.front_mut() {
                        front.qty -= close_qty;
                    }
                    break;
                }
                long_closes.pop_front();
            }
        }
        Ok(st.finish(true))
    }
}
