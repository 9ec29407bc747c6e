//! Core market data types shared by the engine, the simulator and the
//! adapter surface.

use serde::{Deserialize, Serialize};

/// A single trade (or heartbeat) from the aggregated trade stream.
///
/// Timestamps are epoch milliseconds and non-decreasing. `qty == 0.0` marks
/// a heartbeat sample carrying only the last price forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: i64,
    pub qty: f64,
    pub price: f64,
}

/// Immutable per-symbol contract parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSpec {
    /// Quantity grid; every order qty is an integer multiple of this.
    pub qty_step: f64,

    /// Price grid; every order price is an integer multiple of this.
    pub price_step: f64,

    /// Smallest order quantity the venue accepts.
    pub min_qty: f64,

    /// Smallest order cost the venue accepts (linear markets).
    pub min_cost: f64,

    /// Contract multiplier.
    pub c_mult: f64,

    /// Inverse (coin-margined) vs linear contract payoff.
    pub inverse: bool,

    /// Spot market; long only, no leverage.
    pub spot: bool,

    /// Venue allows simultaneous long and short on the same symbol.
    pub hedge_mode: bool,

    /// Maximum leverage allowed by the venue.
    pub max_leverage: f64,
}

impl Default for MarketSpec {
    fn default() -> Self {
        Self {
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
}

/// Everything the backtester needs to know about a market, as fetched from
/// the venue and cached in `market_specific_settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettings {
    pub exchange: String,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub qty_step: f64,
    pub price_step: f64,
    pub min_qty: f64,
    pub min_cost: f64,
    pub c_mult: f64,
    pub inverse: bool,
    pub spot: bool,
    pub hedge_mode: bool,
    pub max_leverage: f64,
}

impl MarketSettings {
    /// The subset the decision engine consumes.
    pub fn spec(&self) -> MarketSpec {
        MarketSpec {
            qty_step: self.qty_step,
            price_step: self.price_step,
            min_qty: self.min_qty,
            min_cost: self.min_cost,
            c_mult: self.c_mult,
            inverse: self.inverse,
            spot: self.spot,
            hedge_mode: self.hedge_mode,
            max_leverage: self.max_leverage,
        }
    }
}
