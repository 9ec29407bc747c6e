//! The contract surface the engine consumes from an exchange adapter.
//!
//! Transports (REST signing, websocket plumbing) live in adapter crates;
//! this module fixes the wire types, the position-side inference rules and
//! the order-identity scheme adapters must honor.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::market::MarketSettings;
use crate::position::Position;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("venue rejected the request: code {code}, {msg}")]
    Api { code: String, msg: String },
    #[error("symbol {0} not listed on this venue")]
    UnknownSymbol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Which side of a hedged position an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Shrt,
    Both,
}

impl PositionSide {
    /// Hedge-mode venues address position legs by index.
    pub fn position_idx(&self, hedge_mode: bool) -> u8 {
        if !hedge_mode {
            return 0;
        }
        match self {
            PositionSide::Long => 1,
            PositionSide::Shrt => 2,
            PositionSide::Both => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    PostOnly,
    GoodTillCancel,
}

/// An order resting on the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub custom_id: String,
    pub symbol: String,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
    pub position_side: PositionSide,
    pub timestamp: i64,
}

/// Both position legs plus wallet totals, as one consistent snapshot.
/// The short leg's size is reported negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub long: Position,
    pub shrt: Position,
    pub wallet_balance: f64,
    pub equity: f64,
}

/// A public trade from the stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp: i64,
    pub price: f64,
    pub qty: f64,
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A private execution, as returned by the venue's fill endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub order_id: String,
    pub custom_id: String,
    pub symbol: String,
    pub price: f64,
    pub qty: f64,
    pub side: Side,
    pub timestamp: i64,
}

/// An order to be placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub custom_id: String,
    pub side: Side,
    pub position_side: PositionSide,
    pub order_type: OrderType,
    pub qty: f64,
    pub price: f64,
}

impl OrderRequest {
    /// Limit orders must rest on the book; market orders stay good till
    /// cancel.
    pub fn time_in_force(&self) -> TimeInForce {
        match self.order_type {
            OrderType::Limit => TimeInForce::PostOnly,
            OrderType::Market => TimeInForce::GoodTillCancel,
        }
    }

    /// One-way venues take a reduce-only flag on closes instead of a
    /// position index.
    pub fn reduce_only(&self) -> bool {
        self.custom_id.contains("close")
    }
}

/// Classify an open order onto a position side from its side and the
/// `entry`/`close` markers in its custom id. Unclassifiable orders default
/// to [`PositionSide::Both`].
pub fn determine_position_side(side: Side, custom_id: &str) -> PositionSide {
    let is_entry = custom_id.contains("entry");
    let is_close = custom_id.contains("close");
    match (side, is_entry, is_close) {
        (Side::Buy, true, _) => PositionSide::Long,
        (Side::Buy, false, true) => PositionSide::Shrt,
        (Side::Sell, true, _) => PositionSide::Shrt,
        (Side::Sell, false, true) => PositionSide::Long,
        _ => PositionSide::Both,
    }
}

/// Venue-unique order link id: the custom id, the trailing digits of the
/// placement timestamp and a random tag. Keeps re-placements from a stale
/// snapshot distinguishable while the prefix stays greppable.
pub fn order_link_id(custom_id: &str, now_ms: i64) -> String {
    let ts = now_ms.to_string();
    let suffix = ts.get(8..).unwrap_or("");
    let tag: u16 = rand::thread_rng().gen_range(0..1000);
    format!("{custom_id}_{suffix}_{tag}")
}

/// What the engine consumes from any venue adapter.
///
/// Implementations are expected to log transport failures and surface them
/// as [`ExchangeError`]; the supervising loop retries on the next cadence
/// tick.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_market_spec(&self, symbol: &str) -> Result<MarketSettings, ExchangeError>;

    async fn fetch_position(&self, symbol: &str) -> Result<PositionSnapshot, ExchangeError>;

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn execute_order(&self, order: &OrderRequest) -> Result<OpenOrder, ExchangeError>;

    async fn execute_cancellation(&self, order_id: &str) -> Result<(), ExchangeError>;

    /// Recent public trades, oldest first.
    async fn fetch_ticks(
        &self,
        symbol: &str,
        from_id: Option<u64>,
    ) -> Result<Vec<TradeEvent>, ExchangeError>;

    async fn fetch_ohlcvs(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<Ohlcv>, ExchangeError>;

    /// Private executions. No venue adapter implements this yet; the
    /// default body returns an empty list.
    async fn fetch_fills(&self, _symbol: &str) -> Result<Vec<ExecutionRecord>, ExchangeError> {
        Ok(Vec::new())
    }
}
