//! Order records emitted by the constructors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What an order is for. Replaces the tag strings of the wire protocol;
/// [`fmt::Display`] renders the snake_case labels used in exported fill logs
/// and in `custom_id`s sent to the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Placeholder for "no order".
    None,
    LongIentry,
    LongRentry,
    LongPrimaryRentry,
    LongPrimaryRentryAfterPartialClose,
    LongSecondaryRentry,
    LongNclose,
    LongSclose,
    LongBankruptcy,
    ShrtIentry,
    ShrtRentry,
    ShrtPrimaryRentry,
    ShrtPrimaryRentryAfterPartialClose,
    ShrtSecondaryRentry,
    ShrtNclose,
    ShrtSclose,
    ShrtBankruptcy,
}

impl OrderKind {
    pub fn is_long(&self) -> bool {
        matches!(
            self,
            OrderKind::LongIentry
                | OrderKind::LongRentry
                | OrderKind::LongPrimaryRentry
                | OrderKind::LongPrimaryRentryAfterPartialClose
                | OrderKind::LongSecondaryRentry
                | OrderKind::LongNclose
                | OrderKind::LongSclose
                | OrderKind::LongBankruptcy
        )
    }

    pub fn is_shrt(&self) -> bool {
        !matches!(self, OrderKind::None) && !self.is_long()
    }

    pub fn is_entry(&self) -> bool {
        matches!(
            self,
            OrderKind::LongIentry
                | OrderKind::LongRentry
                | OrderKind::LongPrimaryRentry
                | OrderKind::LongPrimaryRentryAfterPartialClose
                | OrderKind::LongSecondaryRentry
                | OrderKind::ShrtIentry
                | OrderKind::ShrtRentry
                | OrderKind::ShrtPrimaryRentry
                | OrderKind::ShrtPrimaryRentryAfterPartialClose
                | OrderKind::ShrtSecondaryRentry
        )
    }

    pub fn is_close(&self) -> bool {
        matches!(
            self,
            OrderKind::LongNclose
                | OrderKind::LongSclose
                | OrderKind::ShrtNclose
                | OrderKind::ShrtSclose
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderKind::None => "",
            OrderKind::LongIentry => "long_ientry",
            OrderKind::LongRentry => "long_rentry",
            OrderKind::LongPrimaryRentry => "long_primary_rentry",
            OrderKind::LongPrimaryRentryAfterPartialClose => {
                "long_primary_rentry_after_partial_close"
            }
            OrderKind::LongSecondaryRentry => "long_secondary_rentry",
            OrderKind::LongNclose => "long_nclose",
            OrderKind::LongSclose => "long_sclose",
            OrderKind::LongBankruptcy => "long_bankruptcy",
            OrderKind::ShrtIentry => "shrt_ientry",
            OrderKind::ShrtRentry => "shrt_rentry",
            OrderKind::ShrtPrimaryRentry => "shrt_primary_rentry",
            OrderKind::ShrtPrimaryRentryAfterPartialClose => {
                "shrt_primary_rentry_after_partial_close"
            }
            OrderKind::ShrtSecondaryRentry => "shrt_secondary_rentry",
            OrderKind::ShrtNclose => "shrt_nclose",
            OrderKind::ShrtSclose => "shrt_sclose",
            OrderKind::ShrtBankruptcy => "shrt_bankruptcy",
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A maker-limit order as produced by the constructors.
///
/// Sign convention: long entries have qty > 0, long closes qty < 0; short
/// entries qty < 0, short closes qty > 0. A zero qty means "no order".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub qty: f64,
    pub price: f64,
    pub kind: OrderKind,
}

impl Order {
    pub fn new(qty: f64, price: f64, kind: OrderKind) -> Self {
        Self { qty, price, kind }
    }

    /// The "no order" placeholder.
    pub const fn none() -> Self {
        Self {
            qty: 0.0,
            price: 0.0,
            kind: OrderKind::None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.qty == 0.0
    }
}

impl Default for Order {
    fn default() -> Self {
        Self::none()
    }
}
