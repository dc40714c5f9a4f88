//! Venue-side records as delivered to the core.
//!
//! These are decoded from the wire but not yet validated: the fill ledger
//! decides which trades are usable, the position store decides what a
//! position snapshot means.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use binmm_core::{InstrumentId, ManagedOrder, OrderId, OrderSide, OrderStatus, Price, Size};

/// One trade from the account's trade history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrade {
    /// Transaction reference; may be missing or truncated on some feeds.
    pub tx_ref: Option<String>,
    pub order_id: Option<String>,
    pub asset: String,
    /// Raw side string ("BUY"/"SELL", any case).
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
    /// Trade time (Unix ms). `None` when the feed omitted it or sent garbage.
    pub timestamp_ms: Option<u64>,
    pub is_maker: bool,
    pub fee: Decimal,
    pub rebate: Decimal,
}

/// Authoritative holding for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub instrument: InstrumentId,
    pub size: Size,
    pub avg_price: Price,
}

/// An order the venue reports as resting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub size_matched: Size,
}

impl OpenOrder {
    #[inline]
    pub fn size_remaining(&self) -> Size {
        self.size.saturating_sub(self.size_matched)
    }

    /// View as an untracked managed order (role assumed entry).
    pub fn to_managed(&self, now_ms: u64) -> ManagedOrder {
        let mut order = ManagedOrder::new(
            self.order_id.clone(),
            self.instrument.clone(),
            self.side,
            self.price,
            self.size,
            binmm_core::OrderRole::Entry,
            now_ms,
        );
        order.size_matched = self.size_matched;
        order.status = OrderStatus::Open;
        order
    }
}
