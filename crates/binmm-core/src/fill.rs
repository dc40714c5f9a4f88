//! Confirmed fill records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{InstrumentId, OrderId, OrderSide, Price, Size};

/// How much the dedupe key of a fill can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Keyed on a venue transaction reference.
    Verified,
    /// No usable transaction reference; keyed on trade fields only.
    Unverified,
}

/// A deduplicated, confirmed trade against one of our orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Stable across repeated polls of the same trade.
    pub dedupe_key: String,
    pub order_id: Option<OrderId>,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// Trade time (Unix ms).
    pub timestamp_ms: u64,
    pub tx_ref: Option<String>,
    pub is_maker: bool,
    pub fee: Decimal,
    pub rebate: Decimal,
    pub provenance: Provenance,
}

impl Fill {
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.size.notional(self.price)
    }

    #[inline]
    pub fn is_verified(&self) -> bool {
        self.provenance == Provenance::Verified
    }
}
