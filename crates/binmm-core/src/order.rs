//! Order-related types and identifiers.
//!
//! Provides order side, role, status, venue order IDs, and the managed-order
//! record tracked by the order ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::{InstrumentId, Price, Size};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

/// Why an order exists.
///
/// Exit orders protect inventory and may only be replaced by exit logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    Entry,
    Exit,
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Exit => write!(f, "exit"),
        }
    }
}

/// Lifecycle state of a managed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Submitted, not yet acknowledged.
    Pending,
    /// Resting on the book.
    Open,
    /// Fully matched.
    Filled,
    /// Cancelled (locally or by the venue).
    Cancelled,
}

impl OrderStatus {
    /// Pending and open orders both count as live exposure.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Open)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Open => write!(f, "open"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Create from a venue response.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Generate a locally unique identifier for simulated orders.
    ///
    /// Format: `{prefix}_{timestamp_ms}_{uuid_short}`
    pub fn synthetic(prefix: &str) -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid = Uuid::new_v4().simple().to_string();
        let short = uuid.get(..8).unwrap_or(&uuid);
        Self(format!("{prefix}_{ts}_{short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An order the system believes is (or was) outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedOrder {
    pub id: OrderId,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub size_matched: Size,
    pub status: OrderStatus,
    pub role: OrderRole,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl ManagedOrder {
    /// Create a freshly submitted order.
    pub fn new(
        id: OrderId,
        instrument: InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
        role: OrderRole,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            instrument,
            side,
            price,
            size,
            size_matched: Size::ZERO,
            status: OrderStatus::Open,
            role,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    #[inline]
    pub fn size_remaining(&self) -> Size {
        self.size.saturating_sub(self.size_matched)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Capital reserved by a resting buy (zero for sells).
    pub fn locked_notional(&self) -> rust_decimal::Decimal {
        if self.side == OrderSide::Buy && self.is_active() {
            self.size_remaining().notional(self.price)
        } else {
            rust_decimal::Decimal::ZERO
        }
    }

    #[inline]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }
}

/// Order submission request passed to the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostOrderRequest {
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// Reject instead of matching immediately.
    pub post_only: bool,
}

impl PostOrderRequest {
    pub fn new(instrument: InstrumentId, side: OrderSide, price: Price, size: Size) -> Self {
        Self {
            instrument,
            side,
            price,
            size,
            post_only: true,
        }
    }

    /// Allow the order to take liquidity.
    pub fn taker(mut self) -> Self {
        self.post_only = false;
        self
    }
}

/// Venue response to an order submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostOrderResult {
    pub success: bool,
    pub order_id: Option<OrderId>,
    pub error: Option<String>,
    /// Post-only order rejected because it would have matched.
    pub would_cross: bool,
}

impl PostOrderResult {
    pub fn accepted(order_id: OrderId) -> Self {
        Self {
            success: true,
            order_id: Some(order_id),
            error: None,
            would_cross: false,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            error: Some(error.into()),
            would_cross: false,
        }
    }

    pub fn crossed() -> Self {
        Self {
            success: false,
            order_id: None,
            error: Some("post-only order would cross".to_string()),
            would_cross: true,
        }
    }

    /// Venue refused the order for lack of shares or token allowance.
    pub fn is_balance_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| {
            let lower = e.to_ascii_lowercase();
            lower.contains("balance") || lower.contains("allowance")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide) -> ManagedOrder {
        ManagedOrder::new(
            OrderId::from("o-1"),
            InstrumentId::from("tok"),
            side,
            Price::new(dec!(0.40)),
            Size::new(dec!(10)),
            OrderRole::Entry,
            1_000,
        )
    }

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_order_side_parse() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!(" SELL ".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert!("hold".parse::<OrderSide>().is_err());
    }

    #[test]
    fn test_synthetic_ids_unique() {
        let id1 = OrderId::synthetic("sim");
        let id2 = OrderId::synthetic("sim");
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("sim_"));
    }

    #[test]
    fn test_locked_notional_only_for_active_buys() {
        let mut buy = order(OrderSide::Buy);
        buy.size_matched = Size::new(dec!(4));
        assert_eq!(buy.locked_notional(), dec!(2.40));

        buy.status = OrderStatus::Cancelled;
        assert_eq!(buy.locked_notional(), dec!(0));

        let sell = order(OrderSide::Sell);
        assert_eq!(sell.locked_notional(), dec!(0));
    }

    #[test]
    fn test_balance_error_detection() {
        assert!(PostOrderResult::rejected("not enough balance / allowance").is_balance_error());
        assert!(PostOrderResult::rejected("Insufficient Allowance").is_balance_error());
        assert!(!PostOrderResult::rejected("invalid tick").is_balance_error());
        assert!(!PostOrderResult::crossed().is_balance_error());
    }
}
