//! Core domain types for the binmm inventory-safety core.
//!
//! This crate provides the fundamental types shared by every component:
//! - `InstrumentId`, `MarketPair`: Opaque handles to the two live outcome tokens
//! - `Price`, `Size`: Precision-safe numeric types on the 0.01 tick grid
//! - `ManagedOrder`, `OrderSide`, `OrderRole`, `OrderStatus`: Order bookkeeping
//! - `Fill`, `Provenance`: Confirmed trade records
//! - `BookTop`: Best bid/ask snapshot
//! - `Clock`: Millisecond time source (injectable for tests)

pub mod book;
pub mod clock;
pub mod decimal;
pub mod error;
pub mod fill;
pub mod instrument;
pub mod order;

pub use book::BookTop;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use fill::{Fill, Provenance};
pub use instrument::{InstrumentId, MarketPair};
pub use order::{
    ManagedOrder, OrderId, OrderRole, OrderSide, OrderStatus, PostOrderRequest, PostOrderResult,
};
