//! Position store for binmm.
//!
//! Holds the belief of shares per instrument and keeps it honest:
//! - Incremental updates from confirmed fills
//! - Periodic reconciliation that overwrites belief with the venue snapshot
//! - Mark-to-market and adverse excursion at best bid

pub mod error;
pub mod store;

pub use error::{PositionError, PositionResult};
pub use store::{Mismatch, Position, PositionStore, ReconcileConfig};
