//! Order ledger for binmm.
//!
//! Tracks every order believed outstanding and guards submissions:
//! - At most one resting order per (instrument, side)
//! - Exit orders are never overwritten by entry logic
//! - Cancel is confirmed before any replacement is posted
//! - Minimum update interval and a rolling replace budget

pub mod budget;
pub mod error;
pub mod ledger;

pub use budget::ReplaceBudget;
pub use error::{OrderError, OrderResult};
pub use ledger::{
    OrderIntent, OrderLedger, OrderLedgerConfig, OrderMetrics, PlaceOutcome, ThrottleReason,
};
