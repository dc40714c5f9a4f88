//! Fill ledger for the binmm safety core.
//!
//! Turns polled venue trade history into a deduplicated, ordered stream of
//! confirmed fills:
//! - `FillLedger`: polling, dedupe, running per-instrument position from fills
//! - `dedupe`: stable dedupe keys and provenance tagging
//! - `RoundTrip`, `FillSummary`: realized PnL bookkeeping

pub mod dedupe;
pub mod error;
pub mod ledger;

pub use dedupe::{dedupe_key, MIN_TX_REF_LEN};
pub use error::{FillError, FillResult, Violation, ViolationKind};
pub use ledger::{FillLedger, FillLedgerConfig, FillSummary, RoundTrip, TrackedPosition};
