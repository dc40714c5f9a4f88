//! Error types for binmm-orders.

use thiserror::Error;

use binmm_core::OrderId;
use binmm_venue::VenueError;

/// Order ledger errors.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    /// The venue answered but did not confirm the cancel.
    #[error("Cancel not confirmed for order {0}")]
    CancelRefused(OrderId),
}

pub type OrderResult<T> = Result<T, OrderError>;
