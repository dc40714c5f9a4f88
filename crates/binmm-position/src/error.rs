//! Error types for binmm-position.

use thiserror::Error;

use binmm_venue::VenueError;

/// Position store errors.
#[derive(Debug, Error)]
pub enum PositionError {
    /// Authoritative snapshot unavailable; belief is left untouched.
    #[error("Reconciliation failed: {0}")]
    Venue(#[from] VenueError),
}

pub type PositionResult<T> = Result<T, PositionError>;
