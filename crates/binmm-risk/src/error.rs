//! Error types for binmm-risk.

use std::path::PathBuf;

use thiserror::Error;

use binmm_orders::OrderError;
use binmm_position::PositionError;
use binmm_venue::VenueError;

/// Risk and safety errors.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Position error: {0}")]
    Position(#[from] PositionError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Instance lease held by pid {pid} ({path})")]
    LeaseHeld { path: PathBuf, pid: u32 },

    #[error("Lease I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lease encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Startup refused: {0}")]
    Startup(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
