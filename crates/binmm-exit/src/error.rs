//! Error types for binmm-exit.

use thiserror::Error;

use binmm_orders::OrderError;
use binmm_position::PositionError;

/// Exit supervisor errors.
#[derive(Debug, Error)]
pub enum ExitError {
    #[error("Position refresh failed: {0}")]
    Position(#[from] PositionError),

    #[error("Exit cancel failed: {0}")]
    Order(#[from] OrderError),
}

pub type ExitResult<T> = Result<T, ExitError>;
