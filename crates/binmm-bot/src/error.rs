//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Venue error: {0}")]
    Venue(#[from] binmm_venue::VenueError),

    #[error("Risk error: {0}")]
    Risk(#[from] binmm_risk::RiskError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] binmm_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
