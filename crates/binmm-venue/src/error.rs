//! Error types for binmm-venue.

use thiserror::Error;

/// Venue call failures.
///
/// All variants are transient from the caller's point of view: the call
/// yields nothing this tick and is retried against fresh state next tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Result type alias for venue operations.
pub type VenueResult<T> = Result<T, VenueError>;
