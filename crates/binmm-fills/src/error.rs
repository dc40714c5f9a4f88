//! Error and violation types for binmm-fills.

use serde::Serialize;
use thiserror::Error;

use binmm_venue::VenueError;

/// Fill ledger errors.
#[derive(Debug, Error)]
pub enum FillError {
    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Malformed trade: {0}")]
    Malformed(String),
}

pub type FillResult<T> = Result<T, FillError>;

/// Categories of logged ledger violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Trade history could not be fetched or decoded (transient).
    VenueError,
    /// Trade record with unusable side/price/size.
    Malformed,
    /// Fill accepted without a reliable transaction reference.
    UnverifiedProvenance,
    /// Sell with no tracked entry to close.
    SellWithoutEntry,
    /// Sell larger than the tracked entry.
    Oversell,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VenueError => "venue_error",
            Self::Malformed => "malformed",
            Self::UnverifiedProvenance => "unverified",
            Self::SellWithoutEntry => "sell_without_entry",
            Self::Oversell => "oversell",
        }
    }

    /// Provenance violations make the ledger unsafe for real capital;
    /// transient venue errors do not.
    pub fn affects_provenance(&self) -> bool {
        !matches!(self, Self::VenueError)
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logged violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub detail: String,
    pub at_ms: u64,
}
