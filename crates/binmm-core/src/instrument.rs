//! Instrument identification.
//!
//! An instrument is one outcome token of a binary market. The venue identifies
//! it with an opaque string; exactly two are live at a time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Opaque instrument (outcome token) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create from any string-like value.
    ///
    /// Returns an error for empty identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidInstrument("empty instrument id".to_string()));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines (last 8 characters).
    pub fn short(&self) -> &str {
        let len = self.0.len();
        if len <= 8 {
            return &self.0;
        }
        self.0.get(len - 8..).unwrap_or(&self.0)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The two paired outcome instruments of the live market window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPair {
    pub yes: InstrumentId,
    pub no: InstrumentId,
    /// Settlement deadline (Unix ms).
    pub deadline_ms: u64,
}

impl MarketPair {
    pub fn new(yes: InstrumentId, no: InstrumentId, deadline_ms: u64) -> Self {
        Self {
            yes,
            no,
            deadline_ms,
        }
    }

    /// Both instruments, yes first.
    pub fn instruments(&self) -> [InstrumentId; 2] {
        [self.yes.clone(), self.no.clone()]
    }

    pub fn contains(&self, instrument: &InstrumentId) -> bool {
        &self.yes == instrument || &self.no == instrument
    }

    /// Milliseconds until settlement (0 once passed).
    pub fn time_to_deadline_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }
}
