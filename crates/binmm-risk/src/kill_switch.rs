//! Kill switch.
//!
//! Once tripped it stays tripped until the process exits. There is no reset:
//! resuming requires a fresh start.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, warn};

use binmm_core::InstrumentId;
use binmm_telemetry::Metrics;

// ============================================================================
// KillReason
// ============================================================================

/// Why the kill switch tripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReason {
    /// Shares held with no resting exit for too long.
    InventoryWithoutExit {
        instrument: InstrumentId,
        elapsed_ms: u64,
    },
    /// Consecutive reconcile passes that found a mismatch or failed.
    ReconcileMismatch { cycles: u32 },
    /// Live mode with fills whose provenance can no longer be trusted.
    UnsafeFills { detail: String },
    /// Operator request (signal or console).
    Manual { message: String },
}

impl KillReason {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InventoryWithoutExit { .. } => "inventory_without_exit",
            Self::ReconcileMismatch { .. } => "reconcile_mismatch",
            Self::UnsafeFills { .. } => "unsafe_fills",
            Self::Manual { .. } => "manual",
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InventoryWithoutExit {
                instrument,
                elapsed_ms,
            } => write!(
                f,
                "Inventory {instrument} without exit for {}s",
                elapsed_ms / 1_000
            ),
            Self::ReconcileMismatch { cycles } => {
                write!(f, "Reconciliation mismatch for {cycles} cycles")
            }
            Self::UnsafeFills { detail } => write!(f, "Fill history unsafe for live: {detail}"),
            Self::Manual { message } => write!(f, "Manual: {message}"),
        }
    }
}

// ============================================================================
// KillSwitch
// ============================================================================

/// Monotonic halt of new entries.
///
/// Shared as `Arc<KillSwitch>`; exit management ignores it.
pub struct KillSwitch {
    tripped: AtomicBool,
    tripped_at: AtomicU64,
    reason: RwLock<Option<KillReason>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
            tripped_at: AtomicU64::new(0),
            reason: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Trip the switch. Returns true only for the call that tripped it;
    /// later calls keep the first reason.
    pub fn trip(&self, reason: KillReason, now_ms: u64) -> bool {
        if self
            .tripped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.tripped_at.store(now_ms, Ordering::SeqCst);
            *self.reason.write() = Some(reason.clone());
            Metrics::kill_switch_tripped();
            error!(reason = %reason, kind = reason.kind(), "KILL SWITCH TRIGGERED");
            true
        } else {
            warn!(new_reason = %reason, "Kill switch already tripped, ignoring");
            false
        }
    }

    #[must_use]
    pub fn tripped_at(&self) -> Option<u64> {
        self.is_tripped()
            .then(|| self.tripped_at.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn reason(&self) -> Option<KillReason> {
        self.reason.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_is_monotonic_and_keeps_first_reason() {
        let ks = KillSwitch::new();
        assert!(!ks.is_tripped());
        assert_eq!(ks.reason(), None);
        assert_eq!(ks.tripped_at(), None);

        assert!(ks.trip(KillReason::ReconcileMismatch { cycles: 2 }, 1_000));
        assert!(!ks.trip(
            KillReason::Manual {
                message: "second".to_string()
            },
            2_000
        ));

        assert!(ks.is_tripped());
        assert_eq!(ks.tripped_at(), Some(1_000));
        assert_eq!(ks.reason(), Some(KillReason::ReconcileMismatch { cycles: 2 }));
    }

    #[test]
    fn test_reason_display() {
        let r = KillReason::InventoryWithoutExit {
            instrument: InstrumentId::from("tok-yes"),
            elapsed_ms: 12_400,
        };
        assert_eq!(r.to_string(), "Inventory tok-yes without exit for 12s");
        assert_eq!(r.kind(), "inventory_without_exit");

        let r = KillReason::UnsafeFills {
            detail: "1 unverified fills".to_string(),
        };
        assert_eq!(r.to_string(), "Fill history unsafe for live: 1 unverified fills");
        assert_eq!(r.kind(), "unsafe_fills");
    }
}
