//! Safety monitor.
//!
//! Two signals feed the kill switch:
//! - an instrument holding shares without a resting exit (or a dust hold)
//!   for longer than `inventory_without_exit_ms`
//! - `mismatch_threshold` consecutive reconcile passes that found a
//!   mismatch or failed outright; a clean pass resets the count
//! - in live mode, a fill history the fill ledger no longer vouches for;
//!   this one blocks entries as soon as it is observed
//!
//! Tripping only halts entries. Exits keep running.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use binmm_core::InstrumentId;
use binmm_telemetry::Metrics;

use crate::kill_switch::{KillReason, KillSwitch};

/// Safety thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_inventory_without_exit_ms")]
    pub inventory_without_exit_ms: u64,
    #[serde(default = "default_mismatch_threshold")]
    pub mismatch_threshold: u32,
}

fn default_inventory_without_exit_ms() -> u64 {
    10_000
}

fn default_mismatch_threshold() -> u32 {
    2
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            inventory_without_exit_ms: default_inventory_without_exit_ms(),
            mismatch_threshold: default_mismatch_threshold(),
        }
    }
}

/// A non-fatal danger signal, reported when first observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyViolation {
    pub kind: &'static str,
    pub instrument: Option<InstrumentId>,
    pub detail: String,
}

#[derive(Debug, Default)]
struct SafetyState {
    /// Onset of "shares but no protection" per instrument.
    unprotected_since: HashMap<InstrumentId, u64>,
    mismatch_cycles: u32,
    /// Sticky for the session, like the ledger flag it mirrors.
    unsafe_fills: Option<String>,
}

/// Combines danger signals into the kill switch.
pub struct SafetyMonitor {
    config: SafetyConfig,
    kill: Arc<KillSwitch>,
    state: Mutex<SafetyState>,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig, kill: Arc<KillSwitch>) -> Self {
        Self {
            config,
            kill,
            state: Mutex::new(SafetyState::default()),
        }
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitch> {
        &self.kill
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_tripped()
    }

    /// Record whether an instrument holds shares and whether they are protected.
    ///
    /// Returns a violation when an unprotected holding is first seen.
    pub fn observe_inventory(
        &self,
        instrument: &InstrumentId,
        has_inventory: bool,
        protected: bool,
        now_ms: u64,
    ) -> Option<SafetyViolation> {
        let mut state = self.state.lock();
        if has_inventory && !protected {
            if state.unprotected_since.contains_key(instrument) {
                return None;
            }
            state.unprotected_since.insert(instrument.clone(), now_ms);
            drop(state);

            Metrics::safety_violation("unprotected_inventory");
            warn!(instrument = %instrument, "Inventory without exit order");
            Some(SafetyViolation {
                kind: "unprotected_inventory",
                instrument: Some(instrument.clone()),
                detail: format!("inventory {instrument} without exit order"),
            })
        } else {
            if state.unprotected_since.remove(instrument).is_some() {
                info!(instrument = %instrument, has_inventory, "Inventory protection restored");
            }
            None
        }
    }

    /// Record the result of a reconcile pass.
    pub fn observe_reconcile(&self, mismatches: usize) -> Option<SafetyViolation> {
        if mismatches == 0 {
            self.state.lock().mismatch_cycles = 0;
            return None;
        }
        let cycles = self.bump_mismatch();
        Metrics::safety_violation("reconcile_mismatch");
        Some(SafetyViolation {
            kind: "reconcile_mismatch",
            instrument: None,
            detail: format!("{mismatches} mismatches, {cycles} consecutive cycles"),
        })
    }

    /// A reconcile pass that could not complete counts as a mismatch cycle.
    pub fn observe_reconcile_error(&self, error: &str) -> SafetyViolation {
        let cycles = self.bump_mismatch();
        Metrics::safety_violation("reconcile_error");
        SafetyViolation {
            kind: "reconcile_error",
            instrument: None,
            detail: format!("{error} ({cycles} consecutive cycles)"),
        }
    }

    /// Record the fill ledger's live-readiness. Only called in live mode.
    ///
    /// Returns a violation the first time the history turns unsafe.
    pub fn observe_fill_safety(
        &self,
        safe_for_live: bool,
        detail: &str,
    ) -> Option<SafetyViolation> {
        let mut state = self.state.lock();
        if safe_for_live || state.unsafe_fills.is_some() {
            return None;
        }
        state.unsafe_fills = Some(detail.to_string());
        drop(state);

        Metrics::safety_violation("unsafe_fills");
        warn!(detail, "Fill history unsafe for live, entries blocked");
        Some(SafetyViolation {
            kind: "unsafe_fills",
            instrument: None,
            detail: detail.to_string(),
        })
    }

    /// False once killed or once the fill history was observed unsafe.
    pub fn entries_allowed(&self) -> bool {
        !self.is_killed() && self.state.lock().unsafe_fills.is_none()
    }

    fn bump_mismatch(&self) -> u32 {
        let mut state = self.state.lock();
        state.mismatch_cycles += 1;
        state.mismatch_cycles
    }

    /// Check kill conditions and trip the switch if one holds.
    ///
    /// Returns the reason only on the call that tripped it.
    pub fn evaluate(&self, now_ms: u64) -> Option<KillReason> {
        if self.kill.is_tripped() {
            return None;
        }
        let reason = self.kill_condition(now_ms)?;
        self.kill.trip(reason.clone(), now_ms).then_some(reason)
    }

    fn kill_condition(&self, now_ms: u64) -> Option<KillReason> {
        let state = self.state.lock();

        let mut unprotected: Vec<_> = state.unprotected_since.iter().collect();
        unprotected.sort();
        for (instrument, since) in unprotected {
            let elapsed_ms = now_ms.saturating_sub(*since);
            if elapsed_ms > self.config.inventory_without_exit_ms {
                return Some(KillReason::InventoryWithoutExit {
                    instrument: instrument.clone(),
                    elapsed_ms,
                });
            }
        }

        if state.mismatch_cycles >= self.config.mismatch_threshold {
            return Some(KillReason::ReconcileMismatch {
                cycles: state.mismatch_cycles,
            });
        }

        state
            .unsafe_fills
            .as_ref()
            .map(|detail| KillReason::UnsafeFills {
                detail: detail.clone(),
            })
    }

    /// Instruments currently unprotected, with onset time.
    pub fn unprotected(&self) -> Vec<(InstrumentId, u64)> {
        let mut out: Vec<_> = self
            .state
            .lock()
            .unprotected_since
            .iter()
            .map(|(i, t)| (i.clone(), *t))
            .collect();
        out.sort();
        out
    }

    pub fn mismatch_cycles(&self) -> u32 {
        self.state.lock().mismatch_cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tok() -> InstrumentId {
        InstrumentId::from("tok-yes")
    }

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new(SafetyConfig::default(), Arc::new(KillSwitch::new()))
    }

    #[test]
    fn test_unprotected_inventory_trips_after_threshold() {
        let m = monitor();
        assert!(m.observe_inventory(&tok(), true, false, 0).is_some());
        // Onset reported once.
        assert!(m.observe_inventory(&tok(), true, false, 5_000).is_none());

        assert_eq!(m.evaluate(10_000), None);
        let reason = m.evaluate(10_001).unwrap();
        assert_eq!(reason.kind(), "inventory_without_exit");
        assert!(m.is_killed());

        // Monotonic: no second trip, still killed.
        assert_eq!(m.evaluate(20_000), None);
        assert!(m.is_killed());
    }

    #[test]
    fn test_protection_clears_onset() {
        let m = monitor();
        m.observe_inventory(&tok(), true, false, 0);
        m.observe_inventory(&tok(), true, true, 4_000);
        assert!(m.unprotected().is_empty());
        assert_eq!(m.evaluate(30_000), None);
        assert!(!m.is_killed());

        // Flat also clears.
        m.observe_inventory(&tok(), true, false, 31_000);
        m.observe_inventory(&tok(), false, false, 32_000);
        assert!(m.unprotected().is_empty());
    }

    #[test]
    fn test_flat_instrument_clears_stale_onset() {
        let m = monitor();
        m.observe_inventory(&tok(), true, false, 0);
        assert_eq!(m.unprotected().len(), 1);

        m.observe_inventory(&tok(), false, false, 3_000);
        assert!(m.unprotected().is_empty());
        assert_eq!(m.evaluate(11_000), None);
        assert!(!m.is_killed());
    }

    #[test]
    fn test_unsafe_fills_block_entries_then_trip() {
        let m = monitor();
        assert!(m.observe_fill_safety(true, "").is_none());
        assert!(m.entries_allowed());

        let v = m.observe_fill_safety(false, "1 unverified fills").unwrap();
        assert_eq!(v.kind, "unsafe_fills");
        assert!(!m.entries_allowed());
        assert!(!m.is_killed());
        // Reported once; a later "safe" reading does not clear it.
        assert!(m.observe_fill_safety(false, "2 unverified fills").is_none());
        assert!(m.observe_fill_safety(true, "").is_none());
        assert!(!m.entries_allowed());

        let reason = m.evaluate(1_000).unwrap();
        assert_eq!(
            reason,
            KillReason::UnsafeFills {
                detail: "1 unverified fills".to_string()
            }
        );
        assert!(m.is_killed());
    }

    #[test]
    fn test_consecutive_mismatches_trip() {
        let m = monitor();
        assert!(m.observe_reconcile(1).is_some());
        assert!(m.observe_reconcile(0).is_none());
        assert_eq!(m.mismatch_cycles(), 0);

        m.observe_reconcile(1);
        assert_eq!(m.evaluate(0), None);
        m.observe_reconcile_error("HTTP 503");
        assert_eq!(m.evaluate(0), Some(KillReason::ReconcileMismatch { cycles: 2 }));
    }
}
