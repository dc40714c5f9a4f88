//! Periodic metrics snapshot for operators.
//!
//! Reads the prometheus statics back into one plain struct so the control
//! loop can log a compact summary every N ticks.

use prometheus::core::Collector;
use serde::Serialize;
use tracing::info;

use crate::metrics::{
    ACTIVE_EXITS, EMERGENCY_EXITS_TOTAL, EXIT_ACTIONS_TOTAL, EXIT_BALANCE_ERRORS_TOTAL,
    FILLS_TOTAL, FILL_VIOLATIONS_TOTAL, IN_EMERGENCY, KILL_SWITCH, ORDER_OUTCOMES_TOTAL,
    RECONCILE_MISMATCH_TOTAL, RECONCILE_TOTAL, SAFETY_VIOLATIONS_TOTAL, SPENDABLE_USDC,
};

/// Point-in-time copy of the headline counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub fills: u64,
    pub fill_violations: u64,
    pub reconciles: u64,
    pub reconcile_mismatches: u64,
    pub exits_placed: u64,
    pub exits_repriced: u64,
    pub exits_filled: u64,
    pub emergency_exits: u64,
    pub exit_balance_errors: u64,
    pub active_exits: i64,
    pub in_emergency: i64,
    pub replaces: u64,
    pub throttled: u64,
    pub safety_violations: u64,
    pub kill_switch: bool,
    pub spendable_usdc: f64,
}

impl MetricsSnapshot {
    /// Read the current metric values.
    pub fn capture() -> Self {
        Self {
            fills: sum_where(&*FILLS_TOTAL, None),
            fill_violations: sum_where(&*FILL_VIOLATIONS_TOTAL, None),
            reconciles: RECONCILE_TOTAL.get() as u64,
            reconcile_mismatches: RECONCILE_MISMATCH_TOTAL.get() as u64,
            exits_placed: sum_where(&*EXIT_ACTIONS_TOTAL, Some(("action", "placed"))),
            exits_repriced: sum_where(&*EXIT_ACTIONS_TOTAL, Some(("action", "repriced"))),
            exits_filled: sum_where(&*EXIT_ACTIONS_TOTAL, Some(("action", "filled"))),
            emergency_exits: EMERGENCY_EXITS_TOTAL.get() as u64,
            exit_balance_errors: EXIT_BALANCE_ERRORS_TOTAL.get() as u64,
            active_exits: ACTIVE_EXITS.get(),
            in_emergency: IN_EMERGENCY.get(),
            replaces: sum_where(&*ORDER_OUTCOMES_TOTAL, Some(("outcome", "replaced"))),
            throttled: sum_where(&*ORDER_OUTCOMES_TOTAL, Some(("outcome", "throttled"))),
            safety_violations: sum_where(&*SAFETY_VIOLATIONS_TOTAL, None),
            kill_switch: KILL_SWITCH.get() >= 1.0,
            spendable_usdc: SPENDABLE_USDC.get(),
        }
    }

    /// Emit the snapshot as one structured log line.
    pub fn log(&self) {
        info!(
            fills = self.fills,
            fill_violations = self.fill_violations,
            reconciles = self.reconciles,
            reconcile_mismatches = self.reconcile_mismatches,
            exits_placed = self.exits_placed,
            exits_repriced = self.exits_repriced,
            exits_filled = self.exits_filled,
            emergency_exits = self.emergency_exits,
            exit_balance_errors = self.exit_balance_errors,
            active_exits = self.active_exits,
            in_emergency = self.in_emergency,
            replaces = self.replaces,
            throttled = self.throttled,
            safety_violations = self.safety_violations,
            kill_switch = self.kill_switch,
            spendable_usdc = self.spendable_usdc,
            "Metrics snapshot"
        );
    }
}

/// Sum a counter vector across label sets, optionally filtered by one label.
fn sum_where(counter: &dyn Collector, filter: Option<(&str, &str)>) -> u64 {
    let mut total = 0.0;
    for mf in counter.collect() {
        for m in mf.get_metric() {
            let keep = match filter {
                None => true,
                Some((name, value)) => m
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == name && pair.get_value() == value),
            };
            if keep {
                total += m.get_counter().get_value();
            }
        }
    }
    total as u64
}
