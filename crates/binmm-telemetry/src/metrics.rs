//! Prometheus metrics for the binmm safety core.
//!
//! Covers:
//! - Fill ingestion (new fills, provenance, violations)
//! - Reconciliation passes and mismatches
//! - Exit supervision (placed, repriced, filled, emergency)
//! - Order churn (replaces, throttles, rejects)
//! - Safety monitor and kill switch
//! - Account figures from the balance gate
//!
//! Instrument ids rotate with every market window, so they are never used
//! as label values.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_int_gauge, Counter, CounterVec, Gauge, Histogram, IntGauge,
};

// ============================================================================
// Fills
// ============================================================================

/// New fills accepted by the fill ledger.
/// Labels: side (BUY/SELL), provenance (verified/unverified)
pub static FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_fills_total",
        "New deduplicated fills",
        &["side", "provenance"]
    )
    .unwrap()
});

/// Fill ledger violations.
/// Labels: kind (venue_error/malformed/sell_without_entry/oversell/unverified)
pub static FILL_VIOLATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_fill_violations_total",
        "Fill ledger violations",
        &["kind"]
    )
    .unwrap()
});

/// Realized PnL from fills (USDC).
pub static REALIZED_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("binmm_realized_pnl_usdc", "Realized PnL from fills").unwrap()
});

// ============================================================================
// Reconciliation
// ============================================================================

/// Reconciliation passes completed.
pub static RECONCILE_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("binmm_reconcile_total", "Reconciliation passes").unwrap()
});

/// Belief vs authoritative share mismatches.
pub static RECONCILE_MISMATCH_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "binmm_reconcile_mismatch_total",
        "Reconciliation mismatches beyond tolerance"
    )
    .unwrap()
});

/// Mark-to-market value of all positions at best bid (USDC).
pub static POSITIONS_MTM: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("binmm_positions_mtm_usdc", "Positions valued at best bid").unwrap()
});

// ============================================================================
// Exits
// ============================================================================

/// Exit supervisor actions.
/// Labels: action (placed/repriced/filled/failed/cleared), mode
pub static EXIT_ACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_exit_actions_total",
        "Exit supervisor actions",
        &["action", "mode"]
    )
    .unwrap()
});

/// Instruments that entered emergency mode.
pub static EMERGENCY_EXITS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("binmm_emergency_exits_total", "Emergency exit entries").unwrap()
});

/// Exit rejections caused by balance/allowance errors.
pub static EXIT_BALANCE_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "binmm_exit_balance_errors_total",
        "Exit orders rejected for balance or allowance"
    )
    .unwrap()
});

/// Exit records currently live.
pub static ACTIVE_EXITS: Lazy<IntGauge> =
    Lazy::new(|| register_int_gauge!("binmm_active_exits", "Live exit records").unwrap());

/// Instruments currently in emergency mode.
pub static IN_EMERGENCY: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("binmm_in_emergency", "Instruments in emergency exit mode").unwrap()
});

// ============================================================================
// Orders
// ============================================================================

/// Order ledger outcomes.
/// Labels: outcome (placed/replaced/unchanged/throttled/blocked/rejected/cancel_failed)
pub static ORDER_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_order_outcomes_total",
        "Order ledger place_or_replace outcomes",
        &["outcome", "role"]
    )
    .unwrap()
});

/// Orders cancelled (confirmed or locally marked).
pub static ORDER_CANCELS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("binmm_order_cancels_total", "Orders cancelled").unwrap()
});

// ============================================================================
// Safety and balance
// ============================================================================

/// Safety violations observed by the monitor.
/// Labels: kind (inventory_without_exit/reconcile_mismatch)
pub static SAFETY_VIOLATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_safety_violations_total",
        "Safety violations",
        &["kind"]
    )
    .unwrap()
});

/// Kill switch state (1 = tripped).
pub static KILL_SWITCH: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("binmm_kill_switch", "Kill switch state (1=tripped)").unwrap()
});

/// Spendable cash from the last balance snapshot.
pub static SPENDABLE_USDC: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("binmm_spendable_usdc", "Spendable USDC").unwrap()
});

/// Equity estimate (observability only).
pub static EQUITY_USDC: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("binmm_equity_usdc", "Cash plus positions").unwrap());

/// Balance gate decisions.
/// Labels: decision (accepted/adjusted/rejected)
pub static BUY_GATE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "binmm_buy_gate_total",
        "Balance gate decisions",
        &["decision"]
    )
    .unwrap()
});

/// Control loop tick duration.
pub static TICK_DURATION_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "binmm_tick_duration_ms",
        "Control loop tick duration in milliseconds",
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a new fill.
    pub fn fill(side: &str, verified: bool) {
        let provenance = if verified { "verified" } else { "unverified" };
        FILLS_TOTAL.with_label_values(&[side, provenance]).inc();
    }

    /// Record a fill ledger violation.
    pub fn fill_violation(kind: &str) {
        FILL_VIOLATIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn realized_pnl(pnl: f64) {
        REALIZED_PNL.set(pnl);
    }

    /// Record a completed reconciliation pass.
    pub fn reconciled(mismatches: usize) {
        RECONCILE_TOTAL.inc();
        RECONCILE_MISMATCH_TOTAL.inc_by(mismatches as f64);
    }

    pub fn positions_mtm(value: f64) {
        POSITIONS_MTM.set(value);
    }

    /// Record an exit supervisor action.
    pub fn exit_action(action: &str, mode: &str) {
        EXIT_ACTIONS_TOTAL.with_label_values(&[action, mode]).inc();
    }

    pub fn emergency_entered() {
        EMERGENCY_EXITS_TOTAL.inc();
    }

    pub fn exit_balance_error() {
        EXIT_BALANCE_ERRORS_TOTAL.inc();
    }

    pub fn exits_live(active: usize, in_emergency: usize) {
        ACTIVE_EXITS.set(active as i64);
        IN_EMERGENCY.set(in_emergency as i64);
    }

    /// Record an order ledger outcome.
    pub fn order_outcome(outcome: &str, role: &str) {
        ORDER_OUTCOMES_TOTAL.with_label_values(&[outcome, role]).inc();
    }

    pub fn order_cancelled(count: usize) {
        ORDER_CANCELS_TOTAL.inc_by(count as f64);
    }

    /// Record a safety violation.
    pub fn safety_violation(kind: &str) {
        SAFETY_VIOLATIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn kill_switch_tripped() {
        KILL_SWITCH.set(1.0);
    }

    /// Record account figures from a balance snapshot.
    pub fn account(spendable: f64, equity: f64) {
        SPENDABLE_USDC.set(spendable);
        EQUITY_USDC.set(equity);
    }

    pub fn buy_gate(decision: &str) {
        BUY_GATE_TOTAL.with_label_values(&[decision]).inc();
    }

    pub fn tick_duration(ms: f64) {
        TICK_DURATION_MS.observe(ms);
    }
}
