//! Position store.
//!
//! Belief of shares per instrument. Confirmed fills move it incrementally;
//! reconciliation replaces it wholesale with the venue's holdings. There is no
//! merge: after a reconcile the store says exactly what the venue said.
//!
//! Positions are created on first fill, first reconcile or `track`, and are
//! cleared (not removed) when they return to zero so the instrument stays
//! visible to reconciliation.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use binmm_core::{Fill, InstrumentId, OrderSide, Price, Size};
use binmm_telemetry::Metrics;
use binmm_venue::{DynVenue, VenuePosition};

use crate::error::PositionResult;

// ============================================================================
// Config
// ============================================================================

/// Reconciliation cadence and tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Interval while anything is outstanding or held.
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,
    /// Interval while flat with no orders.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Share differences up to this are not mismatches.
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
}

fn default_active_interval_ms() -> u64 {
    2_000
}

fn default_idle_interval_ms() -> u64 {
    15_000
}

fn default_tolerance() -> Decimal {
    Size::EPSILON.inner()
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            active_interval_ms: default_active_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            tolerance: default_tolerance(),
        }
    }
}

// ============================================================================
// Position
// ============================================================================

/// Belief about one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub instrument: InstrumentId,
    /// Shares held (never negative).
    pub shares: Size,
    /// Average entry price.
    pub avg_entry: Price,
    /// When the current holding started (Unix ms).
    pub first_entry_ms: Option<u64>,
    /// Shares reported by the last reconciliation.
    pub last_auth_shares: Size,
    /// Average price reported by the last reconciliation.
    pub last_auth_price: Price,
    /// Time of the last reconciliation touching this instrument.
    pub last_reconcile_ms: Option<u64>,
    pub best_bid: Price,
    pub best_ask: Price,
}

impl Position {
    fn empty(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            shares: Size::ZERO,
            avg_entry: Price::ZERO,
            first_entry_ms: None,
            last_auth_shares: Size::ZERO,
            last_auth_price: Price::ZERO,
            last_reconcile_ms: None,
            best_bid: Price::ZERO,
            best_ask: Price::ZERO,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.shares.is_flat()
    }

    /// Value at best bid; the ask is never used for valuation.
    #[must_use]
    pub fn mtm(&self) -> Decimal {
        self.shares.notional(self.best_bid)
    }

    /// How far the bid sits below entry, floored at zero.
    #[must_use]
    pub fn adverse_excursion(&self) -> Decimal {
        if !self.is_open() {
            return Decimal::ZERO;
        }
        self.avg_entry.saturating_sub(self.best_bid)
    }

    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.shares.inner() * (self.best_bid.inner() - self.avg_entry.inner())
    }

    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        self.first_entry_ms
            .map(|t| now_ms.saturating_sub(t))
            .unwrap_or(0)
    }

    fn clear(&mut self) {
        self.shares = Size::ZERO;
        self.avg_entry = Price::ZERO;
        self.first_entry_ms = None;
    }
}

/// Belief that disagreed with the venue beyond tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub instrument: InstrumentId,
    pub belief: Size,
    pub authoritative: Size,
    pub at_ms: u64,
}

#[derive(Debug, Default)]
struct ReconcileState {
    last_reconcile_ms: Option<u64>,
    total_mismatches: u64,
    last_mismatches: Vec<Mismatch>,
}

// ============================================================================
// PositionStore
// ============================================================================

/// Shares per instrument, reconciled against the venue.
pub struct PositionStore {
    venue: DynVenue,
    account: String,
    config: ReconcileConfig,
    positions: DashMap<InstrumentId, Position>,
    reconcile: Mutex<ReconcileState>,
}

impl PositionStore {
    pub fn new(venue: DynVenue, account: impl Into<String>, config: ReconcileConfig) -> Self {
        Self {
            venue,
            account: account.into(),
            config,
            positions: DashMap::new(),
            reconcile: Mutex::new(ReconcileState::default()),
        }
    }

    /// Start following an instrument (zero shares until told otherwise).
    pub fn track(&self, instrument: &InstrumentId) {
        self.positions
            .entry(instrument.clone())
            .or_insert_with(|| Position::empty(instrument.clone()));
    }

    /// Stop following an instrument (market window rolled).
    pub fn untrack(&self, instrument: &InstrumentId) {
        self.positions.remove(instrument);
    }

    /// Whether the reconcile timer has elapsed.
    ///
    /// `active` is true while any order is outstanding; any open position
    /// also selects the short interval.
    pub fn needs_reconcile(&self, now_ms: u64, active: bool) -> bool {
        let interval = if active || self.has_inventory() {
            self.config.active_interval_ms
        } else {
            self.config.idle_interval_ms
        };
        match self.reconcile.lock().last_reconcile_ms {
            Some(last) => now_ms.saturating_sub(last) >= interval,
            None => true,
        }
    }

    /// Overwrite belief with the venue's holdings for every tracked instrument.
    ///
    /// Returns the mismatches found. An instrument missing from the snapshot
    /// is held at zero. On venue failure belief is left untouched.
    pub async fn reconcile(&self, now_ms: u64) -> PositionResult<Vec<Mismatch>> {
        let holdings = self.venue.get_positions(&self.account).await?;
        let by_instrument: HashMap<InstrumentId, VenuePosition> = holdings
            .into_iter()
            .map(|p| (p.instrument.clone(), p))
            .collect();

        let mut mismatches = Vec::new();
        for mut entry in self.positions.iter_mut() {
            let pos = entry.value_mut();
            let auth = by_instrument.get(&pos.instrument);
            let auth_shares = auth.map(|p| p.size).unwrap_or(Size::ZERO);

            if pos.shares.abs_diff(auth_shares) > self.config.tolerance {
                warn!(
                    instrument = %pos.instrument,
                    belief = %pos.shares,
                    authoritative = %auth_shares,
                    "Position mismatch, overwriting with venue"
                );
                mismatches.push(Mismatch {
                    instrument: pos.instrument.clone(),
                    belief: pos.shares,
                    authoritative: auth_shares,
                    at_ms: now_ms,
                });
            }

            overwrite(pos, auth, now_ms);
        }

        Metrics::reconciled(mismatches.len());
        Metrics::positions_mtm(self.total_mtm().to_f64().unwrap_or(0.0));

        let mut state = self.reconcile.lock();
        state.last_reconcile_ms = Some(now_ms);
        state.total_mismatches += mismatches.len() as u64;
        state.last_mismatches = mismatches.clone();
        debug!(
            tracked = self.positions.len(),
            mismatches = mismatches.len(),
            "Reconciled positions"
        );
        Ok(mismatches)
    }

    /// Reconcile at startup and report any holdings already present.
    ///
    /// Every nonzero holding is adopted into tracking, whether or not the
    /// instrument belongs to the current market.
    pub async fn startup_inventory(&self, now_ms: u64) -> PositionResult<Vec<Position>> {
        let holdings = self.venue.get_positions(&self.account).await?;
        let live: HashSet<InstrumentId> = holdings
            .iter()
            .filter(|p| !p.size.is_flat())
            .map(|p| p.instrument.clone())
            .collect();
        for instrument in &live {
            self.track(instrument);
        }
        self.reconcile(now_ms).await?;

        let found: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| live.contains(&p.instrument) && p.is_open())
            .map(|p| p.value().clone())
            .collect();
        for pos in &found {
            warn!(
                instrument = %pos.instrument,
                shares = %pos.shares,
                avg_entry = %pos.avg_entry,
                "Inventory present at startup"
            );
        }
        Ok(found)
    }

    /// Incremental belief update from a confirmed fill.
    pub fn apply_fill(&self, fill: &Fill) {
        let mut entry = self
            .positions
            .entry(fill.instrument.clone())
            .or_insert_with(|| Position::empty(fill.instrument.clone()));
        let pos = entry.value_mut();

        match fill.side {
            OrderSide::Buy => {
                if !pos.is_open() {
                    pos.clear();
                    pos.first_entry_ms = Some(fill.timestamp_ms);
                }
                let total = pos.shares + fill.size;
                let cost = pos.shares.notional(pos.avg_entry) + fill.notional();
                pos.avg_entry = Price::new(cost / total.inner());
                pos.shares = total;
            }
            OrderSide::Sell => {
                pos.shares = pos.shares.saturating_sub(fill.size);
                if !pos.is_open() {
                    pos.clear();
                }
            }
        }
        debug!(
            instrument = %fill.instrument,
            side = %fill.side,
            size = %fill.size,
            shares = %pos.shares,
            "Position updated from fill"
        );
    }

    /// Record the latest top of book for valuation.
    pub fn update_mtm(&self, instrument: &InstrumentId, bid: Price, ask: Price) {
        if let Some(mut pos) = self.positions.get_mut(instrument) {
            pos.best_bid = bid;
            pos.best_ask = ask;
        }
    }

    #[must_use]
    pub fn get_shares(&self, instrument: &InstrumentId) -> Size {
        self.positions
            .get(instrument)
            .map(|p| p.shares)
            .unwrap_or(Size::ZERO)
    }

    #[must_use]
    pub fn get_position(&self, instrument: &InstrumentId) -> Option<Position> {
        self.positions.get(instrument).map(|p| p.value().clone())
    }

    #[must_use]
    pub fn adverse_excursion(&self, instrument: &InstrumentId) -> Decimal {
        self.positions
            .get(instrument)
            .map(|p| p.adverse_excursion())
            .unwrap_or(Decimal::ZERO)
    }

    /// Every tracked position, open or not.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.value().clone())
            .collect()
    }

    #[must_use]
    pub fn has_inventory(&self) -> bool {
        self.positions.iter().any(|p| p.is_open())
    }

    #[must_use]
    pub fn total_shares(&self) -> Size {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .fold(Size::ZERO, |acc, p| acc + p.shares)
    }

    #[must_use]
    pub fn total_mtm(&self) -> Decimal {
        self.positions.iter().map(|p| p.mtm()).sum()
    }

    #[must_use]
    pub fn max_adverse_excursion(&self) -> Decimal {
        self.positions
            .iter()
            .map(|p| p.adverse_excursion())
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Age of the oldest open holding.
    #[must_use]
    pub fn inventory_age_ms(&self, now_ms: u64) -> u64 {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.age_ms(now_ms))
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_mismatches(&self) -> u64 {
        self.reconcile.lock().total_mismatches
    }

    #[must_use]
    pub fn last_mismatches(&self) -> Vec<Mismatch> {
        self.reconcile.lock().last_mismatches.clone()
    }

    #[must_use]
    pub fn last_reconcile_ms(&self) -> Option<u64> {
        self.reconcile.lock().last_reconcile_ms
    }
}

fn overwrite(pos: &mut Position, auth: Option<&VenuePosition>, now_ms: u64) {
    let was_open = pos.is_open();
    match auth {
        Some(held) if !held.size.is_flat() => {
            pos.shares = held.size;
            if held.avg_price.is_positive() {
                pos.avg_entry = held.avg_price;
            }
            if !was_open {
                pos.first_entry_ms = Some(now_ms);
                info!(
                    instrument = %pos.instrument,
                    shares = %pos.shares,
                    "Holding discovered by reconciliation"
                );
            }
            pos.last_auth_shares = held.size;
            pos.last_auth_price = held.avg_price;
        }
        _ => {
            pos.clear();
            pos.last_auth_shares = Size::ZERO;
            pos.last_auth_price = Price::ZERO;
        }
    }
    pos.last_reconcile_ms = Some(now_ms);
}
