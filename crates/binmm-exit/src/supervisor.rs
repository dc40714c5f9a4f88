//! Exit supervisor.
//!
//! Runs every tick, kill switch or not. For each tracked instrument:
//! - shares and no exit: place one (already escalated if the excursion
//!   demands it)
//! - shares and an exit: escalate and reprice on the mode's cadence
//! - no shares: cancel the exit and forget the record
//!
//! Every submission goes through the order ledger, so an exit reprice is
//! always cancel, confirm, replace.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use binmm_core::{BookTop, Fill, InstrumentId, OrderId, OrderSide, Price, Size};
use binmm_orders::{OrderIntent, OrderLedger, PlaceOutcome};
use binmm_position::{Position, PositionStore};
use binmm_telemetry::{Event, Metrics};

use crate::error::ExitResult;
use crate::mode::{DustMode, EmergencyState, ExitConfig, ExitMode};

// ============================================================================
// Records and events
// ============================================================================

/// Exit state for one instrument. Written only by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub instrument: InstrumentId,
    pub shares: Size,
    pub price: Price,
    pub order_id: Option<OrderId>,
    pub mode: ExitMode,
    pub created_at_ms: u64,
    pub last_reprice_ms: Option<u64>,
    pub reprice_failures: u32,
}

impl ExitRecord {
    fn new(instrument: InstrumentId, shares: Size, mode: ExitMode, now_ms: u64) -> Self {
        Self {
            instrument,
            shares,
            price: Price::ZERO,
            order_id: None,
            mode,
            created_at_ms: now_ms,
            last_reprice_ms: None,
            reprice_failures: 0,
        }
    }

    #[inline]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    fn since_reprice_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_reprice_ms.unwrap_or(self.created_at_ms))
    }
}

/// What the supervisor did for an instrument this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitAction {
    Placed,
    Repriced,
    Failed,
    BalanceError,
    Filled,
    Cleared,
    NoBook,
    DustHeld,
    Exhausted,
}

impl ExitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Repriced => "repriced",
            Self::Failed => "failed",
            Self::BalanceError => "balance_error",
            Self::Filled => "filled",
            Self::Cleared => "cleared",
            Self::NoBook => "no_book",
            Self::DustHeld => "dust_held",
            Self::Exhausted => "exhausted",
        }
    }
}

/// A supervisor action, ready for the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub instrument: InstrumentId,
    pub action: ExitAction,
    pub mode: ExitMode,
    pub price: Option<Price>,
    pub size: Option<Size>,
    pub reason: Option<String>,
}

impl ExitEvent {
    fn new(instrument: &InstrumentId, action: ExitAction, mode: ExitMode) -> Self {
        Self {
            instrument: instrument.clone(),
            action,
            mode,
            price: None,
            size: None,
            reason: None,
        }
    }

    fn quoted(mut self, price: Price, size: Size) -> Self {
        self.price = Some(price);
        self.size = Some(size);
        self
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn to_event(&self) -> Event {
        Event::Exit {
            instrument: self.instrument.clone(),
            action: self.action.as_str().to_string(),
            mode: self.mode.as_str().to_string(),
            price: self.price,
            size: self.size,
            reason: self.reason.clone(),
        }
    }
}

/// Supervisor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExitMetrics {
    pub exits_placed: u64,
    pub exits_repriced: u64,
    pub exits_filled: u64,
    pub emergency_exits: u64,
    pub balance_errors: u64,
    pub active_exits: usize,
    pub in_emergency: usize,
}

#[derive(Debug, Default)]
struct SupervisorState {
    records: HashMap<InstrumentId, ExitRecord>,
    emergencies: HashMap<InstrumentId, EmergencyState>,
    dust_held: HashSet<InstrumentId>,
    metrics: ExitMetrics,
}

/// Submission worked out under the lock, executed without it.
struct Step {
    intent: OrderIntent,
    mode: ExitMode,
    had_order: bool,
}

// ============================================================================
// ExitSupervisor
// ============================================================================

/// Keeps every open position protected by an exit order.
pub struct ExitSupervisor {
    config: ExitConfig,
    orders: Arc<OrderLedger>,
    positions: Arc<PositionStore>,
    state: Mutex<SupervisorState>,
}

impl ExitSupervisor {
    pub fn new(
        config: ExitConfig,
        orders: Arc<OrderLedger>,
        positions: Arc<PositionStore>,
    ) -> Self {
        Self {
            config,
            orders,
            positions,
            state: Mutex::new(SupervisorState::default()),
        }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// One supervision pass over every tracked position.
    ///
    /// `books` holds the latest top of book per instrument; instruments
    /// without an entry are treated as having no valid book.
    pub async fn tick(
        &self,
        books: &HashMap<InstrumentId, BookTop>,
        now_ms: u64,
    ) -> Vec<ExitEvent> {
        let mut events = Vec::new();
        let snapshot = self.positions.snapshot();
        let held: HashSet<&InstrumentId> = snapshot
            .iter()
            .filter(|p| p.is_open())
            .map(|p| &p.instrument)
            .collect();

        // Flat (or no longer tracked) instruments lose their exit.
        let stale: Vec<InstrumentId> = {
            let state = self.state.lock();
            state
                .records
                .keys()
                .chain(state.dust_held.iter())
                .filter(|i| !held.contains(i))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        };
        for instrument in stale {
            events.push(self.retire(&instrument, now_ms).await);
        }

        for pos in snapshot.iter().filter(|p| p.is_open()) {
            let book = books
                .get(&pos.instrument)
                .copied()
                .unwrap_or_else(BookTop::empty);
            if let Some(event) = self.ensure_exit(pos, &book, now_ms).await {
                events.push(event);
            }
        }

        let state = self.state.lock();
        Metrics::exits_live(state.records.len(), state.emergencies.len());
        events
    }

    async fn ensure_exit(
        &self,
        pos: &Position,
        book: &BookTop,
        now_ms: u64,
    ) -> Option<ExitEvent> {
        let instrument = &pos.instrument;

        let dust = pos.shares.inner() < self.config.min_order_size;
        if dust && self.config.dust_mode == DustMode::Hold {
            let mut state = self.state.lock();
            if state.dust_held.insert(instrument.clone()) {
                info!(
                    instrument = %instrument,
                    shares = %pos.shares,
                    min_order_size = %self.config.min_order_size,
                    "Dust position held to settlement"
                );
                let mode = state
                    .records
                    .get(instrument)
                    .map(|r| r.mode)
                    .unwrap_or(ExitMode::Normal);
                return Some(
                    ExitEvent::new(instrument, ExitAction::DustHeld, mode)
                        .quoted(Price::ZERO, pos.shares)
                        .because("below minimum order size"),
                );
            }
            return None;
        }

        if !book.has_valid_bid() {
            warn!(instrument = %instrument, bid = %book.best_bid, "No valid book, cannot exit");
            let mode = self
                .state
                .lock()
                .records
                .get(instrument)
                .map(|r| r.mode)
                .unwrap_or(ExitMode::Normal);
            return Some(
                ExitEvent::new(instrument, ExitAction::NoBook, mode).because("best bid at floor"),
            );
        }

        let step = match self.plan(pos, book, now_ms) {
            Ok(Some(step)) => step,
            Ok(None) => return None,
            Err(event) => return Some(event),
        };
        Some(self.submit(pos, step, now_ms).await)
    }

    /// Decide whether to submit this tick. `Err` carries an event without a
    /// submission.
    fn plan(
        &self,
        pos: &Position,
        book: &BookTop,
        now_ms: u64,
    ) -> Result<Option<Step>, ExitEvent> {
        let instrument = &pos.instrument;
        let adverse = pos.avg_entry.saturating_sub(book.best_bid);
        let has_order = self.orders.has_exit_order(instrument);

        let mut state = self.state.lock();
        state.dust_held.remove(instrument);

        let (escalated, mode, size_changed, since_reprice, last_price) = {
            let record = state.records.entry(instrument.clone()).or_insert_with(|| {
                let mode = self.config.target_mode(adverse, 0);
                ExitRecord::new(instrument.clone(), pos.shares, mode, now_ms)
            });
            let target = self.config.target_mode(adverse, record.age_ms(now_ms));
            let escalated = target > record.mode;
            if escalated {
                info!(
                    instrument = %instrument,
                    from = %record.mode,
                    to = %target,
                    adverse = %adverse,
                    age_ms = record.age_ms(now_ms),
                    "Exit escalated"
                );
                record.mode = target;
            }
            let size_changed = record.shares != pos.shares;
            record.shares = pos.shares;
            (
                escalated,
                record.mode,
                size_changed,
                record.since_reprice_ms(now_ms),
                record.price,
            )
        };

        if mode == ExitMode::Emergency && !state.emergencies.contains_key(instrument) {
            warn!(
                instrument = %instrument,
                entry = %pos.avg_entry,
                bid = %book.best_bid,
                adverse = %adverse,
                "Entering emergency exit"
            );
            state.emergencies.insert(
                instrument.clone(),
                EmergencyState::new(
                    now_ms,
                    self.config.max_emergency_attempts,
                    self.config.reprice_emergency_ms,
                ),
            );
            state.metrics.emergency_exits += 1;
            Metrics::emergency_entered();
        }

        if let Some(emergency) = state.emergencies.get_mut(instrument) {
            if emergency.exhausted() {
                // Exhaustion freezes repricing; it never leaves the holding bare.
                if has_order {
                    if emergency.reported {
                        return Ok(None);
                    }
                    emergency.reported = true;
                    error!(
                        instrument = %instrument,
                        attempts = emergency.attempts,
                        shares = %pos.shares,
                        "Emergency exit attempts exhausted, manual intervention required"
                    );
                    return Err(ExitEvent::new(instrument, ExitAction::Exhausted, mode)
                        .because("manual intervention required"));
                }
                if !emergency.should_act(now_ms) {
                    return Ok(None);
                }
                warn!(
                    instrument = %instrument,
                    shares = %pos.shares,
                    "Exit gone after emergency exhaustion, re-placing at the bid"
                );
            } else if has_order && !emergency.should_act(now_ms) {
                return Ok(None);
            }
        }

        let price = self.config.exit_price(mode, book, pos.avg_entry);
        if has_order && !escalated && !size_changed {
            if since_reprice < self.config.reprice_interval_ms(mode) {
                return Ok(None);
            }
            if price.abs_diff(last_price) * Decimal::TWO < self.config.tick_size {
                return Ok(None);
            }
        }

        let mut intent = OrderIntent::exit_sell(instrument.clone(), price, pos.shares)
            .with_holdings(pos.shares);
        if self.config.crosses(mode) {
            intent = intent.taker();
        }
        Ok(Some(Step {
            intent,
            mode,
            had_order: has_order,
        }))
    }

    async fn submit(&self, pos: &Position, step: Step, now_ms: u64) -> ExitEvent {
        let instrument = &pos.instrument;
        let Step {
            intent,
            mode,
            had_order,
        } = step;
        let outcome = self.orders.place_or_replace(&intent, now_ms).await;

        if outcome.is_balance_error() {
            let refreshed = self.refresh_after_balance_error(instrument, now_ms).await;
            let mut state = self.state.lock();
            state.metrics.balance_errors += 1;
            Metrics::exit_balance_error();
            if let Some(record) = state.records.get_mut(instrument) {
                record.reprice_failures += 1;
                if let Some(actual) = refreshed {
                    if actual < record.shares {
                        warn!(
                            instrument = %instrument,
                            from = %record.shares,
                            to = %actual,
                            "Clamping exit size to venue holdings"
                        );
                    }
                    record.shares = actual;
                }
            }
            if let Some(emergency) = state.emergencies.get_mut(instrument) {
                emergency.record_action(now_ms);
            }
            return ExitEvent::new(instrument, ExitAction::BalanceError, mode)
                .quoted(intent.price, intent.size)
                .because(outcome_reason(&outcome));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let placed = outcome.order_id().cloned();

        let Some(record) = state.records.get_mut(instrument) else {
            return ExitEvent::new(instrument, ExitAction::Failed, mode)
                .because("exit record vanished");
        };

        match placed {
            Some(id) => {
                record.order_id = Some(id);
                record.price = intent.price;
                record.last_reprice_ms = Some(now_ms);
                record.reprice_failures = 0;
                let action = if had_order {
                    state.metrics.exits_repriced += 1;
                    ExitAction::Repriced
                } else {
                    state.metrics.exits_placed += 1;
                    ExitAction::Placed
                };
                if let Some(emergency) = state.emergencies.get_mut(instrument) {
                    emergency.record_action(now_ms);
                }
                Metrics::exit_action(action.as_str(), mode.as_str());
                info!(
                    instrument = %instrument,
                    mode = %mode,
                    price = %intent.price,
                    size = %intent.size,
                    post_only = intent.post_only,
                    action = action.as_str(),
                    "Exit resting"
                );
                ExitEvent::new(instrument, action, mode).quoted(intent.price, intent.size)
            }
            None => {
                record.reprice_failures += 1;
                let failures = record.reprice_failures;
                if let Some(emergency) = state.emergencies.get_mut(instrument) {
                    if !matches!(outcome, PlaceOutcome::Throttled(_)) {
                        emergency.record_action(now_ms);
                    }
                }
                Metrics::exit_action(ExitAction::Failed.as_str(), mode.as_str());
                warn!(
                    instrument = %instrument,
                    mode = %mode,
                    price = %intent.price,
                    size = %intent.size,
                    failures,
                    outcome = outcome.as_str(),
                    "Exit not placed"
                );
                ExitEvent::new(instrument, ExitAction::Failed, mode)
                    .quoted(intent.price, intent.size)
                    .because(outcome_reason(&outcome))
            }
        }
    }

    /// Force a reconcile after the venue refused an exit for balance or
    /// allowance, and return the authoritative shares.
    async fn refresh_after_balance_error(
        &self,
        instrument: &InstrumentId,
        now_ms: u64,
    ) -> Option<Size> {
        match self.positions.reconcile(now_ms).await {
            Ok(_) => Some(self.positions.get_shares(instrument)),
            Err(e) => {
                warn!(instrument = %instrument, error = %e, "Refresh after balance error failed");
                None
            }
        }
    }

    async fn retire(&self, instrument: &InstrumentId, now_ms: u64) -> ExitEvent {
        let mode = self
            .state
            .lock()
            .records
            .get(instrument)
            .map(|r| r.mode)
            .unwrap_or(ExitMode::Normal);
        let mut event = ExitEvent::new(instrument, ExitAction::Cleared, mode);
        if let Err(e) = self.cancel_exit(instrument, now_ms).await {
            warn!(instrument = %instrument, error = %e, "Exit cancel on flat failed");
            event = event.because(e.to_string());
        }
        self.clear_instrument(instrument);
        Metrics::exit_action(ExitAction::Cleared.as_str(), mode.as_str());
        info!(instrument = %instrument, "Position flat, exit cleared");
        event
    }

    /// Cancel the resting exit. Only called once the store says flat.
    pub async fn cancel_exit(&self, instrument: &InstrumentId, now_ms: u64) -> ExitResult<()> {
        if self.orders.has_exit_order(instrument) {
            self.orders.cancel(instrument, OrderSide::Sell, now_ms).await?;
        }
        Ok(())
    }

    /// Account for a confirmed fill against an exit.
    pub fn on_fill(&self, fill: &Fill) -> Option<ExitEvent> {
        if fill.side != OrderSide::Sell {
            return None;
        }
        let mut state = self.state.lock();
        let record = state.records.get_mut(&fill.instrument)?;
        record.shares = record.shares.saturating_sub(fill.size);
        let mode = record.mode;
        if !record.shares.is_flat() {
            debug!(
                instrument = %fill.instrument,
                remaining = %record.shares,
                "Exit partially filled"
            );
            return None;
        }

        state.records.remove(&fill.instrument);
        state.emergencies.remove(&fill.instrument);
        state.metrics.exits_filled += 1;
        Metrics::exit_action(ExitAction::Filled.as_str(), mode.as_str());
        info!(instrument = %fill.instrument, mode = %mode, "Exit filled");
        Some(
            ExitEvent::new(&fill.instrument, ExitAction::Filled, mode)
                .quoted(fill.price, fill.size),
        )
    }

    /// Forget all exit state for an instrument.
    pub fn clear_instrument(&self, instrument: &InstrumentId) {
        let mut state = self.state.lock();
        state.records.remove(instrument);
        state.emergencies.remove(instrument);
        state.dust_held.remove(instrument);
    }

    pub fn exit_record(&self, instrument: &InstrumentId) -> Option<ExitRecord> {
        self.state.lock().records.get(instrument).cloned()
    }

    /// A record exists and the ledger shows its order resting.
    pub fn has_exit(&self, instrument: &InstrumentId) -> bool {
        let recorded = self.state.lock().records.contains_key(instrument);
        recorded && self.orders.has_exit_order(instrument)
    }

    /// Position is protected: an exit is resting or the holding is dust.
    pub fn is_protected(&self, instrument: &InstrumentId) -> bool {
        if self.orders.has_exit_order(instrument) {
            return true;
        }
        self.state.lock().dust_held.contains(instrument)
    }

    pub fn emergency_state(&self, instrument: &InstrumentId) -> Option<EmergencyState> {
        self.state.lock().emergencies.get(instrument).cloned()
    }

    pub fn emergency_count(&self) -> usize {
        self.state.lock().emergencies.len()
    }

    pub fn metrics(&self) -> ExitMetrics {
        let state = self.state.lock();
        ExitMetrics {
            active_exits: state.records.len(),
            in_emergency: state.emergencies.len(),
            ..state.metrics.clone()
        }
    }
}

fn outcome_reason(outcome: &PlaceOutcome) -> String {
    match outcome {
        PlaceOutcome::Rejected { reason, .. } | PlaceOutcome::InvariantViolation(reason) => {
            reason.clone()
        }
        other => other.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binmm_core::{PostOrderResult, Provenance};
    use binmm_orders::OrderLedgerConfig;
    use binmm_position::ReconcileConfig;
    use binmm_venue::MockVenue;
    use rust_decimal_macros::dec;

    struct Harness {
        venue: Arc<MockVenue>,
        orders: Arc<OrderLedger>,
        positions: Arc<PositionStore>,
        exits: ExitSupervisor,
    }

    fn tok() -> InstrumentId {
        InstrumentId::from("tok-yes")
    }

    fn harness(config: ExitConfig) -> Harness {
        let venue = Arc::new(MockVenue::new());
        let orders = Arc::new(OrderLedger::new(venue.clone(), OrderLedgerConfig::default()));
        let positions = Arc::new(PositionStore::new(
            venue.clone(),
            "0xacct",
            ReconcileConfig::default(),
        ));
        positions.track(&tok());
        let exits = ExitSupervisor::new(config, orders.clone(), positions.clone());
        Harness {
            venue,
            orders,
            positions,
            exits,
        }
    }

    fn books(bid: Decimal, ask: Decimal) -> HashMap<InstrumentId, BookTop> {
        HashMap::from([(tok(), BookTop::new(Price::new(bid), Price::new(ask)))])
    }

    fn fill(side: OrderSide, size: Decimal, price: Decimal) -> Fill {
        Fill {
            dedupe_key: format!("k-{side}-{size}-{price}"),
            order_id: None,
            instrument: tok(),
            side,
            price: Price::new(price),
            size: Size::new(size),
            timestamp_ms: 0,
            tx_ref: Some("0x0123456789abcdef".to_string()),
            is_maker: true,
            fee: Decimal::ZERO,
            rebate: Decimal::ZERO,
            provenance: Provenance::Verified,
        }
    }

    async fn hold(h: &Harness, shares: Decimal, entry: Decimal) {
        h.venue.set_position(&tok(), shares, entry);
        h.positions.reconcile(0).await.unwrap();
    }

    #[tokio::test]
    async fn test_places_normal_exit_below_ask() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;

        let events = h.exits.tick(&books(dec!(0.49), dec!(0.53)), 1_000).await;
        assert_eq!(events[0].action, ExitAction::Placed);
        assert_eq!(events[0].mode, ExitMode::Normal);

        let resting = h.venue.resting_for(&tok(), OrderSide::Sell);
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].price.inner(), dec!(0.52));
        assert_eq!(resting[0].size.inner(), dec!(10));
        assert!(h.exits.has_exit(&tok()));
    }

    #[tokio::test]
    async fn test_adverse_move_starts_in_emergency_at_bid() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;

        let events = h.exits.tick(&books(dec!(0.46), dec!(0.48)), 1_000).await;
        assert_eq!(events[0].action, ExitAction::Placed);
        assert_eq!(events[0].mode, ExitMode::Emergency);

        let posts = h.venue.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].price.inner(), dec!(0.46));
        assert!(posts[0].post_only);
        assert_eq!(h.exits.emergency_count(), 1);
    }

    #[tokio::test]
    async fn test_emergency_taker_crosses() {
        let config = ExitConfig {
            emergency_taker: true,
            ..ExitConfig::default()
        };
        let h = harness(config);
        hold(&h, dec!(10), dec!(0.50)).await;

        h.exits.tick(&books(dec!(0.46), dec!(0.48)), 1_000).await;
        assert!(!h.venue.posts()[0].post_only);
    }

    #[tokio::test]
    async fn test_escalates_and_never_deescalates() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.49), dec!(0.53)), 0).await;

        // Bid drops two cents: aggressive, repriced immediately toward entry.
        let events = h.exits.tick(&books(dec!(0.48), dec!(0.53)), 100).await;
        assert_eq!(events[0].action, ExitAction::Repriced);
        assert_eq!(events[0].mode, ExitMode::Aggressive);
        assert_eq!(events[0].price, Some(Price::new(dec!(0.50))));

        // Bid recovers: mode stays aggressive.
        h.exits.tick(&books(dec!(0.50), dec!(0.53)), 1_000).await;
        assert_eq!(h.exits.exit_record(&tok()).unwrap().mode, ExitMode::Aggressive);
    }

    #[tokio::test]
    async fn test_age_escalation() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.50), dec!(0.53)), 0).await;

        h.exits.tick(&books(dec!(0.50), dec!(0.53)), 20_000).await;
        assert_eq!(h.exits.exit_record(&tok()).unwrap().mode, ExitMode::Aggressive);

        let events = h.exits.tick(&books(dec!(0.50), dec!(0.53)), 40_000).await;
        assert_eq!(events[0].mode, ExitMode::Emergency);
        assert_eq!(events[0].price, Some(Price::new(dec!(0.50))));
    }

    #[tokio::test]
    async fn test_reprice_throttle_and_half_tick_skip() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.49), dec!(0.53)), 0).await;

        // Ask moves, but inside the 500ms normal cadence.
        assert!(h.exits.tick(&books(dec!(0.49), dec!(0.55)), 200).await.is_empty());
        // Same quote after the cadence: nothing to do.
        assert!(h.exits.tick(&books(dec!(0.49), dec!(0.53)), 1_000).await.is_empty());
        // Real move after the cadence.
        let events = h.exits.tick(&books(dec!(0.49), dec!(0.55)), 1_500).await;
        assert_eq!(events[0].action, ExitAction::Repriced);
        assert_eq!(h.venue.resting_for(&tok(), OrderSide::Sell).len(), 1);
    }

    #[tokio::test]
    async fn test_reconciled_size_change_resizes_exit() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.49), dec!(0.53)), 0).await;

        h.venue.set_position(&tok(), dec!(15), dec!(0.50));
        let mismatches = h.positions.reconcile(100).await.unwrap();
        assert_eq!(mismatches.len(), 1);

        let events = h.exits.tick(&books(dec!(0.49), dec!(0.53)), 200).await;
        assert_eq!(events[0].action, ExitAction::Repriced);
        let resting = h.venue.resting_for(&tok(), OrderSide::Sell);
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].size.inner(), dec!(15));
    }

    #[tokio::test]
    async fn test_exactly_one_exit_after_many_ticks() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        let bids = [dec!(0.49), dec!(0.48), dec!(0.47), dec!(0.49), dec!(0.45), dec!(0.44)];
        for (i, bid) in bids.iter().enumerate() {
            h.exits
                .tick(&books(*bid, *bid + dec!(0.04)), i as u64 * 2_000)
                .await;
            assert_eq!(h.venue.resting_for(&tok(), OrderSide::Sell).len(), 1);
            assert_eq!(h.orders.active_orders().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_balance_error_reconciles_and_clamps() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.49), dec!(0.53)), 0).await;

        // Venue now holds less than believed and refuses the resize.
        h.positions.apply_fill(&fill(OrderSide::Buy, dec!(5), dec!(0.50)));
        h.venue.set_position(&tok(), dec!(8), dec!(0.50));
        h.venue
            .script_post(PostOrderResult::rejected("not enough balance / allowance"));
        let calls_before = h.venue.position_calls();

        let events = h.exits.tick(&books(dec!(0.49), dec!(0.53)), 1_000).await;
        assert_eq!(events[0].action, ExitAction::BalanceError);
        assert_eq!(h.venue.position_calls(), calls_before + 1);
        assert_eq!(h.positions.get_shares(&tok()), Size::new(dec!(8)));

        let record = h.exits.exit_record(&tok()).unwrap();
        assert_eq!(record.shares, Size::new(dec!(8)));
        assert_eq!(record.reprice_failures, 1);
        assert_eq!(h.exits.metrics().balance_errors, 1);

        // Next attempt is sized from the refreshed holdings.
        let events = h.exits.tick(&books(dec!(0.49), dec!(0.53)), 2_000).await;
        assert_eq!(events[0].action, ExitAction::Placed);
        assert_eq!(events[0].size, Some(Size::new(dec!(8))));
    }

    #[tokio::test]
    async fn test_emergency_exhaustion_stops_repricing() {
        let config = ExitConfig {
            max_emergency_attempts: 2,
            ..ExitConfig::default()
        };
        let h = harness(config);
        hold(&h, dec!(10), dec!(0.50)).await;

        h.exits.tick(&books(dec!(0.46), dec!(0.48)), 0).await;
        h.exits.tick(&books(dec!(0.45), dec!(0.48)), 2_000).await;
        let events = h.exits.tick(&books(dec!(0.44), dec!(0.48)), 4_000).await;
        assert_eq!(events[0].action, ExitAction::Exhausted);

        let posts = h.venue.posts().len();
        assert!(h.exits.tick(&books(dec!(0.43), dec!(0.48)), 6_000).await.is_empty());
        assert_eq!(h.venue.posts().len(), posts);
        // The last exit still rests.
        assert!(h.orders.has_exit_order(&tok()));
    }

    #[tokio::test]
    async fn test_exhausted_emergency_still_replaces_a_lost_exit() {
        let config = ExitConfig {
            max_emergency_attempts: 2,
            ..ExitConfig::default()
        };
        let h = harness(config);
        hold(&h, dec!(10), dec!(0.50)).await;

        h.exits.tick(&books(dec!(0.46), dec!(0.48)), 0).await;
        h.exits.tick(&books(dec!(0.45), dec!(0.48)), 2_000).await;
        let events = h.exits.tick(&books(dec!(0.44), dec!(0.48)), 4_000).await;
        assert_eq!(events[0].action, ExitAction::Exhausted);

        // The venue drops the last exit.
        let id = h.orders.exit_order(&tok()).unwrap().id;
        h.venue.expire_resting(&id);
        h.orders.reconcile_orders(5_000).await.unwrap();
        assert!(!h.orders.has_exit_order(&tok()));

        let events = h.exits.tick(&books(dec!(0.44), dec!(0.48)), 6_000).await;
        assert_eq!(events[0].action, ExitAction::Placed);
        assert_eq!(events[0].mode, ExitMode::Emergency);
        let resting = h.venue.resting_for(&tok(), OrderSide::Sell);
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].price.inner(), dec!(0.44));
        assert!(h.exits.is_protected(&tok()));

        // Resting again: still no repricing.
        let posts = h.venue.posts().len();
        for now in [8_000, 20_000, 60_000] {
            h.exits.tick(&books(dec!(0.40), dec!(0.48)), now).await;
            assert!(h.orders.has_exit_order(&tok()));
        }
        assert_eq!(h.venue.posts().len(), posts);
    }

    #[tokio::test]
    async fn test_flat_position_clears_exit() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.46), dec!(0.48)), 0).await;

        h.venue.set_position(&tok(), dec!(0), dec!(0));
        h.positions.reconcile(1_000).await.unwrap();
        let events = h.exits.tick(&books(dec!(0.46), dec!(0.48)), 1_100).await;

        assert_eq!(events[0].action, ExitAction::Cleared);
        assert!(h.exits.exit_record(&tok()).is_none());
        assert_eq!(h.exits.emergency_count(), 0);
        assert!(h.venue.resting().is_empty());
    }

    #[tokio::test]
    async fn test_no_valid_book_skips() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;

        let events = h.exits.tick(&books(dec!(0.01), dec!(0.99)), 0).await;
        assert_eq!(events[0].action, ExitAction::NoBook);
        assert!(h.venue.posts().is_empty());
    }

    #[tokio::test]
    async fn test_dust_is_held_once() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(3), dec!(0.50)).await;

        let events = h.exits.tick(&books(dec!(0.49), dec!(0.53)), 0).await;
        assert_eq!(events[0].action, ExitAction::DustHeld);
        assert!(h.exits.tick(&books(dec!(0.49), dec!(0.53)), 1_000).await.is_empty());
        assert!(h.venue.posts().is_empty());
        assert!(h.exits.is_protected(&tok()));
    }

    #[tokio::test]
    async fn test_exit_fill_clears_record() {
        let h = harness(ExitConfig::default());
        hold(&h, dec!(10), dec!(0.50)).await;
        h.exits.tick(&books(dec!(0.46), dec!(0.48)), 0).await;

        assert!(h.exits.on_fill(&fill(OrderSide::Sell, dec!(4), dec!(0.46))).is_none());
        let event = h.exits.on_fill(&fill(OrderSide::Sell, dec!(6), dec!(0.46))).unwrap();
        assert_eq!(event.action, ExitAction::Filled);
        assert_eq!(h.exits.emergency_count(), 0);
        assert_eq!(h.exits.metrics().exits_filled, 1);
    }
}
