//! Order ledger.
//!
//! One slot per (instrument, side). A slot holds the latest order submitted
//! for that key; only an active order occupies it. Replacing an order is
//! always cancel, confirm, then post: if the cancel is not confirmed, nothing
//! new is posted, so two sells for one instrument are never both believed
//! resting.
//!
//! The state lock is released around every venue call. A key being worked on
//! is marked in flight so a concurrent caller sees `Throttled` instead of
//! racing the cancel.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use binmm_core::{
    InstrumentId, ManagedOrder, OrderId, OrderRole, OrderSide, OrderStatus, PostOrderRequest,
    Price, Size,
};
use binmm_telemetry::Metrics;
use binmm_venue::{DynVenue, OpenOrder};

use crate::budget::ReplaceBudget;
use crate::error::{OrderError, OrderResult};

type SlotKey = (InstrumentId, OrderSide);

// ============================================================================
// Config
// ============================================================================

/// Order ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLedgerConfig {
    /// Price grid.
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// Minimum time between entry submissions on one (instrument, side).
    #[serde(default = "default_min_update_interval_ms")]
    pub min_update_interval_ms: u64,
    /// Rolling replace budget per minute.
    #[serde(default = "default_max_replaces_per_minute")]
    pub max_replaces_per_minute: u32,
}

fn default_tick_size() -> Decimal {
    Price::TICK.inner()
}

fn default_min_update_interval_ms() -> u64 {
    3_000
}

fn default_max_replaces_per_minute() -> u32 {
    20
}

impl Default for OrderLedgerConfig {
    fn default() -> Self {
        Self {
            tick_size: default_tick_size(),
            min_update_interval_ms: default_min_update_interval_ms(),
            max_replaces_per_minute: default_max_replaces_per_minute(),
        }
    }
}

// ============================================================================
// Intent / outcome
// ============================================================================

/// What the caller wants resting on one (instrument, side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderIntent {
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub role: OrderRole,
    pub post_only: bool,
    /// Authoritative holdings; sells above this are refused locally.
    pub holdings: Option<Size>,
}

impl OrderIntent {
    pub fn new(
        instrument: InstrumentId,
        side: OrderSide,
        price: Price,
        size: Size,
        role: OrderRole,
    ) -> Self {
        Self {
            instrument,
            side,
            price,
            size,
            role,
            post_only: true,
            holdings: None,
        }
    }

    pub fn entry_buy(instrument: InstrumentId, price: Price, size: Size) -> Self {
        Self::new(instrument, OrderSide::Buy, price, size, OrderRole::Entry)
    }

    pub fn exit_sell(instrument: InstrumentId, price: Price, size: Size) -> Self {
        Self::new(instrument, OrderSide::Sell, price, size, OrderRole::Exit)
    }

    /// Allow the order to take liquidity.
    pub fn taker(mut self) -> Self {
        self.post_only = false;
        self
    }

    pub fn with_holdings(mut self, holdings: Size) -> Self {
        self.holdings = Some(holdings);
        self
    }

    fn key(&self) -> SlotKey {
        (self.instrument.clone(), self.side)
    }

    fn to_request(&self) -> PostOrderRequest {
        let request = PostOrderRequest::new(
            self.instrument.clone(),
            self.side,
            self.price,
            self.size,
        );
        if self.post_only {
            request
        } else {
            request.taker()
        }
    }
}

/// Why a submission was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleReason {
    MinInterval,
    ReplaceBudget,
    InFlight,
}

/// Result of `place_or_replace`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// New order resting, nothing was replaced.
    Placed(OrderId),
    /// Previous order cancelled (confirmed) and the new one resting.
    Replaced { cancelled: OrderId, placed: OrderId },
    /// Existing order already matches within a tick at the same size.
    Unchanged(OrderId),
    /// Deferred; the existing order (if any) is untouched.
    Throttled(ThrottleReason),
    /// An exit order owns this slot.
    Blocked(OrderId),
    /// Cancel of the existing order was not confirmed; nothing posted.
    CancelFailed(OrderId),
    /// Venue refused the new order.
    Rejected {
        reason: String,
        would_cross: bool,
        balance_error: bool,
    },
    /// Refused locally before any venue call.
    InvariantViolation(String),
}

impl PlaceOutcome {
    /// An order matching the intent is resting.
    pub fn is_resting(&self) -> bool {
        matches!(
            self,
            Self::Placed(_) | Self::Replaced { .. } | Self::Unchanged(_)
        )
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        match self {
            Self::Placed(id) | Self::Unchanged(id) => Some(id),
            Self::Replaced { placed, .. } => Some(placed),
            _ => None,
        }
    }

    pub fn is_balance_error(&self) -> bool {
        matches!(self, Self::Rejected { balance_error: true, .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Placed(_) => "placed",
            Self::Replaced { .. } => "replaced",
            Self::Unchanged(_) => "unchanged",
            Self::Throttled(_) => "throttled",
            Self::Blocked(_) => "blocked",
            Self::CancelFailed(_) => "cancel_failed",
            Self::Rejected { .. } => "rejected",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}

/// Ledger counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderMetrics {
    pub active: usize,
    pub total_orders: u64,
    pub cancels: u64,
    pub replaces: u64,
    pub replace_rejects: u64,
    pub throttled: u64,
    pub locked_usdc: Decimal,
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Default)]
struct LedgerState {
    slots: HashMap<SlotKey, ManagedOrder>,
    last_submit_ms: HashMap<SlotKey, u64>,
    in_flight: HashSet<SlotKey>,
    total_orders: u64,
    cancels: u64,
    replaces: u64,
    replace_rejects: u64,
    throttled: u64,
}

impl LedgerState {
    fn active(&self, key: &SlotKey) -> Option<&ManagedOrder> {
        self.slots.get(key).filter(|o| o.is_active())
    }

    fn mark_cancelled(&mut self, key: &SlotKey, id: &OrderId, now_ms: u64) {
        if let Some(order) = self.slots.get_mut(key) {
            if &order.id == id && order.is_active() {
                order.status = OrderStatus::Cancelled;
                order.updated_at_ms = now_ms;
            }
        }
    }

    fn find_mut(&mut self, id: &OrderId) -> Option<&mut ManagedOrder> {
        self.slots.values_mut().find(|o| &o.id == id)
    }
}

/// Clears the in-flight mark when the submission finishes or is dropped.
struct InFlight<'a> {
    state: &'a Mutex<LedgerState>,
    key: SlotKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}

enum Plan {
    Done(PlaceOutcome),
    Place,
    Replace(OrderId),
}

// ============================================================================
// OrderLedger
// ============================================================================

/// Tracks outstanding orders and gates every submission.
pub struct OrderLedger {
    venue: DynVenue,
    config: OrderLedgerConfig,
    budget: ReplaceBudget,
    state: Mutex<LedgerState>,
}

impl OrderLedger {
    pub fn new(venue: DynVenue, config: OrderLedgerConfig) -> Self {
        let budget = ReplaceBudget::per_minute(config.max_replaces_per_minute);
        Self {
            venue,
            config,
            budget,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Make the intent the one resting order for its (instrument, side).
    ///
    /// Entry intents never touch an exit order. Entries respect the minimum
    /// update interval; exits pace themselves. Every replace draws from the
    /// rolling budget before anything is cancelled; a cancel the venue does
    /// not confirm gives the slot back.
    pub async fn place_or_replace(&self, intent: &OrderIntent, now_ms: u64) -> PlaceOutcome {
        let key = intent.key();

        let plan = {
            let mut state = self.state.lock();
            let plan = self.plan(&mut state, intent, &key, now_ms);
            if !matches!(plan, Plan::Done(_)) {
                state.in_flight.insert(key.clone());
            }
            plan
        };
        let replacing = match plan {
            Plan::Done(outcome) => return self.finish(intent, outcome),
            Plan::Place => None,
            Plan::Replace(id) => Some(id),
        };

        let _guard = InFlight {
            state: &self.state,
            key: key.clone(),
        };

        if let Some(old) = &replacing {
            let confirmed = match self.venue.cancel_order(old).await {
                Ok(confirmed) => confirmed,
                Err(e) => {
                    warn!(order_id = %old, error = %e, "Cancel before replace failed");
                    false
                }
            };
            if !confirmed {
                self.budget.release(now_ms);
                return self.finish(intent, PlaceOutcome::CancelFailed(old.clone()));
            }
            let mut state = self.state.lock();
            state.mark_cancelled(&key, old, now_ms);
            state.cancels += 1;
            state.replaces += 1;
            Metrics::order_cancelled(1);
        }

        let result = self.venue.post_order(&intent.to_request()).await;
        let mut state = self.state.lock();
        state.last_submit_ms.insert(key.clone(), now_ms);

        let outcome = match result {
            Ok(res) if res.success => {
                let id = res
                    .order_id
                    .unwrap_or_else(|| OrderId::synthetic("unacked"));
                let order = ManagedOrder::new(
                    id.clone(),
                    intent.instrument.clone(),
                    intent.side,
                    intent.price,
                    intent.size,
                    intent.role,
                    now_ms,
                );
                state.slots.insert(key, order);
                state.total_orders += 1;
                match replacing {
                    Some(cancelled) => PlaceOutcome::Replaced {
                        cancelled,
                        placed: id,
                    },
                    None => PlaceOutcome::Placed(id),
                }
            }
            Ok(res) => {
                if res.would_cross {
                    state.replace_rejects += 1;
                }
                PlaceOutcome::Rejected {
                    balance_error: res.is_balance_error(),
                    would_cross: res.would_cross,
                    reason: res.error.unwrap_or_else(|| "rejected".to_string()),
                }
            }
            Err(e) => PlaceOutcome::Rejected {
                reason: e.to_string(),
                would_cross: false,
                balance_error: false,
            },
        };
        drop(state);
        self.finish(intent, outcome)
    }

    fn plan(
        &self,
        state: &mut LedgerState,
        intent: &OrderIntent,
        key: &SlotKey,
        now_ms: u64,
    ) -> Plan {
        if !intent.size.is_positive() || !intent.price.is_positive() {
            return Plan::Done(PlaceOutcome::InvariantViolation(format!(
                "non-positive order {} @ {}",
                intent.size, intent.price
            )));
        }
        if intent.side == OrderSide::Sell {
            if let Some(held) = intent.holdings {
                if intent.size > held && intent.size.abs_diff(held) > Size::EPSILON.inner() {
                    return Plan::Done(PlaceOutcome::InvariantViolation(format!(
                        "sell {} exceeds holdings {}",
                        intent.size, held
                    )));
                }
            }
        }
        if state.in_flight.contains(key) {
            state.throttled += 1;
            return Plan::Done(PlaceOutcome::Throttled(ThrottleReason::InFlight));
        }

        let existing = state
            .active(key)
            .map(|o| (o.id.clone(), o.role, o.price, o.size_remaining()));

        if let Some((id, role, price, remaining)) = &existing {
            if *role == OrderRole::Exit && intent.role == OrderRole::Entry {
                return Plan::Done(PlaceOutcome::Blocked(id.clone()));
            }
            if price.abs_diff(intent.price) < self.config.tick_size && *remaining == intent.size {
                return Plan::Done(PlaceOutcome::Unchanged(id.clone()));
            }
        }

        if intent.role == OrderRole::Entry {
            if let Some(last) = state.last_submit_ms.get(key) {
                if now_ms.saturating_sub(*last) < self.config.min_update_interval_ms {
                    state.throttled += 1;
                    return Plan::Done(PlaceOutcome::Throttled(ThrottleReason::MinInterval));
                }
            }
        }

        match existing {
            Some((id, ..)) => {
                if !self.budget.try_acquire(now_ms) {
                    state.throttled += 1;
                    return Plan::Done(PlaceOutcome::Throttled(ThrottleReason::ReplaceBudget));
                }
                Plan::Replace(id)
            }
            None => Plan::Place,
        }
    }

    fn finish(&self, intent: &OrderIntent, outcome: PlaceOutcome) -> PlaceOutcome {
        Metrics::order_outcome(outcome.as_str(), &intent.role.to_string());
        match &outcome {
            PlaceOutcome::Placed(id) | PlaceOutcome::Replaced { placed: id, .. } => info!(
                instrument = %intent.instrument,
                side = %intent.side,
                role = %intent.role,
                price = %intent.price,
                size = %intent.size,
                order_id = %id,
                outcome = outcome.as_str(),
                "Order resting"
            ),
            PlaceOutcome::Unchanged(_) | PlaceOutcome::Throttled(_) => debug!(
                instrument = %intent.instrument,
                side = %intent.side,
                outcome = outcome.as_str(),
                "Order not submitted"
            ),
            PlaceOutcome::Rejected { reason, .. } => warn!(
                instrument = %intent.instrument,
                side = %intent.side,
                role = %intent.role,
                price = %intent.price,
                size = %intent.size,
                reason = %reason,
                "Order rejected"
            ),
            PlaceOutcome::InvariantViolation(reason) => warn!(
                instrument = %intent.instrument,
                side = %intent.side,
                price = %intent.price,
                size = %intent.size,
                reason = %reason,
                "Order refused locally"
            ),
            PlaceOutcome::Blocked(id) | PlaceOutcome::CancelFailed(id) => warn!(
                instrument = %intent.instrument,
                side = %intent.side,
                order_id = %id,
                outcome = outcome.as_str(),
                "Order not replaced"
            ),
        }
        outcome
    }

    /// Cancel the active order on (instrument, side), if any.
    pub async fn cancel(
        &self,
        instrument: &InstrumentId,
        side: OrderSide,
        now_ms: u64,
    ) -> OrderResult<()> {
        let key = (instrument.clone(), side);
        let Some(id) = self.state.lock().active(&key).map(|o| o.id.clone()) else {
            return Ok(());
        };

        if !self.venue.cancel_order(&id).await? {
            return Err(OrderError::CancelRefused(id));
        }
        let mut state = self.state.lock();
        state.mark_cancelled(&key, &id, now_ms);
        state.cancels += 1;
        Metrics::order_cancelled(1);
        debug!(instrument = %instrument, side = %side, order_id = %id, "Order cancelled");
        Ok(())
    }

    /// Cancel everything on the venue and mark every tracked order
    /// cancelled locally, whatever the venue answered.
    pub async fn cancel_all(&self, now_ms: u64) -> bool {
        let confirmed = match self.venue.cancel_all().await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                warn!(error = %e, "Venue cancel-all failed");
                false
            }
        };

        let mut state = self.state.lock();
        let mut count = 0;
        for order in state.slots.values_mut().filter(|o| o.is_active()) {
            order.status = OrderStatus::Cancelled;
            order.updated_at_ms = now_ms;
            count += 1;
        }
        state.cancels += count as u64;
        Metrics::order_cancelled(count);
        warn!(count, confirmed, "Cancelled all orders");
        confirmed
    }

    /// Cancel every active order of one role. Orders are marked cancelled
    /// locally even when the venue does not confirm; a later venue sync
    /// brings back any that are still resting.
    ///
    /// Returns true when every cancel was confirmed.
    pub async fn cancel_role(&self, role: OrderRole, now_ms: u64) -> bool {
        let targets: Vec<(SlotKey, OrderId)> = self
            .state
            .lock()
            .slots
            .iter()
            .filter(|(_, o)| o.is_active() && o.role == role)
            .map(|(k, o)| (k.clone(), o.id.clone()))
            .collect();

        let mut all_confirmed = true;
        for (key, id) in &targets {
            let confirmed = matches!(self.venue.cancel_order(id).await, Ok(true));
            if !confirmed {
                warn!(order_id = %id, role = %role, "Cancel not confirmed, marking locally");
                all_confirmed = false;
            }
            self.state.lock().mark_cancelled(key, id, now_ms);
        }

        if !targets.is_empty() {
            self.state.lock().cancels += targets.len() as u64;
            Metrics::order_cancelled(targets.len());
            info!(role = %role, count = targets.len(), "Cancelled orders by role");
        }
        all_confirmed
    }

    /// Record a matched size for an order.
    pub fn update_from_fill(&self, order_id: &OrderId, size_matched: Size, now_ms: u64) {
        let mut state = self.state.lock();
        if let Some(order) = state.find_mut(order_id) {
            order.size_matched = size_matched;
            order.updated_at_ms = now_ms;
            if order.size_remaining().is_zero() {
                order.status = OrderStatus::Filled;
            }
        }
    }

    /// Add one confirmed fill to an order's matched size.
    pub fn record_fill(&self, order_id: &OrderId, size: Size, now_ms: u64) {
        let mut state = self.state.lock();
        if let Some(order) = state.find_mut(order_id) {
            order.size_matched = (order.size_matched + size).min(order.size);
            order.updated_at_ms = now_ms;
            if order.size_remaining().is_zero() {
                order.status = OrderStatus::Filled;
            }
        }
    }

    /// Align with the venue's open orders.
    ///
    /// Tracked orders the venue no longer lists are marked cancelled; matched
    /// sizes are refreshed. Venue orders the ledger does not know are adopted
    /// when their slot is free (sells as exits, buys as entries). Returns ids
    /// of venue orders that collide with an already tracked order on the same
    /// slot; the caller should cancel them.
    pub fn sync_with_venue(&self, open: &[OpenOrder], now_ms: u64) -> Vec<OrderId> {
        let listed: HashSet<&OrderId> = open.iter().map(|o| &o.order_id).collect();
        let mut state = self.state.lock();

        for order in state.slots.values_mut() {
            if order.is_active() && !listed.contains(&order.id) {
                debug!(order_id = %order.id, "Order gone from venue");
                order.status = OrderStatus::Cancelled;
                order.updated_at_ms = now_ms;
            }
        }

        let mut strays = Vec::new();
        for venue_order in open {
            if let Some(order) = state.find_mut(&venue_order.order_id) {
                order.size_matched = venue_order.size_matched;
                order.updated_at_ms = now_ms;
                continue;
            }
            let key = (venue_order.instrument.clone(), venue_order.side);
            if state.active(&key).is_some() {
                warn!(
                    instrument = %venue_order.instrument,
                    side = %venue_order.side,
                    order_id = %venue_order.order_id,
                    "Second resting order on one slot"
                );
                strays.push(venue_order.order_id.clone());
                continue;
            }
            let mut adopted = venue_order.to_managed(now_ms);
            if adopted.side == OrderSide::Sell {
                adopted.role = OrderRole::Exit;
            }
            info!(
                instrument = %adopted.instrument,
                side = %adopted.side,
                order_id = %adopted.id,
                "Adopted untracked venue order"
            );
            state.slots.insert(key, adopted);
        }
        strays
    }

    /// Fetch open orders, sync, and cancel colliding strays.
    pub async fn reconcile_orders(&self, now_ms: u64) -> OrderResult<usize> {
        let open = self.venue.get_open_orders().await?;
        let strays = self.sync_with_venue(&open, now_ms);
        for id in &strays {
            if !self.venue.cancel_order(id).await? {
                warn!(order_id = %id, "Stray order cancel not confirmed");
            }
        }
        Ok(strays.len())
    }

    /// USDC reserved by resting buys.
    pub fn locked_notional(&self) -> Decimal {
        self.state
            .lock()
            .slots
            .values()
            .map(ManagedOrder::locked_notional)
            .sum()
    }

    pub fn order(&self, instrument: &InstrumentId, side: OrderSide) -> Option<ManagedOrder> {
        self.state
            .lock()
            .active(&(instrument.clone(), side))
            .cloned()
    }

    pub fn exit_order(&self, instrument: &InstrumentId) -> Option<ManagedOrder> {
        self.order(instrument, OrderSide::Sell)
            .filter(|o| o.role == OrderRole::Exit)
    }

    pub fn has_exit_order(&self, instrument: &InstrumentId) -> bool {
        self.exit_order(instrument).is_some()
    }

    pub fn active_orders(&self) -> Vec<ManagedOrder> {
        self.state
            .lock()
            .slots
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|o| o.is_active())
            .count()
    }

    /// Forget orders for instruments that are no longer traded.
    pub fn forget_instrument(&self, instrument: &InstrumentId) {
        let mut state = self.state.lock();
        state.slots.retain(|(inst, _), _| inst != instrument);
        state.last_submit_ms.retain(|(inst, _), _| inst != instrument);
    }

    pub fn metrics(&self) -> OrderMetrics {
        let locked_usdc = self.locked_notional();
        let state = self.state.lock();
        OrderMetrics {
            active: state.slots.values().filter(|o| o.is_active()).count(),
            total_orders: state.total_orders,
            cancels: state.cancels,
            replaces: state.replaces,
            replace_rejects: state.replace_rejects,
            throttled: state.throttled,
            locked_usdc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binmm_core::PostOrderResult;
    use binmm_venue::{MockCall, MockVenue};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn tok() -> InstrumentId {
        InstrumentId::from("tok-yes")
    }

    fn setup() -> (Arc<MockVenue>, OrderLedger) {
        let venue = Arc::new(MockVenue::new());
        let ledger = OrderLedger::new(venue.clone(), OrderLedgerConfig::default());
        (venue, ledger)
    }

    fn buy(price: Decimal, size: Decimal) -> OrderIntent {
        OrderIntent::entry_buy(tok(), Price::new(price), Size::new(size))
    }

    fn exit(price: Decimal, size: Decimal) -> OrderIntent {
        OrderIntent::exit_sell(tok(), Price::new(price), Size::new(size))
    }

    #[tokio::test]
    async fn test_place_then_unchanged_within_tick() {
        let (venue, ledger) = setup();
        let first = ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        assert!(matches!(first, PlaceOutcome::Placed(_)));

        let again = ledger
            .place_or_replace(&buy(dec!(0.455), dec!(10)), 10_000)
            .await;
        assert!(matches!(again, PlaceOutcome::Unchanged(_)));
        assert_eq!(venue.posts().len(), 1);
        assert!(venue.posts()[0].post_only);
    }

    #[tokio::test]
    async fn test_replace_cancels_before_posting() {
        let (venue, ledger) = setup();
        let first = ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        let old = first.order_id().cloned().unwrap();

        let second = ledger
            .place_or_replace(&buy(dec!(0.47), dec!(10)), 5_000)
            .await;
        match second {
            PlaceOutcome::Replaced { cancelled, .. } => assert_eq!(cancelled, old),
            other => panic!("expected replace, got {other:?}"),
        }
        assert_eq!(venue.cancels(), vec![old]);
        assert_eq!(venue.resting().len(), 1);
        assert_eq!(ledger.active_count(), 1);
        assert_eq!(ledger.metrics().replaces, 1);
    }

    #[tokio::test]
    async fn test_unconfirmed_cancel_posts_nothing() {
        let (venue, ledger) = setup();
        let first = ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;
        let old = first.order_id().cloned().unwrap();
        venue.refuse_cancel(&old);

        let second = ledger.place_or_replace(&exit(dec!(0.52), dec!(10)), 1_000).await;
        assert_eq!(second, PlaceOutcome::CancelFailed(old.clone()));
        assert_eq!(venue.posts().len(), 1);
        assert_eq!(venue.resting_for(&tok(), OrderSide::Sell).len(), 1);
        assert_eq!(ledger.exit_order(&tok()).unwrap().id, old);
    }

    #[tokio::test]
    async fn test_refused_cancels_do_not_drain_replace_budget() {
        let venue = Arc::new(MockVenue::new());
        let config = OrderLedgerConfig {
            max_replaces_per_minute: 2,
            ..OrderLedgerConfig::default()
        };
        let ledger = OrderLedger::new(venue.clone(), config);
        let first = ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;
        let old = first.order_id().cloned().unwrap();
        venue.refuse_cancel(&old);

        for i in 1..=5u64 {
            let outcome = ledger
                .place_or_replace(&exit(dec!(0.52), dec!(10)), i * 500)
                .await;
            assert_eq!(outcome, PlaceOutcome::CancelFailed(old.clone()));
        }
        assert_eq!(ledger.budget.current_count(3_000), 0);

        // Both slots are still there for an instrument whose cancels succeed.
        let other = InstrumentId::from("tok-no");
        let sell = |price: Decimal| {
            OrderIntent::exit_sell(other.clone(), Price::new(price), Size::new(dec!(5)))
        };
        ledger.place_or_replace(&sell(dec!(0.60)), 3_000).await;
        for (t, price) in [(3_500, dec!(0.58)), (4_000, dec!(0.56))] {
            let outcome = ledger.place_or_replace(&sell(price), t).await;
            assert!(matches!(outcome, PlaceOutcome::Replaced { .. }), "{outcome:?}");
        }
    }

    #[tokio::test]
    async fn test_entry_cannot_overwrite_exit() {
        let (venue, ledger) = setup();
        ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;

        let entry_sell = OrderIntent::new(
            tok(),
            OrderSide::Sell,
            Price::new(dec!(0.60)),
            Size::new(dec!(5)),
            OrderRole::Entry,
        );
        let outcome = ledger.place_or_replace(&entry_sell, 10_000).await;
        assert!(matches!(outcome, PlaceOutcome::Blocked(_)));
        assert_eq!(venue.posts().len(), 1);
        assert!(ledger.has_exit_order(&tok()));
    }

    #[tokio::test]
    async fn test_min_interval_applies_to_entries_only() {
        let (_venue, ledger) = setup();
        ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        let outcome = ledger
            .place_or_replace(&buy(dec!(0.47), dec!(10)), 1_000)
            .await;
        assert_eq!(outcome, PlaceOutcome::Throttled(ThrottleReason::MinInterval));

        ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;
        let outcome = ledger.place_or_replace(&exit(dec!(0.53), dec!(10)), 500).await;
        assert!(matches!(outcome, PlaceOutcome::Replaced { .. }));
    }

    #[tokio::test]
    async fn test_replace_budget_25_attempts_20_accepted() {
        let (_venue, ledger) = setup();
        let instruments: Vec<InstrumentId> = (0..25)
            .map(|i| InstrumentId::from(format!("tok-{i}").as_str()))
            .collect();
        for inst in &instruments {
            let intent =
                OrderIntent::entry_buy(inst.clone(), Price::new(dec!(0.40)), Size::new(dec!(5)));
            assert!(ledger.place_or_replace(&intent, 0).await.is_resting());
        }

        let mut replaced = 0;
        let mut throttled = 0;
        for (i, inst) in instruments.iter().enumerate() {
            let intent =
                OrderIntent::entry_buy(inst.clone(), Price::new(dec!(0.42)), Size::new(dec!(5)));
            match ledger.place_or_replace(&intent, 5_000 + i as u64 * 100).await {
                PlaceOutcome::Replaced { .. } => replaced += 1,
                PlaceOutcome::Throttled(ThrottleReason::ReplaceBudget) => throttled += 1,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(replaced, 20);
        assert_eq!(throttled, 5);
        // Throttled slots keep their old order.
        assert_eq!(ledger.active_count(), 25);
    }

    #[tokio::test]
    async fn test_would_cross_counts_as_reject() {
        let (venue, ledger) = setup();
        venue.script_post(PostOrderResult::crossed());
        let outcome = ledger.place_or_replace(&buy(dec!(0.60), dec!(5)), 0).await;
        assert!(matches!(
            outcome,
            PlaceOutcome::Rejected {
                would_cross: true,
                ..
            }
        ));
        assert_eq!(ledger.metrics().replace_rejects, 1);
        assert_eq!(ledger.active_count(), 0);
    }

    #[tokio::test]
    async fn test_sell_over_holdings_refused_locally() {
        let (venue, ledger) = setup();
        let intent = exit(dec!(0.55), dec!(12)).with_holdings(Size::new(dec!(10)));
        let outcome = ledger.place_or_replace(&intent, 0).await;
        assert!(matches!(outcome, PlaceOutcome::InvariantViolation(_)));
        assert!(venue.posts().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_marks_locally_on_failure() {
        let (venue, ledger) = setup();
        ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;
        venue.set_failing(MockCall::CancelAll, true);

        assert!(!ledger.cancel_all(1_000).await);
        assert_eq!(ledger.active_count(), 0);
        assert_eq!(ledger.locked_notional(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_role_spares_exits() {
        let (venue, ledger) = setup();
        ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        ledger.place_or_replace(&exit(dec!(0.55), dec!(10)), 0).await;

        assert!(ledger.cancel_role(OrderRole::Entry, 1_000).await);
        assert!(ledger.order(&tok(), OrderSide::Buy).is_none());
        assert!(ledger.has_exit_order(&tok()));
        assert_eq!(venue.resting().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_marks_missing_and_adopts_untracked() {
        let (venue, ledger) = setup();
        let placed = ledger.place_or_replace(&buy(dec!(0.45), dec!(10)), 0).await;
        let id = placed.order_id().cloned().unwrap();
        venue.expire_resting(&id);

        let stray = OpenOrder {
            order_id: OrderId::from("venue-1"),
            instrument: tok(),
            side: OrderSide::Sell,
            price: Price::new(dec!(0.60)),
            size: Size::new(dec!(10)),
            size_matched: Size::new(dec!(4)),
        };
        let strays = ledger.sync_with_venue(&[stray], 2_000);
        assert!(strays.is_empty());
        assert!(ledger.order(&tok(), OrderSide::Buy).is_none());

        let adopted = ledger.exit_order(&tok()).unwrap();
        assert_eq!(adopted.id, OrderId::from("venue-1"));
        assert_eq!(adopted.size_remaining(), Size::new(dec!(6)));
    }

    #[tokio::test]
    async fn test_locked_notional_and_fill_update() {
        let (_venue, ledger) = setup();
        let placed = ledger.place_or_replace(&buy(dec!(0.40), dec!(10)), 0).await;
        let id = placed.order_id().cloned().unwrap();
        assert_eq!(ledger.locked_notional(), dec!(4.0));

        ledger.update_from_fill(&id, Size::new(dec!(4)), 100);
        assert_eq!(ledger.locked_notional(), dec!(2.4));
        ledger.update_from_fill(&id, Size::new(dec!(10)), 200);
        assert_eq!(ledger.active_count(), 0);
    }

    #[tokio::test]
    async fn test_record_fill_accumulates() {
        let (_venue, ledger) = setup();
        let placed = ledger.place_or_replace(&buy(dec!(0.50), dec!(10)), 0).await;
        let id = placed.order_id().cloned().unwrap();

        ledger.record_fill(&id, Size::new(dec!(3)), 100);
        ledger.record_fill(&id, Size::new(dec!(3)), 200);
        assert_eq!(ledger.order(&tok(), OrderSide::Buy).unwrap().size_matched, Size::new(dec!(6)));

        ledger.record_fill(&id, Size::new(dec!(5)), 300);
        assert_eq!(ledger.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_reports_refusal() {
        let (venue, ledger) = setup();
        let placed = ledger.place_or_replace(&buy(dec!(0.40), dec!(10)), 0).await;
        let id = placed.order_id().cloned().unwrap();
        venue.refuse_cancel(&id);

        assert!(matches!(
            ledger.cancel(&tok(), OrderSide::Buy, 100).await,
            Err(OrderError::CancelRefused(_))
        ));
        assert!(ledger.order(&tok(), OrderSide::Buy).is_some());
    }
}
