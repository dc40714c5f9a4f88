//! Main application orchestration.
//!
//! One tick, in order:
//! 1. Fetch books and mark positions
//! 2. Poll fills into positions, orders and exits
//! 3. Reconcile positions and orders when due
//! 4. Exit supervision (runs even after the kill switch)
//! 5. Entry proposals through the balance gate (skipped once killed)
//! 6. Safety evaluation; a trip cancels every entry order
//!
//! Every venue call is bounded by the venue's own timeout. A failed call
//! skips that step for this tick; nothing here aborts the loop.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use binmm_core::{
    BookTop, Clock, InstrumentId, MarketPair, OrderRole, OrderSide, Size, SystemClock,
};
use binmm_exit::ExitSupervisor;
use binmm_fills::FillLedger;
use binmm_orders::{OrderIntent, OrderLedger, PlaceOutcome};
use binmm_position::PositionStore;
use binmm_risk::{
    check_startup_requirements, BalanceGate, InstanceLease, KillReason, KillSwitch,
    SafetyMonitor, SafetyViolation, StartupInventory, EXIT_ENFORCED_ENV,
};
use binmm_telemetry::{Event, EventSink, JsonlEventLog, Metrics, MetricsSnapshot, NullEventSink};
use binmm_venue::{DynVenue, HttpVenue, SimVenue};

use crate::config::{AppConfig, RunMode};
use crate::entry::{EntryProposer, JoinBidProposer};
use crate::error::{AppError, AppResult};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub fills: usize,
    pub reconciled: bool,
    pub mismatches: usize,
    pub exit_events: usize,
    pub entries_placed: usize,
    pub killed: bool,
    /// Set only on the tick that tripped the kill switch.
    pub kill_reason: Option<KillReason>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    market: MarketPair,
    venue: DynVenue,
    clock: Arc<dyn Clock>,
    fills: FillLedger,
    positions: Arc<PositionStore>,
    orders: Arc<OrderLedger>,
    exits: ExitSupervisor,
    balance: BalanceGate,
    safety: SafetyMonitor,
    entry: Box<dyn EntryProposer>,
    events: Arc<dyn EventSink>,
    lease: Option<InstanceLease>,
    tick: u64,
    entries_halted: bool,
}

impl Application {
    /// Build the venue stack for the configured mode and wire everything.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(AppError::Config(errors.join("; ")));
        }

        let http: DynVenue = Arc::new(HttpVenue::new((&config.venue).into())?);
        let cash = config.control.sim_starting_cash;
        let venue: DynVenue = match config.mode {
            RunMode::Live => http,
            RunMode::Paper => Arc::new(SimVenue::paper(http, cash)),
            RunMode::Dryrun => Arc::new(SimVenue::dry_run(http, cash)),
        };

        let events: Arc<dyn EventSink> = if config.control.event_log_path.is_empty() {
            Arc::new(NullEventSink)
        } else {
            Arc::new(JsonlEventLog::open(&config.control.event_log_path)?)
        };

        Self::with_parts(config, venue, Arc::new(SystemClock), events)
    }

    /// Wire the components over an existing venue, clock and event sink.
    pub fn with_parts(
        config: AppConfig,
        venue: DynVenue,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> AppResult<Self> {
        let market = config.market.pair()?;
        let account = config.account.clone();

        let fills = FillLedger::new(venue.clone(), account.clone(), config.fills.clone());
        let positions = Arc::new(PositionStore::new(
            venue.clone(),
            account.clone(),
            config.reconcile.clone(),
        ));
        for instrument in market.instruments() {
            positions.track(&instrument);
        }
        let orders = Arc::new(OrderLedger::new(venue.clone(), config.orders.clone()));
        let exits = ExitSupervisor::new(config.exit.clone(), orders.clone(), positions.clone());
        let balance = BalanceGate::new(
            venue.clone(),
            account,
            config.balance.clone(),
            orders.clone(),
            positions.clone(),
        );
        let safety = SafetyMonitor::new(config.safety.clone(), Arc::new(KillSwitch::new()));
        let entry = Box::new(JoinBidProposer::new(config.entry.clone()));

        Ok(Self {
            config,
            market,
            venue,
            clock,
            fills,
            positions,
            orders,
            exits,
            balance,
            safety,
            entry,
            events,
            lease: None,
            tick: 0,
            entries_halted: false,
        })
    }

    /// Replace the built-in entry proposer.
    pub fn with_entry_proposer(mut self, entry: Box<dyn EntryProposer>) -> Self {
        self.entry = entry;
        self
    }

    /// Startup checks, lease, fill boundary and inventory adoption.
    pub async fn start(&mut self) -> AppResult<StartupInventory> {
        let exit_enforced = std::env::var(EXIT_ENFORCED_ENV).ok();
        check_startup_requirements(self.config.is_live(), exit_enforced.as_deref())?;

        let now = self.clock.now_ms();
        if !self.config.control.lease_path.is_empty() {
            self.lease = Some(InstanceLease::acquire(
                &self.config.control.lease_path,
                self.config.control.lease_ttl_ms,
                now,
            )?);
        }

        self.fills.set_boundary_now(now);
        let inventory = StartupInventory::scan(&self.positions, &self.orders, now).await?;
        for pos in &inventory.positions {
            self.events.record(
                now,
                Event::Reconcile {
                    instrument: pos.instrument.clone(),
                    belief: Size::ZERO,
                    authoritative: pos.shares,
                },
            );
        }

        if let Err(e) = self.balance.snapshot(now).await {
            warn!(error = %e, "Initial balance snapshot failed");
        }

        info!(
            mode = ?self.config.mode,
            yes = %self.market.yes,
            no = %self.market.no,
            startup_positions = inventory.positions.len(),
            "Application started"
        );
        Ok(inventory)
    }

    /// Tick until `shutdown` is cancelled, then stop cleanly.
    pub async fn run(mut self, shutdown: CancellationToken) -> AppResult<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_interval_ms = self.config.control.tick_interval_ms,
            "Entering control loop"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One control-loop pass.
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let now = self.clock.now_ms();
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        let books = self.fetch_books().await;
        report.fills = self.ingest_fills(now).await;
        if self.config.is_live() {
            self.check_fill_safety(now);
        }
        self.reconcile_if_due(now, &mut report).await;

        let exit_events = self.exits.tick(&books, now).await;
        report.exit_events = exit_events.len();
        for event in &exit_events {
            self.events.record(now, event.to_event());
        }

        if self.safety.entries_allowed() {
            report.entries_placed = self.run_entries(&books, now).await;
        }

        report.kill_reason = self.evaluate_safety(now);
        if self.safety.is_killed() && !self.entries_halted {
            if !self.orders.cancel_role(OrderRole::Entry, now).await {
                warn!("Entry cancel after kill not fully confirmed");
            }
            self.entries_halted = true;
        }
        report.killed = self.safety.is_killed();

        let duration_ms = started.elapsed().as_millis() as u64;
        Metrics::tick_duration(duration_ms as f64);
        self.events.record(
            now,
            Event::Tick {
                tick: self.tick,
                killed: report.killed,
                positions: self.positions.open_positions().len(),
                active_orders: self.orders.active_count(),
                active_exits: self.exits.metrics().active_exits,
                duration_ms,
            },
        );

        let every = self.config.control.metrics_every_ticks;
        if every > 0 && self.tick % every == 0 {
            MetricsSnapshot::capture().log();
        }
        if let Some(lease) = self.lease.as_mut() {
            lease.set_killed(report.killed);
            if let Err(e) = lease.renew(now) {
                warn!(error = %e, "Lease heartbeat failed");
            }
        }

        debug!(
            tick = report.tick,
            fills = report.fills,
            exit_events = report.exit_events,
            entries = report.entries_placed,
            duration_ms,
            "Tick complete"
        );
        report
    }

    /// Cancel entries and release the lease. Exits stay resting.
    pub async fn shutdown(&mut self) {
        let now = self.clock.now_ms();
        if !self.orders.cancel_role(OrderRole::Entry, now).await {
            warn!("Entry cancel at shutdown not fully confirmed");
        }

        let summary = self.fills.summary();
        let resting_exits = self
            .orders
            .active_orders()
            .iter()
            .filter(|o| o.role == OrderRole::Exit)
            .count();
        info!(
            ticks = self.tick,
            buys = summary.total_buys,
            sells = summary.total_sells,
            realized_pnl = %summary.realized_pnl,
            open_positions = self.positions.open_positions().len(),
            resting_exits = resting_exits,
            killed = self.safety.is_killed(),
            safe_for_live = self.fills.is_safe_for_live(),
            "Shutting down"
        );
        MetricsSnapshot::capture().log();
        self.lease = None;
    }

    // ------------------------------------------------------------------------
    // Tick steps
    // ------------------------------------------------------------------------

    /// Instruments to watch: the live pair plus anything still held.
    fn watched(&self) -> Vec<InstrumentId> {
        let mut set: BTreeSet<InstrumentId> = self.market.instruments().into_iter().collect();
        set.extend(self.positions.open_positions().into_iter().map(|p| p.instrument));
        set.into_iter().collect()
    }

    async fn fetch_books(&self) -> HashMap<InstrumentId, BookTop> {
        let mut books = HashMap::new();
        for instrument in self.watched() {
            if let Some(book) = self.venue_book(&instrument).await {
                self.positions
                    .update_mtm(&instrument, book.best_bid, book.best_ask);
                books.insert(instrument, book);
            }
        }
        books
    }

    async fn venue_book(&self, instrument: &InstrumentId) -> Option<BookTop> {
        match self.venue.get_order_book(instrument).await {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(instrument = %instrument, error = %e, "Book fetch failed, skipping");
                None
            }
        }
    }

    async fn ingest_fills(&self, now: u64) -> usize {
        let fills = self.fills.poll(&self.watched(), now).await;
        for fill in &fills {
            self.positions.apply_fill(fill);
            if let Some(order_id) = &fill.order_id {
                self.orders.record_fill(order_id, fill.size, now);
            }
            self.events.record(now, Event::Fill { fill: fill.clone() });
            if let Some(event) = self.exits.on_fill(fill) {
                self.events.record(now, event.to_event());
            }
        }
        fills.len()
    }

    async fn reconcile_if_due(&self, now: u64, report: &mut TickReport) {
        let active = self.orders.active_count() > 0;
        if !self.positions.needs_reconcile(now, active) {
            return;
        }
        report.reconciled = true;

        match self.positions.reconcile(now).await {
            Ok(mismatches) => {
                report.mismatches = mismatches.len();
                for m in &mismatches {
                    self.events.record(
                        now,
                        Event::Reconcile {
                            instrument: m.instrument.clone(),
                            belief: m.belief,
                            authoritative: m.authoritative,
                        },
                    );
                }
                if let Some(v) = self.safety.observe_reconcile(mismatches.len()) {
                    self.record_violation(now, &v);
                }
            }
            Err(e) => {
                warn!(error = %e, "Position reconcile failed");
                let v = self.safety.observe_reconcile_error(&e.to_string());
                self.record_violation(now, &v);
            }
        }

        if let Err(e) = self.orders.reconcile_orders(now).await {
            warn!(error = %e, "Order reconcile failed");
        }
    }

    async fn run_entries(&self, books: &HashMap<InstrumentId, BookTop>, now: u64) -> usize {
        let ttd = (self.market.deadline_ms > 0).then(|| self.market.time_to_deadline_ms(now));
        let mut proposals = Vec::new();
        for instrument in self.market.instruments() {
            let proposal = books.get(&instrument).and_then(|book| {
                self.entry
                    .propose(&instrument, book, self.positions.get_shares(&instrument), ttd)
            });
            match proposal {
                Some(p) => proposals.push(p),
                None => {
                    // No proposal means no resting entry.
                    if self.orders.order(&instrument, OrderSide::Buy).is_some() {
                        if let Err(e) = self.orders.cancel(&instrument, OrderSide::Buy, now).await {
                            warn!(instrument = %instrument, error = %e, "Entry cancel failed");
                        }
                    }
                }
            }
        }
        if proposals.is_empty() {
            return 0;
        }

        if let Err(e) = self.balance.snapshot(now).await {
            warn!(error = %e, "Balance snapshot failed, skipping entries");
            return 0;
        }

        let mut placed = 0;
        for p in proposals {
            let decision = self.balance.can_place_buy(&p.instrument, p.price, p.size);
            if !decision.ok {
                self.events.record(
                    now,
                    Event::Order {
                        instrument: p.instrument.clone(),
                        side: OrderSide::Buy,
                        role: OrderRole::Entry,
                        outcome: "gated".to_string(),
                        price: p.price,
                        size: p.size,
                        reason: decision.reason,
                    },
                );
                continue;
            }

            let intent =
                OrderIntent::entry_buy(p.instrument.clone(), p.price, decision.adjusted_size);
            let outcome = self.orders.place_or_replace(&intent, now).await;
            if matches!(outcome, PlaceOutcome::Placed(_) | PlaceOutcome::Replaced { .. }) {
                placed += 1;
            }
            self.events.record(
                now,
                Event::Order {
                    instrument: p.instrument,
                    side: OrderSide::Buy,
                    role: OrderRole::Entry,
                    outcome: outcome.as_str().to_string(),
                    price: p.price,
                    size: decision.adjusted_size,
                    reason: decision.reason,
                },
            );
        }
        placed
    }

    fn check_fill_safety(&self, now: u64) {
        let summary = self.fills.summary();
        let detail = format!(
            "{} unverified fills, {} violations",
            summary.unverified_fills, summary.violations
        );
        if let Some(v) = self
            .safety
            .observe_fill_safety(self.fills.is_safe_for_live(), &detail)
        {
            self.record_violation(now, &v);
        }
    }

    fn evaluate_safety(&self, now: u64) -> Option<KillReason> {
        // Onsets for instruments that dropped out of the watch set still need
        // clearing once they are flat.
        let mut observed: BTreeSet<InstrumentId> = self.watched().into_iter().collect();
        observed.extend(self.safety.unprotected().into_iter().map(|(i, _)| i));
        for instrument in observed {
            let has_inventory = !self.positions.get_shares(&instrument).is_flat();
            let protected = self.exits.is_protected(&instrument);
            if let Some(v) = self
                .safety
                .observe_inventory(&instrument, has_inventory, protected, now)
            {
                self.record_violation(now, &v);
            }
        }

        let reason = self.safety.evaluate(now)?;
        error!(reason = %reason, "Kill switch tripped; entries halted, exits continue");
        self.events.record(
            now,
            Event::Safety {
                kind: format!("kill_{}", reason.kind()),
                detail: reason.to_string(),
            },
        );
        Some(reason)
    }

    fn record_violation(&self, now: u64, v: &SafetyViolation) {
        self.events.record(
            now,
            Event::Safety {
                kind: v.kind.to_string(),
                detail: v.detail.clone(),
            },
        );
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn market(&self) -> &MarketPair {
        &self.market
    }

    pub fn fills(&self) -> &FillLedger {
        &self.fills
    }

    pub fn positions(&self) -> &Arc<PositionStore> {
        &self.positions
    }

    pub fn orders(&self) -> &Arc<OrderLedger> {
        &self.orders
    }

    pub fn exits(&self) -> &ExitSupervisor {
        &self.exits
    }

    pub fn balance(&self) -> &BalanceGate {
        &self.balance
    }

    pub fn safety(&self) -> &SafetyMonitor {
        &self.safety
    }

    pub fn is_killed(&self) -> bool {
        self.safety.is_killed()
    }
}
