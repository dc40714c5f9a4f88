//! Fill ledger.
//!
//! Polls the account trade history, deduplicates trades into confirmed fills,
//! and keeps a running per-instrument position built from fills alone. The
//! position here is a second opinion; the position store's reconciled view
//! is authoritative.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use binmm_core::{Fill, InstrumentId, OrderId, OrderSide, Price, Provenance, Size};
use binmm_telemetry::Metrics;
use binmm_venue::{DynVenue, RawTrade};

use crate::dedupe::dedupe_key;
use crate::error::{FillError, FillResult, Violation, ViolationKind};

/// Polls faster than this are refused regardless of configuration.
const MIN_POLL_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Config
// ============================================================================

/// Fill ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillLedgerConfig {
    /// Minimum time between polls (clamped to at least 1s).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Trades requested per poll.
    #[serde(default = "default_trade_limit")]
    pub trade_limit: usize,
    /// Ingestion boundary skew applied by `set_boundary_now`.
    #[serde(default = "default_boundary_skew_ms")]
    pub boundary_skew_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_trade_limit() -> usize {
    50
}

fn default_boundary_skew_ms() -> u64 {
    2_000
}

impl Default for FillLedgerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            trade_limit: default_trade_limit(),
            boundary_skew_ms: default_boundary_skew_ms(),
        }
    }
}

impl FillLedgerConfig {
    #[inline]
    pub fn effective_poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Position reconstructed from fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedPosition {
    pub shares: Size,
    pub avg_entry: Price,
    pub opened_at_ms: u64,
    pub closed_at_ms: Option<u64>,
    pub last_entry_tx: Option<String>,
}

impl TrackedPosition {
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.shares.is_flat()
    }
}

/// One sell matched against the average entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTrip {
    pub instrument: InstrumentId,
    pub entry_price: Price,
    pub exit_price: Price,
    pub size: Size,
    pub pnl: Decimal,
    pub exit_tx: Option<String>,
    pub closed_at_ms: u64,
}

/// Session totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FillSummary {
    pub total_buys: u64,
    pub total_sells: u64,
    pub buy_cost: Decimal,
    pub sell_revenue: Decimal,
    pub realized_pnl: Decimal,
    pub round_trips: usize,
    pub open_positions: usize,
    pub total_shares: Size,
    pub unverified_fills: u64,
    pub violations: usize,
}

#[derive(Debug, Default)]
struct LedgerState {
    seen: HashSet<String>,
    fills: Vec<Fill>,
    positions: HashMap<InstrumentId, TrackedPosition>,
    round_trips: Vec<RoundTrip>,
    violations: Vec<Violation>,
    total_buys: u64,
    total_sells: u64,
    buy_cost: Decimal,
    sell_revenue: Decimal,
    realized_pnl: Decimal,
    unverified_fills: u64,
    last_poll_ms: Option<u64>,
    boundary_ms: u64,
}

impl LedgerState {
    fn violation(&mut self, kind: ViolationKind, detail: String, at_ms: u64) {
        warn!(kind = %kind, detail = %detail, "Fill ledger violation");
        Metrics::fill_violation(kind.as_str());
        self.violations.push(Violation {
            kind,
            detail,
            at_ms,
        });
    }

    /// Validate and dedupe one trade. `Ok(None)` means "not new".
    fn parse_trade(
        &mut self,
        raw: &RawTrade,
        instruments: &HashSet<&InstrumentId>,
    ) -> FillResult<Option<Fill>> {
        let side: OrderSide = raw
            .side
            .parse()
            .map_err(|_| FillError::Malformed(format!("unknown side {:?}", raw.side)))?;
        if raw.price <= Decimal::ZERO || raw.size <= Decimal::ZERO {
            return Err(FillError::Malformed(format!(
                "non-positive price/size: {} @ {}",
                raw.size, raw.price
            )));
        }
        let instrument = InstrumentId::new(raw.asset.as_str())
            .map_err(|e| FillError::Malformed(e.to_string()))?;
        let timestamp_ms = raw.timestamp_ms.ok_or_else(|| {
            FillError::Malformed(format!(
                "missing timestamp: {} {} {} @ {}",
                raw.asset, raw.side, raw.size, raw.price
            ))
        })?;

        if timestamp_ms < self.boundary_ms {
            return Ok(None);
        }
        if !instruments.is_empty() && !instruments.contains(&instrument) {
            return Ok(None);
        }

        let (key, provenance) = dedupe_key(
            raw.tx_ref.as_deref(),
            &raw.asset,
            side,
            raw.size,
            raw.price,
            timestamp_ms,
        );
        if !self.seen.insert(key.clone()) {
            return Ok(None);
        }

        Ok(Some(Fill {
            dedupe_key: key,
            order_id: raw.order_id.clone().map(OrderId::from_string),
            instrument,
            side,
            price: Price::new(raw.price),
            size: Size::new(raw.size),
            timestamp_ms,
            tx_ref: raw.tx_ref.clone(),
            is_maker: raw.is_maker,
            fee: raw.fee,
            rebate: raw.rebate,
            provenance,
        }))
    }

    fn apply(&mut self, fill: &Fill) {
        if fill.provenance == Provenance::Unverified {
            self.unverified_fills += 1;
            self.violation(
                ViolationKind::UnverifiedProvenance,
                format!(
                    "fill without transaction reference: {} {} {} @ {}",
                    fill.instrument, fill.side, fill.size, fill.price
                ),
                fill.timestamp_ms,
            );
        }
        Metrics::fill(&fill.side.to_string(), fill.is_verified());

        match fill.side {
            OrderSide::Buy => self.apply_buy(fill),
            OrderSide::Sell => self.apply_sell(fill),
        }
        self.fills.push(fill.clone());
    }

    fn apply_buy(&mut self, fill: &Fill) {
        self.total_buys += 1;
        self.buy_cost += fill.notional();

        let pos = self
            .positions
            .entry(fill.instrument.clone())
            .or_insert_with(|| TrackedPosition {
                shares: Size::ZERO,
                avg_entry: Price::ZERO,
                opened_at_ms: fill.timestamp_ms,
                closed_at_ms: None,
                last_entry_tx: None,
            });

        if !pos.is_open() {
            pos.shares = Size::ZERO;
            pos.opened_at_ms = fill.timestamp_ms;
            pos.closed_at_ms = None;
        }
        let total = pos.shares + fill.size;
        let cost = pos.shares.notional(pos.avg_entry) + fill.notional();
        pos.avg_entry = Price::new(cost / total.inner());
        pos.shares = total;
        pos.last_entry_tx = fill.tx_ref.clone();

        info!(
            instrument = %fill.instrument,
            size = %fill.size,
            price = %fill.price,
            shares = %pos.shares,
            avg_entry = %pos.avg_entry,
            "Fill: BUY"
        );
    }

    fn apply_sell(&mut self, fill: &Fill) {
        self.total_sells += 1;
        self.sell_revenue += fill.notional();

        let open = self
            .positions
            .get(&fill.instrument)
            .filter(|p| p.is_open())
            .cloned();
        let Some(pos) = open else {
            self.violation(
                ViolationKind::SellWithoutEntry,
                format!(
                    "sell with no tracked entry: {} {} @ {}",
                    fill.instrument, fill.size, fill.price
                ),
                fill.timestamp_ms,
            );
            return;
        };

        let matched = fill.size.min(pos.shares);
        if fill.size > pos.shares && fill.size.abs_diff(pos.shares) > Size::EPSILON.inner() {
            self.violation(
                ViolationKind::Oversell,
                format!(
                    "sell {} exceeds tracked {} on {}",
                    fill.size, pos.shares, fill.instrument
                ),
                fill.timestamp_ms,
            );
        }

        let pnl = matched.inner() * (fill.price.inner() - pos.avg_entry.inner()) - fill.fee
            + fill.rebate;
        self.realized_pnl += pnl;
        Metrics::realized_pnl(self.realized_pnl.to_f64().unwrap_or(0.0));

        self.round_trips.push(RoundTrip {
            instrument: fill.instrument.clone(),
            entry_price: pos.avg_entry,
            exit_price: fill.price,
            size: matched,
            pnl,
            exit_tx: fill.tx_ref.clone(),
            closed_at_ms: fill.timestamp_ms,
        });

        if let Some(tracked) = self.positions.get_mut(&fill.instrument) {
            tracked.shares = tracked.shares.saturating_sub(fill.size);
            if tracked.shares.is_flat() {
                tracked.shares = Size::ZERO;
                tracked.closed_at_ms = Some(fill.timestamp_ms);
                info!(instrument = %fill.instrument, "Fill position closed");
            }
        }

        info!(
            instrument = %fill.instrument,
            size = %fill.size,
            price = %fill.price,
            entry = %pos.avg_entry,
            pnl = %pnl,
            "Fill: SELL"
        );
    }
}

// ============================================================================
// FillLedger
// ============================================================================

/// Deduplicating fill ledger.
pub struct FillLedger {
    venue: DynVenue,
    account: String,
    config: FillLedgerConfig,
    state: Mutex<LedgerState>,
}

impl FillLedger {
    pub fn new(venue: DynVenue, account: impl Into<String>, config: FillLedgerConfig) -> Self {
        Self {
            venue,
            account: account.into(),
            config,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Ignore trades stamped before `boundary_ms`.
    pub fn set_boundary(&self, boundary_ms: u64) {
        self.state.lock().boundary_ms = boundary_ms;
        info!(boundary_ms, "Fill ingestion boundary set");
    }

    /// Set the boundary to `now` minus the configured skew.
    pub fn set_boundary_now(&self, now_ms: u64) {
        self.set_boundary(now_ms.saturating_sub(self.config.boundary_skew_ms));
    }

    /// Poll the venue for new fills on the given instruments.
    ///
    /// Returns only fills not seen before, oldest first. Calls made sooner
    /// than the poll interval after the previous one return nothing. An empty
    /// instrument set accepts every instrument.
    pub async fn poll(&self, instruments: &[InstrumentId], now_ms: u64) -> Vec<Fill> {
        {
            let mut state = self.state.lock();
            if let Some(last) = state.last_poll_ms {
                if now_ms.saturating_sub(last) < self.config.effective_poll_interval_ms() {
                    return Vec::new();
                }
            }
            state.last_poll_ms = Some(now_ms);
        }

        let mut trades = match self
            .venue
            .get_trades(&self.account, self.config.trade_limit)
            .await
        {
            Ok(trades) => trades,
            Err(e) => {
                self.state.lock().violation(
                    ViolationKind::VenueError,
                    FillError::from(e).to_string(),
                    now_ms,
                );
                return Vec::new();
            }
        };

        // History arrives newest first.
        trades.reverse();
        trades.sort_by_key(|t| t.timestamp_ms);

        let wanted: HashSet<&InstrumentId> = instruments.iter().collect();
        let mut state = self.state.lock();
        let mut new_fills = Vec::new();
        for raw in &trades {
            match state.parse_trade(raw, &wanted) {
                Ok(Some(fill)) => {
                    state.apply(&fill);
                    new_fills.push(fill);
                }
                Ok(None) => {}
                Err(e) => state.violation(ViolationKind::Malformed, e.to_string(), now_ms),
            }
        }

        if !new_fills.is_empty() {
            debug!(count = new_fills.len(), "New fills ingested");
        }
        new_fills
    }

    /// False once any fill lacked a reliable reference or any provenance
    /// violation was logged.
    pub fn is_safe_for_live(&self) -> bool {
        let state = self.state.lock();
        state.unverified_fills == 0
            && !state
                .violations
                .iter()
                .any(|v| v.kind.affects_provenance())
    }

    #[must_use]
    pub fn confirmed_shares(&self, instrument: &InstrumentId) -> Size {
        self.state
            .lock()
            .positions
            .get(instrument)
            .map(|p| p.shares)
            .unwrap_or(Size::ZERO)
    }

    #[must_use]
    pub fn tracked_position(&self, instrument: &InstrumentId) -> Option<TrackedPosition> {
        self.state.lock().positions.get(instrument).cloned()
    }

    #[must_use]
    pub fn fills(&self) -> Vec<Fill> {
        self.state.lock().fills.clone()
    }

    #[must_use]
    pub fn round_trips(&self) -> Vec<RoundTrip> {
        self.state.lock().round_trips.clone()
    }

    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.state.lock().violations.clone()
    }

    /// Session totals.
    pub fn summary(&self) -> FillSummary {
        let state = self.state.lock();
        let open: Vec<&TrackedPosition> =
            state.positions.values().filter(|p| p.is_open()).collect();
        FillSummary {
            total_buys: state.total_buys,
            total_sells: state.total_sells,
            buy_cost: state.buy_cost,
            sell_revenue: state.sell_revenue,
            realized_pnl: state.realized_pnl,
            round_trips: state.round_trips.len(),
            open_positions: open.len(),
            total_shares: open.iter().fold(Size::ZERO, |acc, p| acc + p.shares),
            unverified_fills: state.unverified_fills,
            violations: state.violations.len(),
        }
    }

    /// Drop all session state (new market window). The boundary is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let boundary_ms = state.boundary_ms;
        *state = LedgerState {
            boundary_ms,
            ..LedgerState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binmm_venue::{MockCall, MockVenue};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn tok() -> InstrumentId {
        InstrumentId::from("tok-yes")
    }

    fn trade(side: &str, size: Decimal, price: Decimal, ts: u64, tx: Option<&str>) -> RawTrade {
        RawTrade {
            tx_ref: tx.map(str::to_string),
            order_id: None,
            asset: "tok-yes".to_string(),
            side: side.to_string(),
            size,
            price,
            timestamp_ms: Some(ts),
            is_maker: true,
            fee: Decimal::ZERO,
            rebate: Decimal::ZERO,
        }
    }

    fn setup() -> (Arc<MockVenue>, FillLedger) {
        let venue = Arc::new(MockVenue::new());
        let ledger = FillLedger::new(venue.clone(), "0xacct", FillLedgerConfig::default());
        (venue, ledger)
    }

    #[tokio::test]
    async fn test_duplicate_trade_yields_single_fill() {
        let (venue, ledger) = setup();
        let t = trade("BUY", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01"));

        venue.push_trade(t.clone());
        let first = ledger.poll(&[tok()], 10_000).await;
        venue.push_trade(t);
        let second = ledger.poll(&[tok()], 20_000).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(ledger.fills().len(), 1);
        assert_eq!(ledger.confirmed_shares(&tok()), Size::new(dec!(10)));
    }

    #[tokio::test]
    async fn test_weighted_average_entry() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));
        venue.push_trade(trade("BUY", dec!(30), dec!(0.42), 2_000, Some("0xaaaaaaaaaaaa02")));

        ledger.poll(&[tok()], 10_000).await;
        let pos = ledger.tracked_position(&tok()).unwrap();
        assert_eq!(pos.shares.inner(), dec!(40));
        // (10*0.50 + 30*0.42) / 40 = 0.44
        assert_eq!(pos.avg_entry.inner(), dec!(0.44));
    }

    #[tokio::test]
    async fn test_sell_realizes_pnl_and_closes() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));
        let mut sell = trade("SELL", dec!(10), dec!(0.53), 2_000, Some("0xaaaaaaaaaaaa02"));
        sell.fee = dec!(0.01);
        sell.rebate = dec!(0.02);
        venue.push_trade(sell);

        let fills = ledger.poll(&[tok()], 10_000).await;
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, OrderSide::Buy);

        let trips = ledger.round_trips();
        assert_eq!(trips.len(), 1);
        // 10 * 0.03 - 0.01 + 0.02
        assert_eq!(trips[0].pnl, dec!(0.31));

        let summary = ledger.summary();
        assert_eq!(summary.realized_pnl, dec!(0.31));
        assert_eq!(summary.open_positions, 0);
        assert_eq!(summary.total_buys, 1);
        assert_eq!(summary.total_sells, 1);
        assert!(ledger.is_safe_for_live());
    }

    #[tokio::test]
    async fn test_sell_without_entry_is_violation_not_negative() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("SELL", dec!(5), dec!(0.60), 1_000, Some("0xaaaaaaaaaaaa01")));

        let fills = ledger.poll(&[tok()], 10_000).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(ledger.confirmed_shares(&tok()), Size::ZERO);
        assert!(!ledger.is_safe_for_live());
        assert_eq!(
            ledger.violations()[0].kind,
            ViolationKind::SellWithoutEntry
        );
    }

    #[tokio::test]
    async fn test_oversell_clamps_at_zero() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("BUY", dec!(5), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));
        venue.push_trade(trade("SELL", dec!(8), dec!(0.55), 2_000, Some("0xaaaaaaaaaaaa02")));

        ledger.poll(&[tok()], 10_000).await;
        assert_eq!(ledger.confirmed_shares(&tok()), Size::ZERO);
        assert_eq!(ledger.round_trips()[0].size.inner(), dec!(5));
        assert!(ledger
            .violations()
            .iter()
            .any(|v| v.kind == ViolationKind::Oversell));
    }

    #[tokio::test]
    async fn test_missing_tx_ref_is_tagged_unverified() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 1_000, None));

        let fills = ledger.poll(&[tok()], 10_000).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].provenance, Provenance::Unverified);
        assert!(!ledger.is_safe_for_live());
        assert_eq!(ledger.summary().unverified_fills, 1);
    }

    #[tokio::test]
    async fn test_poll_interval_enforced() {
        let (venue, ledger) = setup();
        ledger.poll(&[tok()], 10_000).await;
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));

        assert!(ledger.poll(&[tok()], 10_500).await.is_empty());
        assert_eq!(ledger.poll(&[tok()], 15_000).await.len(), 1);
    }

    #[tokio::test]
    async fn test_venue_error_returns_empty_and_stays_live_safe() {
        let (venue, ledger) = setup();
        venue.set_failing(MockCall::Trades, true);

        assert!(ledger.poll(&[tok()], 10_000).await.is_empty());
        assert_eq!(ledger.violations()[0].kind, ViolationKind::VenueError);
        assert!(ledger.is_safe_for_live());
    }

    #[tokio::test]
    async fn test_boundary_and_instrument_filter() {
        let (venue, ledger) = setup();
        ledger.set_boundary_now(10_000);
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 7_000, Some("0xaaaaaaaaaaaa01")));
        venue.push_trade(trade("BUY", dec!(4), dec!(0.50), 9_000, Some("0xaaaaaaaaaaaa02")));
        let mut other = trade("BUY", dec!(3), dec!(0.50), 9_500, Some("0xaaaaaaaaaaaa03"));
        other.asset = "tok-other".to_string();
        venue.push_trade(other);

        let fills = ledger.poll(&[tok()], 10_000).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].size.inner(), dec!(4));
    }

    #[tokio::test]
    async fn test_malformed_trade_is_dropped() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("HOLD", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));
        venue.push_trade(trade("BUY", dec!(0), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa02")));

        assert!(ledger.poll(&[tok()], 10_000).await.is_empty());
        assert_eq!(ledger.violations().len(), 2);
        assert!(!ledger.is_safe_for_live());
    }

    #[tokio::test]
    async fn test_missing_timestamp_is_violation_not_boundary_skip() {
        let (venue, ledger) = setup();
        ledger.set_boundary(5_000);
        let mut undated = trade("BUY", dec!(10), dec!(0.50), 0, Some("0xaaaaaaaaaaaa01"));
        undated.timestamp_ms = None;
        venue.push_trade(undated);
        venue.push_trade(trade("BUY", dec!(5), dec!(0.50), 6_000, Some("0xaaaaaaaaaaaa02")));

        let fills = ledger.poll(&[tok()], 10_000).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].size, Size::new(dec!(5)));

        let violations = ledger.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::Malformed);
        assert!(violations[0].detail.contains("missing timestamp"));
        assert!(!ledger.is_safe_for_live());
    }

    #[tokio::test]
    async fn test_reset_clears_session() {
        let (venue, ledger) = setup();
        venue.push_trade(trade("BUY", dec!(10), dec!(0.50), 1_000, Some("0xaaaaaaaaaaaa01")));
        ledger.poll(&[tok()], 10_000).await;
        ledger.reset();
        assert!(ledger.fills().is_empty());
        assert_eq!(ledger.summary(), FillSummary::default());
    }

    #[tokio::test]
    async fn test_shares_never_negative_for_mixed_sequence() {
        let (venue, ledger) = setup();
        let sequence = [
            ("BUY", dec!(5), dec!(0.40)),
            ("SELL", dec!(7), dec!(0.45)),
            ("SELL", dec!(1), dec!(0.45)),
            ("BUY", dec!(2), dec!(0.41)),
            ("SELL", dec!(2), dec!(0.39)),
        ];
        for (i, (side, size, price)) in sequence.iter().enumerate() {
            let tx = format!("0xbbbbbbbbbbbb{i:02}");
            venue.push_trade(trade(side, *size, *price, 1_000 + i as u64, Some(tx.as_str())));
        }
        ledger.poll(&[tok()], 10_000).await;
        assert!(ledger.confirmed_shares(&tok()) >= Size::ZERO);
        assert_eq!(ledger.confirmed_shares(&tok()), Size::ZERO);
    }
}
