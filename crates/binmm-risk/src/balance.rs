//! Balance gate.
//!
//! Only spendable cash sizes buys. Equity (cash plus marked positions) is
//! reported for operators and never consulted by the gate.

use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use binmm_core::{InstrumentId, Price, Size};
use binmm_orders::OrderLedger;
use binmm_position::PositionStore;
use binmm_telemetry::Metrics;
use binmm_venue::DynVenue;

use crate::error::RiskResult;

// ============================================================================
// Config
// ============================================================================

/// Balance gate limits (USDC and shares).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Cash held back from every spendable computation.
    #[serde(default = "default_buffer")]
    pub buffer: Decimal,
    /// Venue minimum order notional.
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,
    /// Inventory cap per instrument, counting the proposed buy.
    #[serde(default = "default_max_shares_per_instrument")]
    pub max_shares_per_instrument: Decimal,
    /// Cap on cash locked in resting buys, counting the proposed buy.
    #[serde(default = "default_max_usdc_locked")]
    pub max_usdc_locked: Decimal,
}

fn default_buffer() -> Decimal {
    Decimal::new(50, 2)
}

fn default_min_notional() -> Decimal {
    Decimal::ONE
}

fn default_max_shares_per_instrument() -> Decimal {
    Decimal::from(50)
}

fn default_max_usdc_locked() -> Decimal {
    Decimal::from(10)
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            buffer: default_buffer(),
            min_notional: default_min_notional(),
            max_shares_per_instrument: default_max_shares_per_instrument(),
            max_usdc_locked: default_max_usdc_locked(),
        }
    }
}

// ============================================================================
// AccountSnapshot
// ============================================================================

/// Account figures at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    /// Σ price × remaining over resting buys.
    pub locked: Decimal,
    /// Positions marked at best bid.
    pub positions_value: Decimal,
    /// `max(0, cash − locked − buffer)`.
    pub spendable: Decimal,
    /// `cash + positions_value`. Observability only.
    pub equity: Decimal,
    pub at_ms: u64,
}

impl AccountSnapshot {
    pub fn compute(
        cash: Decimal,
        locked: Decimal,
        positions_value: Decimal,
        buffer: Decimal,
        at_ms: u64,
    ) -> Self {
        let spendable = (cash - locked - buffer).max(Decimal::ZERO);
        Self {
            cash,
            locked,
            positions_value,
            spendable,
            equity: cash + positions_value,
            at_ms,
        }
    }
}

// ============================================================================
// BuyDecision
// ============================================================================

/// Result of a buy-side check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyDecision {
    pub ok: bool,
    /// Why the buy was rejected or resized.
    pub reason: Option<String>,
    /// Size to submit when `ok`; zero otherwise.
    pub adjusted_size: Size,
}

impl BuyDecision {
    fn accept(size: Size) -> Self {
        Self {
            ok: true,
            reason: None,
            adjusted_size: size,
        }
    }

    fn resized(size: Size, reason: String) -> Self {
        Self {
            ok: true,
            reason: Some(reason),
            adjusted_size: size,
        }
    }

    fn reject(reason: String) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            adjusted_size: Size::ZERO,
        }
    }

    fn label(&self) -> &'static str {
        match (self.ok, self.reason.is_some()) {
            (true, false) => "accepted",
            (true, true) => "resized",
            (false, _) => "rejected",
        }
    }
}

// ============================================================================
// BalanceGate
// ============================================================================

/// Spendable-cash gate for entry buys.
pub struct BalanceGate {
    venue: DynVenue,
    account: String,
    config: BalanceConfig,
    orders: Arc<OrderLedger>,
    positions: Arc<PositionStore>,
    last: Mutex<Option<AccountSnapshot>>,
}

impl BalanceGate {
    pub fn new(
        venue: DynVenue,
        account: impl Into<String>,
        config: BalanceConfig,
        orders: Arc<OrderLedger>,
        positions: Arc<PositionStore>,
    ) -> Self {
        Self {
            venue,
            account: account.into(),
            config,
            orders,
            positions,
            last: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BalanceConfig {
        &self.config
    }

    /// Fetch cash from the venue and combine it with locked and marked value.
    ///
    /// On a venue error the previous snapshot stays cached.
    pub async fn snapshot(&self, now_ms: u64) -> RiskResult<AccountSnapshot> {
        let cash = self.venue.get_balance(&self.account).await?;
        let snapshot = AccountSnapshot::compute(
            cash,
            self.orders.locked_notional(),
            self.positions.total_mtm(),
            self.config.buffer,
            now_ms,
        );

        Metrics::account(
            snapshot.spendable.to_f64().unwrap_or(0.0),
            snapshot.equity.to_f64().unwrap_or(0.0),
        );
        debug!(
            cash = %snapshot.cash,
            locked = %snapshot.locked,
            positions = %snapshot.positions_value,
            spendable = %snapshot.spendable,
            equity = %snapshot.equity,
            "Account snapshot"
        );

        *self.last.lock() = Some(snapshot.clone());
        Ok(snapshot)
    }

    pub fn last_snapshot(&self) -> Option<AccountSnapshot> {
        self.last.lock().clone()
    }

    /// Check a buy against the last snapshot and current holdings.
    ///
    /// Without a snapshot every buy is rejected.
    pub fn can_place_buy(
        &self,
        instrument: &InstrumentId,
        price: Price,
        size: Size,
    ) -> BuyDecision {
        let decision = match self.last_snapshot() {
            Some(snapshot) => {
                let held = self.positions.get_shares(instrument);
                self.evaluate(&snapshot, held, price, size)
            }
            None => BuyDecision::reject("no account snapshot".to_string()),
        };

        Metrics::buy_gate(decision.label());
        if !decision.ok {
            info!(
                instrument = %instrument,
                price = %price,
                size = %size,
                reason = decision.reason.as_deref().unwrap_or(""),
                "Buy rejected by balance gate"
            );
        }
        decision
    }

    /// Pure decision for a buy of `size` at `price` with `held` shares already owned.
    pub fn evaluate(
        &self,
        snapshot: &AccountSnapshot,
        held: Size,
        price: Price,
        size: Size,
    ) -> BuyDecision {
        if !price.is_positive() || !size.is_positive() {
            return BuyDecision::reject(format!("invalid buy {size}@{price}"));
        }

        let cap = self.config.max_shares_per_instrument;
        let notional = size.notional(price);

        if notional < self.config.min_notional {
            let required = (self.config.min_notional / price.inner()).floor() + Decimal::ONE;
            let required_notional = required * price.inner();
            if held.inner() + required > cap {
                return BuyDecision::reject(format!(
                    "min notional needs {required} shares, exceeds cap {cap} (held {held})"
                ));
            }
            if required_notional > snapshot.spendable {
                return BuyDecision::reject(format!(
                    "min notional needs {required_notional}, spendable {}",
                    snapshot.spendable
                ));
            }
            if snapshot.locked + required_notional > self.config.max_usdc_locked {
                return BuyDecision::reject(format!(
                    "locked {} + {required_notional} exceeds max {}",
                    snapshot.locked, self.config.max_usdc_locked
                ));
            }
            return BuyDecision::resized(
                Size::new(required),
                format!("raised {size} to {required} for min notional"),
            );
        }

        if held.inner() + size.inner() > cap {
            return BuyDecision::reject(format!("inventory cap {cap}: held {held} + {size}"));
        }

        if notional > snapshot.spendable {
            return BuyDecision::reject(format!(
                "shortfall {}: notional {notional} > spendable {}",
                notional - snapshot.spendable,
                snapshot.spendable
            ));
        }

        if snapshot.locked + notional > self.config.max_usdc_locked {
            return BuyDecision::reject(format!(
                "locked {} + {notional} exceeds max {}",
                snapshot.locked, self.config.max_usdc_locked
            ));
        }

        BuyDecision::accept(size)
    }
}
