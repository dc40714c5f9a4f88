//! Startup checks.
//!
//! Live trading refuses to start unless the operator has confirmed that exit
//! enforcement is on. Inventory and resting orders already on the venue are
//! adopted before the first tick so the exit supervisor protects them.

use serde::Serialize;
use tracing::{info, warn};

use binmm_orders::OrderLedger;
use binmm_position::{Position, PositionStore};

use crate::error::{RiskError, RiskResult};

/// Environment variable that must be `1` for live mode.
pub const EXIT_ENFORCED_ENV: &str = "BINMM_EXIT_ENFORCED";

/// Check process-level requirements for starting.
///
/// `exit_enforced` is the value of [`EXIT_ENFORCED_ENV`], if set.
pub fn check_startup_requirements(live: bool, exit_enforced: Option<&str>) -> RiskResult<()> {
    if live && exit_enforced != Some("1") {
        return Err(RiskError::Startup(format!(
            "live mode requires {EXIT_ENFORCED_ENV}=1"
        )));
    }
    Ok(())
}

/// What was already on the account at startup.
#[derive(Debug, Clone, Serialize)]
pub struct StartupInventory {
    pub positions: Vec<Position>,
    /// Venue orders tracked after the initial sync.
    pub open_orders: usize,
    /// Colliding venue orders that were cancelled.
    pub strays_cancelled: usize,
}

impl StartupInventory {
    /// Reconcile holdings and resting orders before the first tick.
    pub async fn scan(
        positions: &PositionStore,
        orders: &OrderLedger,
        now_ms: u64,
    ) -> RiskResult<Self> {
        let found = positions.startup_inventory(now_ms).await?;
        let strays_cancelled = orders.reconcile_orders(now_ms).await?;
        let open_orders = orders.active_count();

        if found.is_empty() {
            info!(open_orders, "No inventory at startup");
        } else {
            warn!(
                positions = found.len(),
                open_orders,
                strays_cancelled,
                "Starting with existing inventory; exits will be enforced first"
            );
        }

        Ok(Self {
            positions: found,
            open_orders,
            strays_cancelled,
        })
    }

    pub fn has_inventory(&self) -> bool {
        !self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use binmm_core::{InstrumentId, OrderSide, PostOrderRequest, Price, Size};
    use binmm_orders::OrderLedgerConfig;
    use binmm_position::ReconcileConfig;
    use binmm_venue::{MockVenue, Venue};
    use rust_decimal_macros::dec;

    #[test]
    fn test_live_requires_exit_enforced() {
        assert!(check_startup_requirements(false, None).is_ok());
        assert!(check_startup_requirements(true, None).is_err());
        assert!(check_startup_requirements(true, Some("0")).is_err());
        assert!(check_startup_requirements(true, Some("1")).is_ok());
    }

    #[tokio::test]
    async fn test_scan_adopts_holdings_and_resting_exit() {
        let venue = Arc::new(MockVenue::new());
        let tok = InstrumentId::from("tok-yes");
        venue.set_position(&tok, dec!(12), dec!(0.48));
        venue
            .post_order(&PostOrderRequest::new(
                tok.clone(),
                OrderSide::Sell,
                Price::new(dec!(0.52)),
                Size::new(dec!(12)),
            ))
            .await
            .unwrap();

        let positions = PositionStore::new(venue.clone(), "0xacct", ReconcileConfig::default());
        let orders = OrderLedger::new(venue.clone(), OrderLedgerConfig::default());

        let inv = StartupInventory::scan(&positions, &orders, 0).await.unwrap();
        assert!(inv.has_inventory());
        assert_eq!(inv.positions[0].shares, Size::new(dec!(12)));
        assert_eq!(inv.open_orders, 1);
        assert!(orders.has_exit_order(&tok));
    }
}
