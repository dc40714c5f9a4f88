//! Account and process-level safety for binmm.
//!
//! - `BalanceGate`: spendable cash and the buy-side notional check
//! - `KillSwitch`: monotonic halt of new entries for the process lifetime
//! - `SafetyMonitor`: inventory without protection, repeated reconcile mismatches
//! - `InstanceLease`: single-runner lease file, released on drop
//! - `startup`: environment and inventory checks before the loop starts

pub mod balance;
pub mod error;
pub mod kill_switch;
pub mod lease;
pub mod safety;
pub mod startup;

pub use balance::{AccountSnapshot, BalanceConfig, BalanceGate, BuyDecision};
pub use error::{RiskError, RiskResult};
pub use kill_switch::{KillReason, KillSwitch};
pub use lease::{InstanceLease, LeaseRecord};
pub use safety::{SafetyConfig, SafetyMonitor, SafetyViolation};
pub use startup::{check_startup_requirements, StartupInventory, EXIT_ENFORCED_ENV};
