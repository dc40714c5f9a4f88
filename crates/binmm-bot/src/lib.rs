//! binmm control loop.
//!
//! Wires the safety core together and drives it on a fixed tick:
//! - Fill ledger poll, position reconcile, exit supervision
//! - Entry proposals behind the balance gate and kill switch
//! - Safety evaluation, event log, periodic metrics snapshot

pub mod app;
pub mod config;
pub mod entry;
pub mod error;

pub use app::{Application, TickReport};
pub use config::{AppConfig, RunMode};
pub use entry::{EntryConfig, EntryProposal, EntryProposer, JoinBidProposer};
pub use error::{AppError, AppResult};
