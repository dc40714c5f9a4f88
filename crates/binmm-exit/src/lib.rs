//! Exit supervision for binmm.
//!
//! For every instrument with shares, make sure a protective sell is resting
//! and tighten it as the position ages or moves against entry:
//! - `ExitMode`: normal, aggressive, emergency (never de-escalates)
//! - `EmergencyState`: one-time per instrument, spaced and capped attempts
//! - Balance/allowance rejections force a reconcile and clamp the size

pub mod error;
pub mod mode;
pub mod supervisor;

pub use error::{ExitError, ExitResult};
pub use mode::{DustMode, EmergencyState, ExitConfig, ExitMode};
pub use supervisor::{ExitAction, ExitEvent, ExitMetrics, ExitRecord, ExitSupervisor};
