//! Exit modes, thresholds and emergency bookkeeping.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use binmm_core::{BookTop, Price};

/// Urgency of an exit. Ordered: a record only ever moves up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitMode {
    /// Maker sell near the ask.
    Normal,
    /// Sell toward entry or better.
    Aggressive,
    /// Sell at the bid, crossing when allowed.
    Emergency,
}

impl ExitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for ExitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with holdings below the venue minimum order size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DustMode {
    /// Keep to settlement; no exit is submitted.
    #[default]
    Hold,
    /// Submit an exit anyway (venues without a minimum).
    Exit,
}

/// Exit supervisor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    /// Adverse excursion that escalates to aggressive.
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,
    /// Adverse excursion that escalates to emergency.
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: Decimal,
    /// Exit age that escalates to aggressive.
    #[serde(default = "default_scratch_after_ms")]
    pub scratch_after_ms: u64,
    /// Exit age that escalates to emergency.
    #[serde(default = "default_flatten_after_ms")]
    pub flatten_after_ms: u64,
    #[serde(default = "default_reprice_normal_ms")]
    pub reprice_normal_ms: u64,
    #[serde(default = "default_reprice_aggressive_ms")]
    pub reprice_aggressive_ms: u64,
    /// Spacing of emergency attempts.
    #[serde(default = "default_reprice_emergency_ms")]
    pub reprice_emergency_ms: u64,
    /// Cross the spread in emergency instead of quoting post-only at the bid.
    #[serde(default)]
    pub emergency_taker: bool,
    #[serde(default = "default_max_emergency_attempts")]
    pub max_emergency_attempts: u32,
    /// Venue minimum order size (shares).
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Decimal,
    #[serde(default)]
    pub dust_mode: DustMode,
}

fn default_tick_size() -> Decimal {
    Price::TICK.inner()
}

fn default_stop_loss() -> Decimal {
    Decimal::new(2, 2)
}

fn default_emergency_threshold() -> Decimal {
    Decimal::new(3, 2)
}

fn default_scratch_after_ms() -> u64 {
    20_000
}

fn default_flatten_after_ms() -> u64 {
    40_000
}

fn default_reprice_normal_ms() -> u64 {
    500
}

fn default_reprice_aggressive_ms() -> u64 {
    250
}

fn default_reprice_emergency_ms() -> u64 {
    1_500
}

fn default_max_emergency_attempts() -> u32 {
    10
}

fn default_min_order_size() -> Decimal {
    Decimal::from(5)
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            tick_size: default_tick_size(),
            stop_loss: default_stop_loss(),
            emergency_threshold: default_emergency_threshold(),
            scratch_after_ms: default_scratch_after_ms(),
            flatten_after_ms: default_flatten_after_ms(),
            reprice_normal_ms: default_reprice_normal_ms(),
            reprice_aggressive_ms: default_reprice_aggressive_ms(),
            reprice_emergency_ms: default_reprice_emergency_ms(),
            emergency_taker: false,
            max_emergency_attempts: default_max_emergency_attempts(),
            min_order_size: default_min_order_size(),
            dust_mode: DustMode::Hold,
        }
    }
}

impl ExitConfig {
    /// Mode demanded by the current excursion and exit age.
    pub fn target_mode(&self, adverse: Decimal, age_ms: u64) -> ExitMode {
        if adverse >= self.emergency_threshold || age_ms >= self.flatten_after_ms {
            ExitMode::Emergency
        } else if adverse >= self.stop_loss || age_ms >= self.scratch_after_ms {
            ExitMode::Aggressive
        } else {
            ExitMode::Normal
        }
    }

    pub fn reprice_interval_ms(&self, mode: ExitMode) -> u64 {
        match mode {
            ExitMode::Normal => self.reprice_normal_ms,
            ExitMode::Aggressive => self.reprice_aggressive_ms,
            ExitMode::Emergency => self.reprice_emergency_ms,
        }
    }

    /// Sell price for a mode, on the tick grid inside [0.01, 0.99].
    pub fn exit_price(&self, mode: ExitMode, book: &BookTop, entry: Price) -> Price {
        let tick = Price::new(self.tick_size);
        let bid = book.best_bid;
        let ask = book.best_ask;
        let raw = match mode {
            ExitMode::Normal => (ask - tick).max(bid + tick),
            ExitMode::Aggressive => (bid + tick).max(entry.min(ask - tick)),
            ExitMode::Emergency => bid,
        };
        raw.round_to_tick(tick).clamp_to(Price::MIN, Price::MAX)
    }

    /// Whether the emergency order should take liquidity.
    pub fn crosses(&self, mode: ExitMode) -> bool {
        mode == ExitMode::Emergency && self.emergency_taker
    }
}

/// Per-instrument emergency bookkeeping. Entered once, cleared on flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmergencyState {
    pub entered_at_ms: u64,
    pub last_action_ms: Option<u64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub spacing_ms: u64,
    /// "Manual intervention" already reported.
    pub reported: bool,
}

impl EmergencyState {
    pub fn new(now_ms: u64, max_attempts: u32, spacing_ms: u64) -> Self {
        Self {
            entered_at_ms: now_ms,
            last_action_ms: None,
            attempts: 0,
            max_attempts,
            spacing_ms,
            reported: false,
        }
    }

    pub fn should_act(&self, now_ms: u64) -> bool {
        self.last_action_ms
            .map(|t| now_ms.saturating_sub(t) >= self.spacing_ms)
            .unwrap_or(true)
    }

    pub fn record_action(&mut self, now_ms: u64) {
        self.last_action_ms = Some(now_ms);
        self.attempts += 1;
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
