//! Application configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use binmm_core::{InstrumentId, MarketPair};
use binmm_exit::ExitConfig;
use binmm_fills::FillLedgerConfig;
use binmm_orders::OrderLedgerConfig;
use binmm_position::ReconcileConfig;
use binmm_risk::{BalanceConfig, SafetyConfig};
use binmm_venue::HttpVenueConfig;
use rust_decimal::Decimal;

use crate::entry::EntryConfig;
use crate::error::{AppError, AppResult};

/// Tick interval bounds (ms).
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const MAX_TICK_INTERVAL_MS: u64 = 1_000;

/// Run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Live books, simulated account, nothing fills.
    #[default]
    Dryrun,
    /// Live books, simulated account, crossed orders fill.
    Paper,
    /// Real orders through the signing gateway.
    Live,
}

/// The market window being traded. Discovery happens elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default)]
    pub yes: String,
    #[serde(default)]
    pub no: String,
    /// Settlement deadline (Unix ms). 0 when unknown.
    #[serde(default)]
    pub deadline_ms: u64,
}

impl MarketConfig {
    pub fn pair(&self) -> AppResult<MarketPair> {
        let yes = InstrumentId::new(self.yes.clone())
            .map_err(|e| AppError::Config(format!("market.yes: {e}")))?;
        let no = InstrumentId::new(self.no.clone())
            .map_err(|e| AppError::Config(format!("market.no: {e}")))?;
        Ok(MarketPair::new(yes, no, self.deadline_ms))
    }
}

/// Venue endpoints and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    #[serde(default = "default_data_url")]
    pub data_url: String,
    /// Local signing gateway for order writes.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_book_timeout_ms")]
    pub book_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_data_url() -> String {
    "https://data-api.polymarket.com".to_string()
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_book_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            clob_url: default_clob_url(),
            data_url: default_data_url(),
            gateway_url: default_gateway_url(),
            book_timeout_ms: default_book_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl From<&VenueConfig> for HttpVenueConfig {
    fn from(cfg: &VenueConfig) -> Self {
        Self {
            clob_url: cfg.clob_url.clone(),
            data_url: cfg.data_url.clone(),
            gateway_url: cfg.gateway_url.clone(),
            book_timeout: Duration::from_millis(cfg.book_timeout_ms),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        }
    }
}

/// Control loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Log a metrics snapshot every N ticks (0 disables).
    #[serde(default = "default_metrics_every_ticks")]
    pub metrics_every_ticks: u64,
    /// JSON-lines event log. Empty disables it.
    #[serde(default = "default_event_log_path")]
    pub event_log_path: String,
    #[serde(default = "default_lease_path")]
    pub lease_path: String,
    /// Heartbeat age after which the lease may be taken over.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    /// Simulated cash for dryrun and paper modes.
    #[serde(default = "default_sim_starting_cash")]
    pub sim_starting_cash: Decimal,
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_metrics_every_ticks() -> u64 {
    120
}

fn default_event_log_path() -> String {
    "logs/events.jsonl".to_string()
}

fn default_lease_path() -> String {
    "binmm.lease".to_string()
}

fn default_lease_ttl_ms() -> u64 {
    10_000
}

fn default_sim_starting_cash() -> Decimal {
    Decimal::from(20)
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            metrics_every_ticks: default_metrics_every_ticks(),
            event_log_path: default_event_log_path(),
            lease_path: default_lease_path(),
            lease_ttl_ms: default_lease_ttl_ms(),
            sim_starting_cash: default_sim_starting_cash(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Trading account (proxy wallet address).
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default, rename = "loop")]
    pub control: LoopConfig,
    #[serde(default)]
    pub fills: FillLedgerConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub orders: OrderLedgerConfig,
    #[serde(default)]
    pub exit: ExitConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub entry: EntryConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn is_live(&self) -> bool {
        self.mode == RunMode::Live
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.control.tick_interval_ms)
    }

    /// Every problem found, empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.is_live() {
            if self.account.trim().is_empty() {
                errors.push("live mode requires account".to_string());
            }
            if self.venue.gateway_url.trim().is_empty() {
                errors.push("live mode requires venue.gateway_url".to_string());
            }
        }
        if let Err(e) = self.market.pair() {
            errors.push(e.to_string());
        } else if self.market.yes == self.market.no {
            errors.push("market.yes and market.no must differ".to_string());
        }

        let tick = self.control.tick_interval_ms;
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&tick) {
            errors.push(format!(
                "loop.tick_interval_ms {tick} outside \
                 {MIN_TICK_INTERVAL_MS}..={MAX_TICK_INTERVAL_MS}"
            ));
        }
        if self.control.lease_ttl_ms <= tick {
            errors.push("loop.lease_ttl_ms must exceed the tick interval".to_string());
        }

        if self.exit.stop_loss <= Decimal::ZERO {
            errors.push("exit.stop_loss must be positive".to_string());
        }
        if self.exit.stop_loss >= self.exit.emergency_threshold {
            errors.push("exit.stop_loss must be below exit.emergency_threshold".to_string());
        }
        if self.exit.scratch_after_ms >= self.exit.flatten_after_ms {
            errors.push("exit.scratch_after_ms must be below exit.flatten_after_ms".to_string());
        }
        if self.exit.max_emergency_attempts == 0 {
            errors.push("exit.max_emergency_attempts must be positive".to_string());
        }

        if self.orders.max_replaces_per_minute == 0 {
            errors.push("orders.max_replaces_per_minute must be positive".to_string());
        }
        if self.balance.max_usdc_locked <= Decimal::ZERO {
            errors.push("balance.max_usdc_locked must be positive".to_string());
        }
        if self.balance.max_shares_per_instrument <= Decimal::ZERO {
            errors.push("balance.max_shares_per_instrument must be positive".to_string());
        }
        if self.balance.buffer < Decimal::ZERO {
            errors.push("balance.buffer must not be negative".to_string());
        }
        if self.safety.mismatch_threshold == 0 {
            errors.push("safety.mismatch_threshold must be positive".to_string());
        }
        if self.entry.enabled && self.entry.size <= Decimal::ZERO {
            errors.push("entry.size must be positive".to_string());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
        mode = "paper"

        [market]
        yes = "tok-yes"
        no = "tok-no"
    "#;

    #[test]
    fn test_defaults_from_minimal_file() {
        let config = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.mode, RunMode::Paper);
        assert_eq!(config.control.tick_interval_ms, 500);
        assert_eq!(config.exit.stop_loss, dec!(0.02));
        assert_eq!(config.balance.buffer, dec!(0.50));
        assert_eq!(config.orders.max_replaces_per_minute, 20);
        assert_eq!(config.safety.inventory_without_exit_ms, 10_000);
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_sections_override() {
        let config = AppConfig::from_toml(
            r#"
            mode = "dryrun"
            [market]
            yes = "a"
            no = "b"
            [loop]
            tick_interval_ms = 250
            [exit]
            stop_loss = 0.03
            emergency_threshold = 0.05
            emergency_taker = true
            dust_mode = "exit"
            "#,
        )
        .unwrap();
        assert_eq!(config.control.tick_interval_ms, 250);
        assert_eq!(config.exit.emergency_threshold, dec!(0.05));
        assert!(config.exit.emergency_taker);
        assert_eq!(config.exit.dust_mode, binmm_exit::DustMode::Exit);
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = AppConfig::from_toml(MINIMAL).unwrap();
        config.mode = RunMode::Live;
        config.control.tick_interval_ms = 50;
        config.exit.stop_loss = dec!(0.05);
        config.exit.scratch_after_ms = 60_000;

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("account")));
        assert!(errors.iter().any(|e| e.contains("tick_interval_ms")));
        assert!(errors.iter().any(|e| e.contains("stop_loss")));
        assert!(errors.iter().any(|e| e.contains("scratch_after_ms")));
    }

    #[test]
    fn test_missing_market_rejected() {
        let config = AppConfig::default();
        assert!(config.validate().iter().any(|e| e.contains("market.yes")));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("mode"));
        assert!(toml_str.contains("tick_interval_ms"));
    }
}
