//! Entry proposals.
//!
//! Quote computation lives outside the safety core; the loop only consumes
//! ready-made (instrument, price, size) proposals. `JoinBidProposer` is the
//! built-in one: join the best bid on a flat instrument when the spread is
//! wide enough.

use serde::{Deserialize, Serialize};

use binmm_core::{BookTop, InstrumentId, Price, Size};
use rust_decimal::Decimal;

/// Entry settings for the built-in proposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Shares per entry.
    #[serde(default = "default_size")]
    pub size: Decimal,
    /// Minimum spread to quote into.
    #[serde(default = "default_min_spread")]
    pub min_spread: Decimal,
    /// No new entries this close to settlement.
    #[serde(default = "default_stop_before_deadline_ms")]
    pub stop_before_deadline_ms: u64,
}

fn default_size() -> Decimal {
    Decimal::from(5)
}

fn default_min_spread() -> Decimal {
    Decimal::new(2, 2)
}

fn default_stop_before_deadline_ms() -> u64 {
    60_000
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: default_size(),
            min_spread: default_min_spread(),
            stop_before_deadline_ms: default_stop_before_deadline_ms(),
        }
    }
}

/// A buy the entry logic would like resting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryProposal {
    pub instrument: InstrumentId,
    pub price: Price,
    pub size: Size,
}

/// Source of entry proposals.
pub trait EntryProposer: Send + Sync {
    /// Proposal for one instrument, given its book and current holdings.
    fn propose(
        &self,
        instrument: &InstrumentId,
        book: &BookTop,
        held: Size,
        time_to_deadline_ms: Option<u64>,
    ) -> Option<EntryProposal>;
}

/// Join the best bid on flat instruments.
pub struct JoinBidProposer {
    config: EntryConfig,
}

impl JoinBidProposer {
    pub fn new(config: EntryConfig) -> Self {
        Self { config }
    }
}

impl EntryProposer for JoinBidProposer {
    fn propose(
        &self,
        instrument: &InstrumentId,
        book: &BookTop,
        held: Size,
        time_to_deadline_ms: Option<u64>,
    ) -> Option<EntryProposal> {
        if !self.config.enabled || !held.is_flat() || !book.has_valid_bid() {
            return None;
        }
        if time_to_deadline_ms.is_some_and(|t| t < self.config.stop_before_deadline_ms) {
            return None;
        }
        if book.best_ask.saturating_sub(book.best_bid) < self.config.min_spread {
            return None;
        }
        Some(EntryProposal {
            instrument: instrument.clone(),
            price: book.best_bid,
            size: Size::new(self.config.size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn proposer() -> JoinBidProposer {
        JoinBidProposer::new(EntryConfig {
            enabled: true,
            ..EntryConfig::default()
        })
    }

    fn book(bid: Decimal, ask: Decimal) -> BookTop {
        BookTop::new(Price::new(bid), Price::new(ask))
    }

    #[test]
    fn test_joins_bid_when_flat_and_wide() {
        let tok = InstrumentId::from("tok-yes");
        let p = proposer()
            .propose(&tok, &book(dec!(0.45), dec!(0.48)), Size::ZERO, None)
            .unwrap();
        assert_eq!(p.price.inner(), dec!(0.45));
        assert_eq!(p.size, Size::new(dec!(5)));
    }

    #[test]
    fn test_no_proposal_when_holding_tight_or_late() {
        let tok = InstrumentId::from("tok-yes");
        let p = proposer();
        let wide = book(dec!(0.45), dec!(0.48));
        assert!(p.propose(&tok, &wide, Size::new(dec!(5)), None).is_none());
        assert!(p.propose(&tok, &book(dec!(0.45), dec!(0.46)), Size::ZERO, None).is_none());
        assert!(p.propose(&tok, &wide, Size::ZERO, Some(30_000)).is_none());
        assert!(p.propose(&tok, &BookTop::empty(), Size::ZERO, None).is_none());
    }

    #[test]
    fn test_disabled_by_default() {
        let p = JoinBidProposer::new(EntryConfig::default());
        let tok = InstrumentId::from("tok-yes");
        assert!(p.propose(&tok, &book(dec!(0.40), dec!(0.50)), Size::ZERO, None).is_none());
    }
}
