//! Top-of-book snapshot.

use serde::{Deserialize, Serialize};

use crate::Price;

/// Best bid and ask for one instrument.
///
/// Binary-outcome books are padded with placeholder levels at 0.01 and 0.99.
/// Those are not real liquidity, so a bid at or below 0.01 means "no bid" and
/// an ask at or above 0.99 means "no ask".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Price,
    pub best_ask: Price,
}

impl BookTop {
    pub fn new(best_bid: Price, best_ask: Price) -> Self {
        Self { best_bid, best_ask }
    }

    /// A book with no real liquidity on either side.
    pub fn empty() -> Self {
        Self::new(Price::MIN, Price::MAX)
    }

    /// Build from raw price levels, skipping placeholders.
    pub fn from_levels(bids: &[Price], asks: &[Price]) -> Self {
        let best_bid = bids
            .iter()
            .copied()
            .filter(|p| *p > Price::MIN)
            .max()
            .unwrap_or(Price::MIN);
        let best_ask = asks
            .iter()
            .copied()
            .filter(|p| *p < Price::MAX)
            .min()
            .unwrap_or(Price::MAX);
        Self { best_bid, best_ask }
    }

    /// True when the bid side is real (required to value or exit a position).
    #[inline]
    pub fn has_valid_bid(&self) -> bool {
        self.best_bid > Price::MIN
    }

    #[inline]
    pub fn has_liquidity(&self) -> bool {
        self.has_valid_bid() && self.best_ask < Price::MAX
    }

    #[inline]
    pub fn spread(&self) -> Price {
        self.best_ask - self.best_bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p(v: rust_decimal::Decimal) -> Price {
        Price::new(v)
    }

    #[test]
    fn test_from_levels_skips_placeholders() {
        let book = BookTop::from_levels(
            &[p(dec!(0.01)), p(dec!(0.44)), p(dec!(0.45))],
            &[p(dec!(0.99)), p(dec!(0.48)), p(dec!(0.47))],
        );
        assert_eq!(book.best_bid, p(dec!(0.45)));
        assert_eq!(book.best_ask, p(dec!(0.47)));
        assert!(book.has_liquidity());
        assert_eq!(book.spread(), p(dec!(0.02)));
    }

    #[test]
    fn test_placeholder_only_book_has_no_bid() {
        let book = BookTop::from_levels(&[p(dec!(0.01))], &[p(dec!(0.99))]);
        assert!(!book.has_valid_bid());
        assert!(!book.has_liquidity());
        assert_eq!(book, BookTop::empty());
    }
}
