//! Dedupe keys for raw trades.
//!
//! The key must be identical across repeated polls of the same trade. A venue
//! transaction reference anchors it; when the reference is missing the key
//! falls back to the remaining trade fields and the fill is tagged
//! unverified, since two genuinely distinct trades can then collide.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use binmm_core::{OrderSide, Provenance};

/// References shorter than this are treated as missing.
pub const MIN_TX_REF_LEN: usize = 10;

/// Build the dedupe key and provenance for one trade.
pub fn dedupe_key(
    tx_ref: Option<&str>,
    asset: &str,
    side: OrderSide,
    size: Decimal,
    price: Decimal,
    timestamp_ms: u64,
) -> (String, Provenance) {
    let (anchor, provenance) = match tx_ref.map(str::trim) {
        Some(tx) if tx.len() >= MIN_TX_REF_LEN => (tx, Provenance::Verified),
        _ => ("untrusted", Provenance::Unverified),
    };
    let raw = format!(
        "{anchor}_{asset}_{side}_{}_{}_{timestamp_ms}",
        size.normalize(),
        price.normalize()
    );
    let digest = Sha256::digest(raw.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(32);
    (key, provenance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_key_stable_across_decimal_scale() {
        let (a, pa) = dedupe_key(
            Some("0xabcdef0123456789"),
            "tok",
            OrderSide::Buy,
            dec!(10),
            dec!(0.5),
            1_000,
        );
        let (b, _) = dedupe_key(
            Some("0xabcdef0123456789"),
            "tok",
            OrderSide::Buy,
            dec!(10.00),
            dec!(0.50),
            1_000,
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(pa, Provenance::Verified);
    }

    #[test]
    fn test_short_or_missing_reference_is_unverified() {
        let (_, p1) = dedupe_key(None, "tok", OrderSide::Sell, dec!(1), dec!(0.4), 1);
        let (_, p2) = dedupe_key(Some("0x12"), "tok", OrderSide::Sell, dec!(1), dec!(0.4), 1);
        assert_eq!(p1, Provenance::Unverified);
        assert_eq!(p2, Provenance::Unverified);
    }

    #[test]
    fn test_distinct_trades_in_one_transaction_get_distinct_keys() {
        let tx = Some("0xfeedfacefeedface");
        let (a, _) = dedupe_key(tx, "tok", OrderSide::Buy, dec!(5), dec!(0.5), 1_000);
        let (b, _) = dedupe_key(tx, "tok", OrderSide::Buy, dec!(6), dec!(0.5), 1_000);
        assert_ne!(a, b);
    }
}
