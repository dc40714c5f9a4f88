//! Precision-safe decimal types for binary-outcome trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Outcome tokens trade on a
//! fixed 0.01 grid between 0.01 and 0.99, so prices carry grid helpers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with sizes in calculations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    /// Venue tick (0.01).
    pub const TICK: Self = Self(Decimal::from_parts(1, 0, 0, false, 2));
    /// Lowest quotable price (0.01).
    pub const MIN: Self = Self(Decimal::from_parts(1, 0, 0, false, 2));
    /// Highest quotable price (0.99).
    pub const MAX: Self = Self(Decimal::from_parts(99, 0, 0, false, 2));

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the tick grid.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).floor() * tick_size.0)
    }

    /// Clamp into `[min, max]`.
    #[inline]
    pub fn clamp_to(&self, min: Price, max: Price) -> Self {
        Self(self.0.max(min.0).min(max.0))
    }

    /// Absolute distance to another price.
    #[inline]
    pub fn abs_diff(&self, other: Price) -> Decimal {
        (self.0 - other.0).abs()
    }

    /// Positive part of `self - other`; zero when `other` is higher.
    #[inline]
    pub fn saturating_sub(&self, other: Price) -> Decimal {
        (self.0 - other.0).max(Decimal::ZERO)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Share quantity with exact decimal precision.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// sizes with prices in calculations.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    /// Share quantities at or below this are treated as flat (0.01).
    pub const EPSILON: Self = Self(Decimal::from_parts(1, 0, 0, false, 2));

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// True when the quantity is indistinguishable from zero shares.
    #[inline]
    pub fn is_flat(&self) -> bool {
        self.0 <= Self::EPSILON.0
    }

    /// Subtract, flooring at zero.
    #[inline]
    pub fn saturating_sub(&self, rhs: Size) -> Self {
        Self((self.0 - rhs.0).max(Decimal::ZERO))
    }

    /// Calculate notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }

    /// Absolute difference between two quantities.
    #[inline]
    pub fn abs_diff(&self, other: Size) -> Decimal {
        (self.0 - other.0).abs()
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_grid_constants() {
        assert_eq!(Price::TICK.0, dec!(0.01));
        assert_eq!(Price::MIN.0, dec!(0.01));
        assert_eq!(Price::MAX.0, dec!(0.99));
        assert_eq!(Size::EPSILON.0, dec!(0.01));
    }

    #[test]
    fn test_defaults_are_zero() {
        assert_eq!(Price::default(), Price::ZERO);
        assert_eq!(Size::default(), Size::ZERO);
        assert!(Size::default().is_flat());
    }

    #[test]
    fn test_price_round_to_tick() {
        let price = Price::new(dec!(0.4567));
        let rounded = price.round_to_tick(Price::TICK);
        assert_eq!(rounded.0, dec!(0.45));
    }

    #[test]
    fn test_price_clamp() {
        let low = Price::new(dec!(0.00)).clamp_to(Price::MIN, Price::MAX);
        let high = Price::new(dec!(1.02)).clamp_to(Price::MIN, Price::MAX);
        let mid = Price::new(dec!(0.47)).clamp_to(Price::MIN, Price::MAX);
        assert_eq!(low, Price::MIN);
        assert_eq!(high, Price::MAX);
        assert_eq!(mid.0, dec!(0.47));
    }

    #[test]
    fn test_price_saturating_sub() {
        let entry = Price::new(dec!(0.50));
        assert_eq!(entry.saturating_sub(Price::new(dec!(0.46))), dec!(0.04));
        assert_eq!(entry.saturating_sub(Price::new(dec!(0.55))), Decimal::ZERO);
    }

    #[test]
    fn test_size_saturating_sub_floors_at_zero() {
        let held = Size::new(dec!(3));
        assert_eq!(held.saturating_sub(Size::new(dec!(5))), Size::ZERO);
        assert_eq!(held.saturating_sub(Size::new(dec!(1))).0, dec!(2));
    }

    #[test]
    fn test_size_is_flat() {
        assert!(Size::new(dec!(0.005)).is_flat());
        assert!(Size::new(dec!(0.01)).is_flat());
        assert!(!Size::new(dec!(0.02)).is_flat());
    }

    #[test]
    fn test_notional_calculation() {
        let size = Size::new(dec!(10));
        let price = Price::new(dec!(0.50));
        assert_eq!(size.notional(price), dec!(5.00));
    }
}
