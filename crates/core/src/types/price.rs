//! Non-negative monetary amounts in Brazilian reais.
//!
//! All amounts are `rust_decimal::Decimal` values in the currency's standard
//! unit (reais, not centavos). Arithmetic results are rounded to centavos with
//! banker's rounding disabled (midpoint away from zero), which is what the
//! payment processor expects.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is below zero.
    #[error("price cannot be negative (got {0})")]
    Negative(Decimal),
}

/// A price in BRL. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// A price of zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price, rounding to centavos.
    ///
    /// # Errors
    ///
    /// Returns `PriceError::Negative` if `amount` is below zero.
    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative(amount));
        }
        Ok(Self(round_cents(amount)))
    }

    /// Create a price from an integer number of centavos.
    #[must_use]
    pub fn from_cents(cents: u32) -> Self {
        Self(Decimal::new(i64::from(cents), 2))
    }

    /// The amount in reais.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Whether the price is strictly positive.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// The portion of this price that `percent` represents, in centavos.
    ///
    /// `percent` is clamped to `0..=100`, so the result never exceeds `self`.
    #[must_use]
    pub fn percentage(&self, percent: Decimal) -> Self {
        let percent = percent.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
        Self(round_cents(self.0 * percent / Decimal::ONE_HUNDRED))
    }

    /// Subtract `other`, saturating at zero.
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self((self.0 - other.0).max(Decimal::ZERO))
    }

    /// Format for display, e.g. `R$ 1.234,50`.
    #[must_use]
    pub fn display(&self) -> String {
        let fixed = format!("{:.2}", self.0);
        let (int_part, frac_part) = fixed.split_once('.').unwrap_or((&fixed, "00"));

        let digits: Vec<char> = int_part.chars().collect();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.iter().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(*c);
        }

        format!("R$ {grouped},{frac_part}")
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Self> for Price {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let amount = <Decimal as Deserialize>::deserialize(deserializer)?;
        Self::new(amount).map_err(serde::de::Error::custom)
    }
}

/// Round an amount to centavos (midpoint away from zero).
#[must_use]
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn brl(s: &str) -> Price {
        Price::new(s.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_negative_rejected() {
        let err = Price::new(Decimal::new(-1, 2)).unwrap_err();
        assert_eq!(err, PriceError::Negative(Decimal::new(-1, 2)));
    }

    #[test]
    fn test_rounds_to_cents() {
        assert_eq!(brl("1.005").amount(), Decimal::new(101, 2));
    }

    #[test]
    fn test_percentage_of_fifteen() {
        assert_eq!(brl("15.00").percentage(Decimal::TEN), brl("1.50"));
    }

    #[test]
    fn test_percentage_is_clamped() {
        assert_eq!(brl("20.00").percentage(Decimal::new(150, 0)), brl("20.00"));
    }

    #[test]
    fn test_saturating_sub() {
        assert_eq!(brl("5.00").saturating_sub(brl("7.00")), Price::ZERO);
    }

    #[test]
    fn test_sum() {
        let total: Price = [brl("15.00"), brl("9.90")].iter().sum();
        assert_eq!(total, brl("24.90"));
    }

    #[test]
    fn test_display_brl() {
        assert_eq!(brl("13.5").display(), "R$ 13,50");
        assert_eq!(brl("1234.5").display(), "R$ 1.234,50");
        assert_eq!(Price::ZERO.display(), "R$ 0,00");
    }

    #[test]
    fn test_deserialize_rejects_negative() {
        assert!(serde_json::from_str::<Price>("\"-3.00\"").is_err());
        assert_eq!(serde_json::from_str::<Price>("\"3.00\"").unwrap(), brl("3"));
    }

    #[test]
    fn test_deserialize_accepts_numbers_and_rounds() {
        assert_eq!(serde_json::from_str::<Price>("15.5").unwrap(), brl("15.50"));
        assert_eq!(serde_json::from_str::<Price>("\"1.005\"").unwrap(), brl("1.01"));
        assert!(serde_json::from_str::<Price>("-0.01").is_err());
    }
}
