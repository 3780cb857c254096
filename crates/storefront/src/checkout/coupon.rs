//! Coupon eligibility and discount arithmetic.

use chrono::{FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use versos_core::{Coupon, Price};

/// Why a coupon cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("Cupom não encontrado")]
    NotFound,
    #[error("Cupom expirado")]
    Expired,
    #[error("Cupom atingiu o limite de usos")]
    LimitReached,
    #[error("Cupom com desconto inválido")]
    InvalidDiscount,
}

/// Subtotal, discount and amount due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Price,
    pub discount: Price,
    /// Never above `subtotal`.
    pub total: Price,
}

impl Totals {
    #[must_use]
    pub const fn undiscounted(subtotal: Price) -> Self {
        Self {
            subtotal,
            discount: Price::ZERO,
            total: subtotal,
        }
    }
}

/// Coupon rules evaluated in a fixed timezone.
#[derive(Debug, Clone, Copy)]
pub struct CouponPolicy {
    offset: FixedOffset,
}

impl CouponPolicy {
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Today's date in the policy timezone.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    /// Check whether `coupon` may be applied on `today`.
    ///
    /// A coupon stays valid through the whole calendar day of `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns the first failing rule: disabled coupons are `NotFound`, then
    /// `Expired`, `LimitReached` and `InvalidDiscount`.
    pub fn check(&self, coupon: &Coupon, today: NaiveDate) -> Result<(), CouponError> {
        if !coupon.enabled {
            return Err(CouponError::NotFound);
        }

        if let Some(expires_at) = coupon.expires_at {
            let last_day = expires_at.with_timezone(&self.offset).date_naive();
            if last_day < today {
                return Err(CouponError::Expired);
            }
        }

        if let Some(limit) = coupon.usage_limit
            && limit > 0
            && coupon.usage_count >= limit
        {
            return Err(CouponError::LimitReached);
        }

        if coupon.discount_percent <= Decimal::ZERO
            || coupon.discount_percent > Decimal::ONE_HUNDRED
        {
            return Err(CouponError::InvalidDiscount);
        }

        Ok(())
    }

    /// Compute totals for `subtotal` with an optional coupon.
    ///
    /// `total = max(0, subtotal - subtotal * percent / 100)`, in centavos.
    #[must_use]
    pub fn totals(subtotal: Price, coupon: Option<&Coupon>) -> Totals {
        let Some(coupon) = coupon else {
            return Totals::undiscounted(subtotal);
        };

        let discount = subtotal.percentage(coupon.discount_percent);
        Totals {
            subtotal,
            discount,
            total: subtotal.saturating_sub(discount),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use chrono::{DateTime, TimeZone};
    use versos_core::CouponId;

    use super::*;
    use crate::config::BRASILIA_OFFSET;

    fn coupon(code: &str, percent: &str) -> Coupon {
        Coupon {
            id: CouponId::new(1),
            code: code.to_string(),
            discount_percent: Decimal::from_str(percent).unwrap(),
            expires_at: None,
            usage_limit: None,
            usage_count: 0,
            enabled: true,
        }
    }

    fn brasilia(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        BRASILIA_OFFSET
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn policy() -> CouponPolicy {
        CouponPolicy::new(BRASILIA_OFFSET)
    }

    #[test]
    fn test_ten_percent_off_fifteen() {
        let desc10 = coupon("DESC10", "10");
        let totals = CouponPolicy::totals(Price::from_cents(1500), Some(&desc10));
        assert_eq!(totals.discount, Price::from_cents(150));
        assert_eq!(totals.total, Price::from_cents(1350));
    }

    #[test]
    fn test_expired_yesterday() {
        let mut old5 = coupon("OLD5", "5");
        old5.expires_at = Some(brasilia(2025, 3, 9, 12));
        assert_eq!(policy().check(&old5, today()), Err(CouponError::Expired));
    }

    #[test]
    fn test_expiry_uses_policy_timezone() {
        // 01:00 UTC on the 10th is still the 9th in Brasília.
        let mut late = coupon("LATE", "5");
        late.expires_at = Some(Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap());
        assert_eq!(policy().check(&late, today()), Err(CouponError::Expired));

        // Expiring today is still valid.
        late.expires_at = Some(brasilia(2025, 3, 10, 0));
        assert_eq!(policy().check(&late, today()), Ok(()));
    }

    #[test]
    fn test_usage_limit() {
        let mut limited = coupon("FIRST", "20");
        limited.usage_limit = Some(3);
        limited.usage_count = 2;
        assert_eq!(policy().check(&limited, today()), Ok(()));

        limited.usage_count = 3;
        assert_eq!(
            policy().check(&limited, today()),
            Err(CouponError::LimitReached)
        );

        limited.usage_limit = Some(0);
        assert_eq!(policy().check(&limited, today()), Ok(()));
    }

    #[test]
    fn test_invalid_discount() {
        let zero = coupon("ZERO", "0");
        assert_eq!(
            policy().check(&zero, today()),
            Err(CouponError::InvalidDiscount)
        );
        let too_much = coupon("MAX", "150");
        assert_eq!(
            policy().check(&too_much, today()),
            Err(CouponError::InvalidDiscount)
        );
        let full = coupon("FREE", "100");
        assert_eq!(policy().check(&full, today()), Ok(()));
    }

    #[test]
    fn test_disabled_is_not_found() {
        let mut off = coupon("OFF", "10");
        off.enabled = false;
        assert_eq!(policy().check(&off, today()), Err(CouponError::NotFound));
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        for (cents, percent) in [(0, "10"), (1, "50"), (999, "33.33"), (1500, "100")] {
            let subtotal = Price::from_cents(cents);
            let totals = CouponPolicy::totals(subtotal, Some(&coupon("X", percent)));
            assert!(totals.total <= totals.subtotal);
            assert_eq!(totals.total + totals.discount, totals.subtotal);
        }
    }

    #[test]
    fn test_no_coupon_means_no_discount() {
        let totals = CouponPolicy::totals(Price::from_cents(4200), None);
        assert_eq!(totals, Totals::undiscounted(Price::from_cents(4200)));
    }
}
