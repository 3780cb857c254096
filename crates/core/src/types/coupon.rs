//! Discount coupons.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::CouponId;

/// A percentage discount code stored in the `coupons` table.
///
/// Whether a coupon can be applied is decided by the storefront's coupon
/// rules; this type only carries the stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    /// Always uppercase.
    pub code: String,
    /// Percentage off the subtotal, expected in `(0, 100]`.
    pub discount_percent: Decimal,
    /// Last day (inclusive) on which the coupon may be applied.
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of completed orders; `None` or zero means unlimited.
    pub usage_limit: Option<i32>,
    /// Number of completed orders that used this coupon.
    pub usage_count: i32,
    pub enabled: bool,
}

/// Normalize user input to the stored coupon code form.
#[must_use]
pub fn normalize_coupon_code(input: &str) -> String {
    input.trim().to_uppercase()
}
