//! Coupon repository.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::instrument;

use versos_core::{Coupon, CouponId};

use super::RepositoryError;

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: i32,
    code: String,
    discount_percent: Decimal,
    expires_at: Option<DateTime<Utc>>,
    usage_limit: Option<i32>,
    usage_count: i32,
    enabled: bool,
}

impl From<CouponRow> for Coupon {
    fn from(row: CouponRow) -> Self {
        Self {
            id: CouponId::new(row.id),
            code: row.code,
            discount_percent: row.discount_percent,
            expires_at: row.expires_at,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            enabled: row.enabled,
        }
    }
}

/// Repository for discount coupons.
pub struct CouponRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CouponRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Find an enabled coupon by its normalized (uppercase) code.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn find_enabled(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let row = sqlx::query_as::<_, CouponRow>(
            r"
            SELECT id, code, discount_percent, expires_at, usage_limit, usage_count, enabled
            FROM coupons
            WHERE code = $1 AND enabled
            ",
        )
        .bind(code)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(Coupon::from))
    }

    /// Insert or replace a coupon definition (used by seeding).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the upsert fails.
    pub async fn upsert(
        &self,
        code: &str,
        discount_percent: Decimal,
        expires_at: Option<DateTime<Utc>>,
        usage_limit: Option<i32>,
    ) -> Result<Coupon, RepositoryError> {
        let row = sqlx::query_as::<_, CouponRow>(
            r"
            INSERT INTO coupons (code, discount_percent, expires_at, usage_limit, enabled)
            VALUES (upper($1), $2, $3, $4, TRUE)
            ON CONFLICT (code) DO UPDATE
                SET discount_percent = EXCLUDED.discount_percent,
                    expires_at = EXCLUDED.expires_at,
                    usage_limit = EXCLUDED.usage_limit,
                    enabled = TRUE
            RETURNING id, code, discount_percent, expires_at, usage_limit, usage_count, enabled
            ",
        )
        .bind(code)
        .bind(discount_percent)
        .bind(expires_at)
        .bind(usage_limit)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }
}
