//! Order and purchase persistence.
//!
//! An order is written exactly once per successful payment. The `orders`
//! table is unique on `payment_id`, so replaying the same completion is a
//! no-op that also skips the coupon usage increment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::{instrument, warn};

use versos_core::{Address, CartItem, OrderId, OrderStatus, Price, PurchaseStatus, UserId};

use super::RepositoryError;

/// Everything needed to record a paid order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: UserId,
    pub payment_id: String,
    pub total_amount: Price,
    pub original_total: Price,
    pub discount_amount: Price,
    pub coupon_code: Option<String>,
    pub address: Address,
    pub items: Vec<CartItem>,
}

/// Result of [`OrderRepository::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderReceipt {
    /// A new order row was written.
    Created(OrderId),
    /// An order with the same payment ID already exists; nothing was written.
    AlreadyRecorded,
}

/// Order list entry for the account page.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderSummary {
    pub id: OrderId,
    pub payment_id: String,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Repository for orders and their purchases.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Record a paid order in a single transaction.
    ///
    /// Steps: insert the order (skipped when the payment ID is already known),
    /// insert one pending purchase per numeric verse ID, promote the purchases
    /// to completed, then bump the coupon usage counter.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any statement fails; the
    /// transaction is rolled back in that case.
    #[instrument(skip(self, order), fields(payment_id = %order.payment_id, user_id = %order.user_id))]
    pub async fn record(&self, order: &NewOrder) -> Result<OrderReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let order_id: Option<OrderId> = sqlx::query_scalar(
            r"
            INSERT INTO orders
                (user_id, payment_id, total_amount, original_total, discount_amount,
                 coupon_code, status, address, items)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (payment_id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(order.user_id)
        .bind(&order.payment_id)
        .bind(order.total_amount.amount())
        .bind(order.original_total.amount())
        .bind(order.discount_amount.amount())
        .bind(order.coupon_code.as_deref())
        .bind(OrderStatus::Paid)
        .bind(Json(&order.address))
        .bind(Json(&order.items))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order_id) = order_id else {
            tx.rollback().await?;
            return Ok(OrderReceipt::AlreadyRecorded);
        };

        for item in &order.items {
            let Some(verse_id) = item.verse_id() else {
                warn!(item_id = %item.id, "Skipping purchase for non-numeric verse id");
                continue;
            };

            sqlx::query(
                r"
                INSERT INTO purchases (order_id, user_id, verse_id, amount, status)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(order_id)
            .bind(order.user_id)
            .bind(verse_id)
            .bind(item.price.amount())
            .bind(PurchaseStatus::Pending)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE purchases SET status = $1 WHERE order_id = $2 AND status = $3")
            .bind(PurchaseStatus::Completed)
            .bind(order_id)
            .bind(PurchaseStatus::Pending)
            .execute(&mut *tx)
            .await?;

        if let Some(code) = &order.coupon_code {
            let updated =
                sqlx::query("UPDATE coupons SET usage_count = usage_count + 1 WHERE code = $1")
                    .bind(code)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            if updated == 0 {
                warn!(coupon = %code, "Applied coupon no longer exists; usage not counted");
            }
        }

        tx.commit().await?;

        Ok(OrderReceipt::Created(order_id))
    }

    /// List a user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<OrderSummary>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderSummary>(
            r"
            SELECT o.id, o.payment_id, o.total_amount, o.discount_amount, o.coupon_code,
                   o.status, o.created_at,
                   (SELECT COUNT(*) FROM purchases p WHERE p.order_id = o.id) AS item_count
            FROM orders o
            WHERE o.user_id = $1
            ORDER BY o.created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}
