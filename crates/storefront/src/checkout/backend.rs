//! Persistence the checkout depends on.

use std::future::Future;

use sqlx::PgPool;

use versos_core::{Address, Coupon, NewAddress, UserId};

use crate::db::{
    AddressRepository, CouponRepository, NewOrder, OrderReceipt, OrderRepository,
    RepositoryError,
};

/// Storage operations used by [`super::CheckoutFlow`].
pub trait CheckoutBackend: Send + Sync + 'static {
    /// The user's saved addresses, default first.
    fn addresses(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<Address>, RepositoryError>> + Send;

    /// Persist a validated address.
    fn save_address(
        &self,
        user: UserId,
        address: &NewAddress,
    ) -> impl Future<Output = Result<Address, RepositoryError>> + Send;

    /// Find an enabled coupon by normalized code.
    fn find_coupon(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Option<Coupon>, RepositoryError>> + Send;

    /// Record a paid order, its purchases and the coupon usage atomically.
    fn record_order(
        &self,
        order: &NewOrder,
    ) -> impl Future<Output = Result<OrderReceipt, RepositoryError>> + Send;
}

/// `PostgreSQL` implementation.
#[derive(Clone)]
pub struct PgCheckoutBackend {
    pool: PgPool,
}

impl PgCheckoutBackend {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CheckoutBackend for PgCheckoutBackend {
    async fn addresses(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        AddressRepository::new(&self.pool).list_for_user(user).await
    }

    async fn save_address(
        &self,
        user: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError> {
        AddressRepository::new(&self.pool).create(user, address).await
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        CouponRepository::new(&self.pool).find_enabled(code).await
    }

    async fn record_order(&self, order: &NewOrder) -> Result<OrderReceipt, RepositoryError> {
        OrderRepository::new(&self.pool).record(order).await
    }
}
