//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cart::CartEvents;
use crate::catalog::CatalogStore;
use crate::checkout::{CheckoutFlow, PgCheckoutBackend};
use crate::config::StorefrontConfig;
use crate::db::VerseRepository;
use crate::payments::{MercadoPagoClient, PaymentError};
use crate::shopper::ShopperRegistry;

/// Checkout flow wired to Mercado Pago and `PostgreSQL`.
pub type StoreCheckout = CheckoutFlow<MercadoPagoClient, PgCheckoutBackend>;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    catalog: CatalogStore,
    shoppers: ShopperRegistry,
    checkout: StoreCheckout,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the payment client cannot be built.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, PaymentError> {
        let gateway = Arc::new(MercadoPagoClient::new(&config.mercado_pago)?);
        let catalog = CatalogStore::new(VerseRepository::new(pool.clone()), &config.catalog);
        let shoppers = ShopperRegistry::new(&config.checkout, CartEvents::default());
        let checkout = CheckoutFlow::new(
            gateway,
            PgCheckoutBackend::new(pool.clone()),
            &config.checkout,
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                catalog,
                shoppers,
                checkout,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Cached verse catalog.
    #[must_use]
    pub fn catalog(&self) -> &CatalogStore {
        &self.inner.catalog
    }

    /// In-memory carts and checkout sessions.
    #[must_use]
    pub fn shoppers(&self) -> &ShopperRegistry {
        &self.inner.shoppers
    }

    #[must_use]
    pub fn checkout(&self) -> &StoreCheckout {
        &self.inner.checkout
    }

    /// Broadcast channel for cart events.
    #[must_use]
    pub fn cart_events(&self) -> &CartEvents {
        self.inner.shoppers.events()
    }
}
