//! Per-shopper state and the registry that owns it.
//!
//! A shopper is identified by a UUID stored in the HTTP session. Their cart,
//! checkout session, installment lookup and payment watch live in memory
//! behind a `tokio::sync::Mutex`, so requests for the same shopper are
//! serialised. Idle shoppers are evicted after the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cart::{CartEvents, CartStore};
use crate::checkout::CheckoutSession;
use crate::config::CheckoutConfig;
use crate::payments::{InstallmentLookup, PaymentWatch};

/// Shared handle to one shopper.
pub type ShopperHandle = Arc<Mutex<Shopper>>;

/// Everything the storefront keeps in memory for one shopper.
pub struct Shopper {
    pub cart: CartStore,
    pub checkout: CheckoutSession,
    /// Shared with lookups running outside the shopper lock.
    pub installments: Arc<InstallmentLookup>,
    pub(crate) watch: Option<PaymentWatch>,
}

impl Shopper {
    #[must_use]
    pub fn new(id: Uuid, events: CartEvents, installment_debounce: Duration) -> Self {
        Self {
            cart: CartStore::new(id, events),
            checkout: CheckoutSession::default(),
            installments: Arc::new(InstallmentLookup::new(installment_debounce)),
            watch: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.cart.shopper()
    }

    /// Payment id being polled, if any.
    #[must_use]
    pub fn watched_payment(&self) -> Option<&str> {
        self.watch
            .as_ref()
            .filter(|w| !w.is_finished())
            .map(PaymentWatch::payment_id)
    }

    /// Stop polling. The running task is aborted.
    pub fn stop_watch(&mut self) {
        self.watch = None;
    }
}

/// In-memory registry of shoppers keyed by session shopper id.
#[derive(Clone)]
pub struct ShopperRegistry {
    shoppers: Cache<Uuid, ShopperHandle>,
    events: CartEvents,
    installment_debounce: Duration,
}

impl ShopperRegistry {
    #[must_use]
    pub fn new(config: &CheckoutConfig, events: CartEvents) -> Self {
        let shoppers = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(config.shopper_idle_ttl)
            .build();

        Self {
            shoppers,
            events,
            installment_debounce: config.installment_debounce,
        }
    }

    /// Get the shopper for `id`, creating an empty one on first use.
    pub async fn get_or_create(&self, id: Uuid) -> ShopperHandle {
        self.shoppers
            .get_with(id, async {
                Arc::new(Mutex::new(Shopper::new(
                    id,
                    self.events.clone(),
                    self.installment_debounce,
                )))
            })
            .await
    }

    /// Drop a shopper's state, e.g. on logout.
    pub async fn remove(&self, id: Uuid) {
        self.shoppers.invalidate(&id).await;
    }

    #[must_use]
    pub const fn events(&self) -> &CartEvents {
        &self.events
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_returns_same_shopper() {
        let registry = ShopperRegistry::new(&CheckoutConfig::default(), CartEvents::default());
        let id = Uuid::new_v4();

        let a = registry.get_or_create(id).await;
        let b = registry.get_or_create(id).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.id(), id);

        let other = registry.get_or_create(Uuid::new_v4()).await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_remove_forgets_state() {
        let registry = ShopperRegistry::new(&CheckoutConfig::default(), CartEvents::default());
        let id = Uuid::new_v4();

        let first = registry.get_or_create(id).await;
        registry.remove(id).await;
        let second = registry.get_or_create(id).await;
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
