//! In-memory checkout backend for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use versos_core::{Address, AddressId, Coupon, NewAddress, OrderId, UserId};

use super::CheckoutBackend;
use crate::db::{NewOrder, OrderReceipt, RepositoryError};

/// Mirrors the database rules: orders are unique per payment id and coupon
/// usage is bumped only for newly written orders.
#[derive(Default)]
pub struct FakeBackend {
    pub addresses: Mutex<Vec<(UserId, Address)>>,
    pub coupons: Mutex<HashMap<String, Coupon>>,
    pub orders: Mutex<Vec<NewOrder>>,
    pub fail_orders: bool,
    pub fail_addresses: bool,
}

impl FakeBackend {
    pub fn with_coupon(coupon: Coupon) -> Self {
        let backend = Self::default();
        backend
            .coupons
            .lock()
            .unwrap()
            .insert(coupon.code.clone(), coupon);
        backend
    }

    pub fn coupon_usage(&self, code: &str) -> i32 {
        self.coupons
            .lock()
            .unwrap()
            .get(code)
            .map_or(0, |c| c.usage_count)
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }
}

impl CheckoutBackend for FakeBackend {
    async fn addresses(&self, user: UserId) -> Result<Vec<Address>, RepositoryError> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .iter()
            .filter(|(owner, _)| *owner == user)
            .map(|(_, address)| address.clone())
            .collect())
    }

    async fn save_address(
        &self,
        user: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError> {
        if self.fail_addresses {
            return Err(RepositoryError::Conflict("address store offline".to_string()));
        }
        let mut addresses = self.addresses.lock().unwrap();
        let id = i32::try_from(addresses.len()).unwrap() + 1;
        let saved = Address {
            id: Some(AddressId::new(id)),
            rua: address.rua.clone(),
            numero: address.numero.clone(),
            complemento: address.complemento.clone(),
            bairro: address.bairro.clone(),
            cidade: address.cidade.clone(),
            estado: address.estado.clone(),
            cep: address.cep.clone(),
            is_default: address.is_default,
        };
        addresses.push((user, saved.clone()));
        Ok(saved)
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        Ok(self
            .coupons
            .lock()
            .unwrap()
            .get(code)
            .filter(|c| c.enabled)
            .cloned())
    }

    async fn record_order(&self, order: &NewOrder) -> Result<OrderReceipt, RepositoryError> {
        if self.fail_orders {
            return Err(RepositoryError::DataCorruption("orders table unavailable".to_string()));
        }

        let mut orders = self.orders.lock().unwrap();
        if orders.iter().any(|o| o.payment_id == order.payment_id) {
            return Ok(OrderReceipt::AlreadyRecorded);
        }
        orders.push(order.clone());
        let id = OrderId::new(i32::try_from(orders.len()).unwrap());

        if let Some(code) = &order.coupon_code
            && let Some(coupon) = self.coupons.lock().unwrap().get_mut(code)
        {
            coupon.usage_count += 1;
        }

        Ok(OrderReceipt::Created(id))
    }
}
