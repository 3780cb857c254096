//! Checkout: the step machine from cart to paid order.
//!
//! ```text
//! cart -> address -> payment -> success
//!   ^        |          |
//!   +--------+  <-------+        (back)
//! ```
//!
//! Steps only change after the operation guarding them has succeeded. A
//! failed guard leaves the session untouched. `success` is left only by
//! closing the checkout, which resets the session.

mod backend;
mod coupon;
mod flow;
mod session;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fake;

pub use backend::{CheckoutBackend, PgCheckoutBackend};
pub use coupon::{CouponError, CouponPolicy, Totals};
pub use flow::{
    AddressChoice, CardRequest, CheckoutFlow, PaymentProgress, PixRequest, SUPPORT_MESSAGE,
};
pub use session::{
    CheckoutSession, Completion, PaymentMethod, PaymentNotice, PendingPayment, PersistenceStatus,
};

use thiserror::Error;

use versos_core::{AddressError, CheckoutStep};

use crate::db::RepositoryError;
use crate::payments::PaymentError;

/// Errors that can occur during checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// A guard failed; the message is shown to the shopper.
    #[error("{0}")]
    Validation(String),

    #[error("Endereço inválido: {0}")]
    Address(#[from] AddressError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    /// The requested transition is not allowed from the current step.
    #[error("cannot go from {from} to {to}")]
    InvalidTransition { from: CheckoutStep, to: CheckoutStep },

    /// The shopper must log in first.
    #[error("login required")]
    AuthRequired,

    #[error("backend error: {0}")]
    Backend(#[from] RepositoryError),

    #[error("payment processor error: {0}")]
    Payment(#[from] PaymentError),

    /// The processor declined the payment.
    #[error("{reason}")]
    PaymentRejected { reason: String },
}
