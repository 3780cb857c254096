//! In-memory checkout state for one shopper.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use versos_core::{Address, CartItem, CheckoutStep, Coupon, OrderId, Price};

use super::Totals;
use crate::models::CurrentUser;
use crate::payments::PixCharge;

/// How a pending payment is being paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Pix,
}

impl PaymentMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Pix => "pix",
        }
    }
}

/// A payment submitted to the processor that has not settled yet.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPayment {
    pub payment_id: String,
    pub method: PaymentMethod,
    /// QR payload for PIX charges.
    pub pix: Option<PixCharge>,
    /// Amounts charged.
    pub totals: Totals,
    /// Coupon the amounts were discounted with.
    pub coupon_code: Option<String>,
    /// Cart contents at submission; the order is recorded with these.
    #[serde(skip)]
    pub items: Vec<CartItem>,
    /// Who submitted the payment; the order is recorded for this user.
    #[serde(skip)]
    pub user: CurrentUser,
}

/// Last payment problem shown on the payment step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentNotice {
    Rejected { reason: String },
    /// Polling stopped before the payment settled.
    TimedOut { payment_id: String },
}

/// Whether the order behind a completed payment was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceStatus {
    Recorded { order_id: OrderId },
    AlreadyRecorded,
    /// The charge went through but the order could not be written.
    Degraded { message: String },
}

/// Result of a successful payment.
///
/// Serialized with a `degraded` flag alongside the persistence status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub payment_id: String,
    pub final_total: Price,
    pub persistence: PersistenceStatus,
}

impl Completion {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.persistence, PersistenceStatus::Degraded { .. })
    }
}

impl Serialize for Completion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Completion", 4)?;
        state.serialize_field("payment_id", &self.payment_id)?;
        state.serialize_field("final_total", &self.final_total)?;
        state.serialize_field("persistence", &self.persistence)?;
        state.serialize_field("degraded", &self.is_degraded())?;
        state.end()
    }
}

/// Checkout progress: step, chosen address and coupon, and payment state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckoutSession {
    pub step: CheckoutStep,
    pub selected_address: Option<Address>,
    pub applied_coupon: Option<Coupon>,
    /// Frozen when the payment completes.
    pub payment_id: Option<String>,
    /// Frozen when the payment completes, before the paid entries leave the cart.
    pub final_total_price: Option<Price>,
    pub pending_payment: Option<PendingPayment>,
    pub notice: Option<PaymentNotice>,
    pub completion: Option<Completion>,
    /// Nonce of the payment attempt in progress. Survives processor errors
    /// and is dropped once the processor decides the attempt.
    #[serde(skip)]
    attempt: Option<Uuid>,
}

impl CheckoutSession {
    /// Clear the per-attempt fields kept when the drawer closes on the cart.
    pub fn reset_transient(&mut self) {
        self.selected_address = None;
        self.payment_id = None;
    }

    #[must_use]
    pub fn has_pending_payment(&self) -> bool {
        self.pending_payment.is_some()
    }

    /// Code of the applied coupon, if any.
    #[must_use]
    pub fn coupon_code(&self) -> Option<String> {
        self.applied_coupon.as_ref().map(|c| c.code.clone())
    }

    /// Idempotency key for submitting `total` with `method`.
    ///
    /// Resubmitting the same charge within one attempt yields the same key,
    /// so the processor deduplicates it.
    pub fn idempotency_key(&mut self, method: PaymentMethod, total: Price) -> String {
        let attempt = *self.attempt.get_or_insert_with(Uuid::new_v4);
        format!("{attempt}-{}-{}", method.as_str(), total.amount())
    }

    /// Start a fresh attempt on the next submission.
    pub fn end_attempt(&mut self) {
        self.attempt = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_reports_degraded() {
        let completion = Completion {
            payment_id: "mp-1".to_string(),
            final_total: Price::from_cents(1350),
            persistence: PersistenceStatus::Degraded {
                message: "contate o suporte".to_string(),
            },
        };

        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["degraded"], true);
        assert_eq!(json["persistence"]["status"], "degraded");
        assert_eq!(json["payment_id"], "mp-1");

        let recorded = Completion {
            persistence: PersistenceStatus::AlreadyRecorded,
            ..completion
        };
        assert_eq!(serde_json::to_value(&recorded).unwrap()["degraded"], false);
    }

    #[test]
    fn test_idempotency_key_is_stable_within_an_attempt() {
        let mut session = CheckoutSession::default();
        let total = Price::from_cents(1350);

        let first = session.idempotency_key(PaymentMethod::Card, total);
        assert_eq!(session.idempotency_key(PaymentMethod::Card, total), first);
        assert!(first.ends_with("-card-13.50"));
        assert_ne!(session.idempotency_key(PaymentMethod::Pix, total), first);
        assert_ne!(
            session.idempotency_key(PaymentMethod::Card, Price::from_cents(2250)),
            first
        );

        session.end_attempt();
        assert_ne!(session.idempotency_key(PaymentMethod::Card, total), first);
    }
}
