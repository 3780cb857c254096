//! Checkout step transitions, payment submission and completion.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use versos_core::{
    Address, AddressId, CartItem, CheckoutStep, NewAddress, Price, normalize_coupon_code,
};

use super::session::{
    Completion, PaymentMethod, PaymentNotice, PendingPayment, PersistenceStatus,
};
use super::{CheckoutBackend, CheckoutError, CheckoutSession, CouponError, CouponPolicy, Totals};
use crate::cart::CartStore;
use crate::config::CheckoutConfig;
use crate::db::{NewOrder, OrderReceipt};
use crate::models::CurrentUser;
use crate::payments::{
    CardData, CardPayment, Identification, Payer, PaymentData, PaymentGateway, PaymentOutcome,
    PaymentWatch, PixCharge, PollOutcome,
};
use crate::shopper::{Shopper, ShopperHandle};

/// Shown when a payment went through but its order could not be stored.
pub const SUPPORT_MESSAGE: &str = "Seu pagamento foi aprovado, mas não conseguimos registrar o \
     pedido. Entre em contato com o suporte informando o código do pagamento.";

// =============================================================================
// Requests and results
// =============================================================================

/// Address picked on the address step.
#[derive(Debug, Clone)]
pub enum AddressChoice {
    Saved(AddressId),
    New(NewAddress),
}

/// Card payment form.
#[derive(Debug)]
pub struct CardRequest {
    pub card: CardData,
    /// Falls back to the plan selected in the installment lookup, then 1.
    pub installments: Option<u32>,
    /// Falls back to the network resolved by the installment lookup.
    pub payment_method_id: Option<String>,
    pub issuer_id: Option<String>,
    pub identification: Option<Identification>,
}

/// What an approved payment covered; the order is recorded from this.
#[derive(Debug)]
struct Purchase {
    totals: Totals,
    items: Vec<CartItem>,
    coupon_code: Option<String>,
}

impl Purchase {
    fn snapshot(shopper: &Shopper, totals: Totals) -> Self {
        Self {
            totals,
            items: shopper.cart.items().to_vec(),
            coupon_code: shopper.checkout.coupon_code(),
        }
    }
}

/// PIX payment form.
#[derive(Debug, Clone, Default)]
pub struct PixRequest {
    pub first_name: Option<String>,
    pub identification: Option<Identification>,
}

/// What happened after submitting a payment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentProgress {
    /// Approved synchronously; the checkout is on `success`.
    Completed(Completion),
    /// Awaiting confirmation; the payment is being polled.
    Pending { payment_id: String },
    /// PIX charge created and being polled.
    Pix(PixCharge),
}

// =============================================================================
// CheckoutFlow
// =============================================================================

/// Drives a shopper's checkout session.
///
/// Cheap to clone. Payment operations take the [`ShopperHandle`] because a
/// pending payment keeps a weak reference to it for the poll task.
pub struct CheckoutFlow<G, B> {
    inner: Arc<CheckoutFlowInner<G, B>>,
}

struct CheckoutFlowInner<G, B> {
    gateway: Arc<G>,
    backend: B,
    coupons: CouponPolicy,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl<G, B> Clone for CheckoutFlow<G, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn require_user(user: Option<&CurrentUser>) -> Result<&CurrentUser, CheckoutError> {
    user.ok_or(CheckoutError::AuthRequired)
}

fn require_items(cart: &CartStore) -> Result<(), CheckoutError> {
    if cart.is_empty() {
        return Err(CheckoutError::Validation(
            "Seu carrinho está vazio.".to_string(),
        ));
    }
    Ok(())
}

fn coupon_unlocked(session: &CheckoutSession) -> Result<(), CheckoutError> {
    if session.step == CheckoutStep::Success {
        return Err(CheckoutError::Validation(
            "Este pedido já foi finalizado.".to_string(),
        ));
    }
    if session.has_pending_payment() {
        return Err(CheckoutError::Validation(
            "Aguarde a confirmação do pagamento em andamento.".to_string(),
        ));
    }
    Ok(())
}

fn expect_step(
    session: &CheckoutSession,
    expected: CheckoutStep,
    to: CheckoutStep,
) -> Result<(), CheckoutError> {
    if session.step == expected {
        Ok(())
    } else {
        Err(CheckoutError::InvalidTransition {
            from: session.step,
            to,
        })
    }
}

impl<G: PaymentGateway, B: CheckoutBackend> CheckoutFlow<G, B> {
    #[must_use]
    pub fn new(gateway: Arc<G>, backend: B, config: &CheckoutConfig) -> Self {
        Self {
            inner: Arc::new(CheckoutFlowInner {
                gateway,
                backend,
                coupons: CouponPolicy::new(config.coupon_utc_offset),
                poll_interval: config.poll_interval,
                poll_timeout: config.poll_timeout,
            }),
        }
    }

    #[must_use]
    pub fn gateway(&self) -> &Arc<G> {
        &self.inner.gateway
    }

    // =========================================================================
    // Step transitions
    // =========================================================================

    /// Open the checkout, honouring a step requested with
    /// [`CartStore::open_cart_to_step`].
    ///
    /// Jumping to `address` or `payment` re-checks login and a non-empty
    /// cart. `payment` is only reached when an address is already selected;
    /// otherwise the checkout opens on `address`.
    ///
    /// # Errors
    ///
    /// `AuthRequired` or `Validation` when a jump's guards fail. The step is
    /// unchanged and the request is consumed.
    pub fn open(
        &self,
        shopper: &mut Shopper,
        user: Option<&CurrentUser>,
    ) -> Result<CheckoutStep, CheckoutError> {
        let Some(target) = shopper.cart.take_initial_step() else {
            return Ok(shopper.checkout.step);
        };

        let current = shopper.checkout.step;
        if current == CheckoutStep::Success || shopper.checkout.has_pending_payment() {
            debug!(%current, %target, "Keeping current step while a payment is in progress or done");
            return Ok(current);
        }

        let step = match target {
            CheckoutStep::Cart => CheckoutStep::Cart,
            CheckoutStep::Address | CheckoutStep::Payment => {
                require_user(user)?;
                require_items(&shopper.cart)?;
                if target == CheckoutStep::Payment && shopper.checkout.selected_address.is_some() {
                    CheckoutStep::Payment
                } else {
                    CheckoutStep::Address
                }
            }
            CheckoutStep::Success => {
                warn!("Ignoring request to open checkout on the success step");
                current
            }
        };

        shopper.checkout.step = step;
        Ok(step)
    }

    /// `cart -> address`.
    ///
    /// # Errors
    ///
    /// `AuthRequired` without a user, `Validation` for an empty cart,
    /// `InvalidTransition` when not on `cart`.
    pub fn begin_checkout(
        &self,
        shopper: &mut Shopper,
        user: Option<&CurrentUser>,
    ) -> Result<CheckoutStep, CheckoutError> {
        expect_step(&shopper.checkout, CheckoutStep::Cart, CheckoutStep::Address)?;
        require_user(user)?;
        require_items(&shopper.cart)?;

        shopper.checkout.step = CheckoutStep::Address;
        Ok(CheckoutStep::Address)
    }

    /// Go back one step where allowed. Going back from `cart` is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` on `success`. `Validation` when leaving `payment`
    /// while a payment is awaiting confirmation.
    pub fn back(&self, shopper: &mut Shopper) -> Result<CheckoutStep, CheckoutError> {
        let current = shopper.checkout.step;
        match current {
            CheckoutStep::Success => Err(CheckoutError::InvalidTransition {
                from: current,
                to: CheckoutStep::Payment,
            }),
            CheckoutStep::Payment if shopper.checkout.has_pending_payment() => {
                Err(CheckoutError::Validation(
                    "Aguarde a confirmação do pagamento em andamento.".to_string(),
                ))
            }
            _ => {
                let step = current.previous().unwrap_or(current);
                shopper.checkout.step = step;
                Ok(step)
            }
        }
    }

    /// `address -> payment` with a saved or newly entered address.
    ///
    /// New addresses are validated and stored before the transition.
    ///
    /// # Errors
    ///
    /// Validation, auth and backend errors leave the step on `address`.
    #[instrument(skip(self, shopper, user, choice), fields(shopper = %shopper.id()))]
    pub async fn confirm_address(
        &self,
        shopper: &mut Shopper,
        user: Option<&CurrentUser>,
        choice: AddressChoice,
    ) -> Result<CheckoutStep, CheckoutError> {
        let user = require_user(user)?;
        expect_step(&shopper.checkout, CheckoutStep::Address, CheckoutStep::Payment)?;
        require_items(&shopper.cart)?;

        let address = match choice {
            AddressChoice::Saved(id) => self
                .inner
                .backend
                .addresses(user.id)
                .await?
                .into_iter()
                .find(|a| a.id == Some(id))
                .ok_or_else(|| {
                    CheckoutError::Validation("Endereço não encontrado.".to_string())
                })?,
            AddressChoice::New(new) => {
                let valid = new.validate()?;
                self.inner.backend.save_address(user.id, &valid).await?
            }
        };

        shopper.checkout.selected_address = Some(address);
        shopper.checkout.step = CheckoutStep::Payment;
        Ok(CheckoutStep::Payment)
    }

    /// The user's saved addresses.
    ///
    /// # Errors
    ///
    /// `AuthRequired` without a user, `Backend` when the query fails.
    pub async fn list_addresses(
        &self,
        user: Option<&CurrentUser>,
    ) -> Result<Vec<Address>, CheckoutError> {
        let user = require_user(user)?;
        Ok(self.inner.backend.addresses(user.id).await?)
    }

    /// Close the checkout drawer.
    ///
    /// On `cart` the selected address and payment id are cleared. On
    /// `success` the whole session is reset. Mid-checkout nothing changes.
    pub async fn close(&self, shopper: &mut Shopper) -> CheckoutStep {
        match shopper.checkout.step {
            CheckoutStep::Cart => shopper.checkout.reset_transient(),
            CheckoutStep::Success => {
                shopper.checkout = CheckoutSession::default();
                shopper.stop_watch();
                shopper.installments.reset().await;
            }
            CheckoutStep::Address | CheckoutStep::Payment => {}
        }
        shopper.checkout.step
    }

    // =========================================================================
    // Coupons
    // =========================================================================

    /// Current subtotal, discount and total.
    #[must_use]
    pub fn totals(&self, shopper: &Shopper) -> Totals {
        CouponPolicy::totals(
            shopper.cart.total_price(),
            shopper.checkout.applied_coupon.as_ref(),
        )
    }

    /// Apply a coupon code (case-insensitive).
    ///
    /// Usage is not counted here; it is counted when the order is recorded.
    ///
    /// # Errors
    ///
    /// `Coupon` errors for unknown, expired, exhausted or malformed coupons;
    /// the previously applied coupon (if any) and the totals are unchanged.
    /// `Validation` once the order is finished or while a payment is
    /// awaiting confirmation.
    #[instrument(skip(self, shopper), fields(shopper = %shopper.id()))]
    pub async fn apply_coupon(
        &self,
        shopper: &mut Shopper,
        code: &str,
    ) -> Result<Totals, CheckoutError> {
        coupon_unlocked(&shopper.checkout)?;

        let code = normalize_coupon_code(code);
        if code.is_empty() {
            return Err(CouponError::NotFound.into());
        }

        let coupon = self
            .inner
            .backend
            .find_coupon(&code)
            .await?
            .ok_or(CouponError::NotFound)?;
        self.inner.coupons.check(&coupon, self.inner.coupons.today())?;

        info!(coupon = %coupon.code, percent = %coupon.discount_percent, "Coupon applied");
        shopper.checkout.applied_coupon = Some(coupon);
        Ok(self.totals(shopper))
    }

    /// Remove the applied coupon.
    ///
    /// # Errors
    ///
    /// `Validation` once the order is finished or while a payment is
    /// awaiting confirmation; the coupon stays applied.
    pub fn remove_coupon(&self, shopper: &mut Shopper) -> Result<Totals, CheckoutError> {
        coupon_unlocked(&shopper.checkout)?;
        shopper.checkout.applied_coupon = None;
        Ok(self.totals(shopper))
    }

    // =========================================================================
    // Payments
    // =========================================================================

    fn ready_to_pay(&self, shopper: &Shopper) -> Result<Totals, CheckoutError> {
        expect_step(&shopper.checkout, CheckoutStep::Payment, CheckoutStep::Success)?;
        if shopper.checkout.selected_address.is_none() {
            return Err(CheckoutError::Validation(
                "Selecione um endereço de entrega.".to_string(),
            ));
        }
        require_items(&shopper.cart)?;
        if shopper.checkout.has_pending_payment() {
            return Err(CheckoutError::Validation(
                "Já existe um pagamento em andamento.".to_string(),
            ));
        }

        let totals = self.totals(shopper);
        if !totals.total.is_positive() {
            return Err(CheckoutError::Validation(
                "O valor do pedido deve ser maior que zero.".to_string(),
            ));
        }
        Ok(totals)
    }

    fn payment_data(
        shopper: &mut Shopper,
        user: &CurrentUser,
        method: PaymentMethod,
        amount: Price,
        first_name: Option<String>,
        identification: Option<Identification>,
    ) -> PaymentData {
        PaymentData {
            amount,
            description: format!("Versos Musicais ({} itens)", shopper.cart.total_items()),
            payer: Payer {
                email: user.email.clone(),
                first_name,
                identification,
            },
            idempotency_key: shopper.checkout.idempotency_key(method, amount),
        }
    }

    /// Pay by card.
    ///
    /// Approved payments complete the checkout immediately. Rejections keep
    /// the shopper on `payment`. Anything else starts status polling.
    ///
    /// # Errors
    ///
    /// Guard failures, `Payment` for processor errors and `PaymentRejected`
    /// for declines. The step stays on `payment` in every error case.
    #[instrument(skip(self, handle, user, request))]
    pub async fn pay_with_card(
        &self,
        handle: &ShopperHandle,
        user: Option<&CurrentUser>,
        request: CardRequest,
    ) -> Result<PaymentProgress, CheckoutError> {
        let user = require_user(user)?;
        let mut shopper = handle.lock().await;
        let totals = self.ready_to_pay(&shopper)?;

        let selection = shopper.installments.current().await;
        let payment_method_id = request
            .payment_method_id
            .filter(|m| !m.trim().is_empty())
            .or(selection.payment_method_id)
            .ok_or_else(|| {
                CheckoutError::Validation(
                    "Não foi possível identificar a bandeira do cartão.".to_string(),
                )
            })?;
        let installments = request.installments.or(selection.selected).unwrap_or(1);

        let token = self.inner.gateway.create_card_token(&request.card).await?;

        let payment = CardPayment {
            data: Self::payment_data(
                &mut shopper,
                user,
                PaymentMethod::Card,
                totals.total,
                None,
                request.identification,
            ),
            installments,
            payment_method_id,
            issuer_id: request.issuer_id,
        };

        shopper.checkout.notice = None;
        let outcome = self
            .inner
            .gateway
            .create_card_payment(&token, &payment, user.id)
            .await?;

        match outcome {
            PaymentOutcome::Approved { payment_id } => {
                info!(%payment_id, "Card payment approved");
                let purchase = Purchase::snapshot(&shopper, totals);
                let completion = self
                    .complete_with(&mut shopper, user, &payment_id, purchase)
                    .await?;
                Ok(PaymentProgress::Completed(completion))
            }
            PaymentOutcome::Rejected { payment_id, reason } => {
                info!(%payment_id, %reason, "Card payment rejected");
                shopper.checkout.end_attempt();
                shopper.checkout.notice = Some(PaymentNotice::Rejected {
                    reason: reason.clone(),
                });
                Err(CheckoutError::PaymentRejected { reason })
            }
            PaymentOutcome::Pending { payment_id } => {
                info!(%payment_id, "Card payment pending; polling");
                let pending = PendingPayment {
                    payment_id: payment_id.clone(),
                    method: PaymentMethod::Card,
                    pix: None,
                    totals,
                    coupon_code: shopper.checkout.coupon_code(),
                    items: shopper.cart.items().to_vec(),
                    user: user.clone(),
                };
                self.watch(handle, &mut shopper, pending);
                Ok(PaymentProgress::Pending { payment_id })
            }
        }
    }

    /// Pay by PIX. The QR payload is returned and the charge is polled.
    ///
    /// # Errors
    ///
    /// Guard failures and `Payment` for processor errors.
    #[instrument(skip(self, handle, user, request))]
    pub async fn pay_with_pix(
        &self,
        handle: &ShopperHandle,
        user: Option<&CurrentUser>,
        request: PixRequest,
    ) -> Result<PaymentProgress, CheckoutError> {
        let user = require_user(user)?;
        let mut shopper = handle.lock().await;
        let totals = self.ready_to_pay(&shopper)?;

        let data = Self::payment_data(
            &mut shopper,
            user,
            PaymentMethod::Pix,
            totals.total,
            request.first_name,
            request.identification,
        );

        shopper.checkout.notice = None;
        let charge = self.inner.gateway.create_pix_payment(&data, user.id).await?;
        info!(payment_id = %charge.payment_id, "PIX charge created; polling");

        let pending = PendingPayment {
            payment_id: charge.payment_id.clone(),
            method: PaymentMethod::Pix,
            pix: Some(charge.clone()),
            totals,
            coupon_code: shopper.checkout.coupon_code(),
            items: shopper.cart.items().to_vec(),
            user: user.clone(),
        };
        self.watch(handle, &mut shopper, pending);

        Ok(PaymentProgress::Pix(charge))
    }

    /// Start polling a pending payment.
    fn watch(&self, handle: &ShopperHandle, shopper: &mut Shopper, pending: PendingPayment) {
        let flow = self.clone();
        let weak = Arc::downgrade(handle);

        let watch = PaymentWatch::spawn(
            Arc::clone(&self.inner.gateway),
            pending.payment_id.clone(),
            self.inner.poll_interval,
            self.inner.poll_timeout,
            move |outcome| async move { flow.settle(&weak, outcome).await },
        );

        shopper.checkout.pending_payment = Some(pending);
        shopper.watch = Some(watch);
    }

    /// Apply a poll outcome to the shopper that started the payment.
    async fn settle(&self, shopper: &Weak<Mutex<Shopper>>, outcome: PollOutcome) {
        let Some(handle) = shopper.upgrade() else {
            warn!(payment_id = outcome.payment_id(), "Shopper gone before payment settled");
            return;
        };
        let mut shopper = handle.lock().await;

        if let Some(watch) = shopper.watch.take() {
            if watch.payment_id() == outcome.payment_id() {
                watch.detach();
            } else {
                shopper.watch = Some(watch);
            }
        }

        let Some(pending) = shopper
            .checkout
            .pending_payment
            .take_if(|p| p.payment_id == outcome.payment_id())
        else {
            debug!(payment_id = outcome.payment_id(), "Payment no longer pending");
            return;
        };

        match outcome {
            PollOutcome::Approved { payment_id } => {
                let purchase = Purchase {
                    totals: pending.totals,
                    items: pending.items,
                    coupon_code: pending.coupon_code,
                };
                let result = self
                    .complete_with(&mut shopper, &pending.user, &payment_id, purchase)
                    .await;
                if let Err(e) = result {
                    error!(%payment_id, error = %e, "Approved payment could not complete checkout");
                    sentry::capture_error(&e);
                }
            }
            PollOutcome::Rejected { payment_id, reason } => {
                info!(%payment_id, %reason, "Pending payment rejected");
                shopper.checkout.end_attempt();
                shopper.checkout.notice = Some(PaymentNotice::Rejected { reason });
            }
            PollOutcome::TimedOut { payment_id } => {
                shopper.checkout.end_attempt();
                shopper.checkout.notice = Some(PaymentNotice::TimedOut { payment_id });
            }
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// `payment -> success` for an approved payment.
    ///
    /// The total and payment id are frozen before the paid entries leave the
    /// cart. The order is then recorded; a storage failure still completes
    /// the checkout with a degraded status. Completing the same payment twice
    /// returns the first completion.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when not on `payment`.
    pub async fn complete(
        &self,
        shopper: &mut Shopper,
        user: &CurrentUser,
        payment_id: &str,
    ) -> Result<Completion, CheckoutError> {
        let totals = self.totals(shopper);
        let purchase = Purchase::snapshot(shopper, totals);
        self.complete_with(shopper, user, payment_id, purchase).await
    }

    #[instrument(skip(self, shopper, user, purchase), fields(user_id = %user.id))]
    async fn complete_with(
        &self,
        shopper: &mut Shopper,
        user: &CurrentUser,
        payment_id: &str,
        purchase: Purchase,
    ) -> Result<Completion, CheckoutError> {
        if let Some(done) = &shopper.checkout.completion
            && done.payment_id == payment_id
        {
            debug!("Payment already completed");
            return Ok(done.clone());
        }
        expect_step(&shopper.checkout, CheckoutStep::Payment, CheckoutStep::Success)?;

        let total = purchase.totals.total;
        shopper.checkout.payment_id = Some(payment_id.to_string());
        shopper.checkout.final_total_price = Some(total);

        let paid = purchase.items.clone();
        let persistence = self
            .persist(&shopper.checkout, user, payment_id, purchase)
            .await;

        shopper.cart.remove_purchased(&paid);
        shopper.checkout.end_attempt();
        shopper.checkout.pending_payment = None;
        shopper.checkout.notice = None;
        shopper.checkout.step = CheckoutStep::Success;

        let completion = Completion {
            payment_id: payment_id.to_string(),
            final_total: total,
            persistence,
        };
        shopper.checkout.completion = Some(completion.clone());
        Ok(completion)
    }

    async fn persist(
        &self,
        session: &CheckoutSession,
        user: &CurrentUser,
        payment_id: &str,
        purchase: Purchase,
    ) -> PersistenceStatus {
        let Some(address) = session.selected_address.clone() else {
            error!(payment_id, "Paid checkout has no selected address");
            return PersistenceStatus::Degraded {
                message: SUPPORT_MESSAGE.to_string(),
            };
        };

        let order = NewOrder {
            user_id: user.id,
            payment_id: payment_id.to_string(),
            total_amount: purchase.totals.total,
            original_total: purchase.totals.subtotal,
            discount_amount: purchase.totals.discount,
            coupon_code: purchase.coupon_code,
            address,
            items: purchase.items,
        };

        match self.inner.backend.record_order(&order).await {
            Ok(OrderReceipt::Created(order_id)) => {
                info!(%order_id, payment_id, "Order recorded");
                PersistenceStatus::Recorded { order_id }
            }
            Ok(OrderReceipt::AlreadyRecorded) => {
                info!(payment_id, "Order already recorded");
                PersistenceStatus::AlreadyRecorded
            }
            Err(e) => {
                error!(payment_id, error = %e, "Failed to record paid order");
                sentry::capture_error(&e);
                PersistenceStatus::Degraded {
                    message: SUPPORT_MESSAGE.to_string(),
                }
            }
        }
    }
}
