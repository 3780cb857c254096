//! Checkout route handlers.
//!
//! Every handler answers with the shopper's checkout view so the front end
//! can render whichever step the flow ended on. Failed guards return an
//! error status and leave the step unchanged.

use axum::{
    Form, Json,
    extract::State,
    response::{AppendHeaders, IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use versos_core::{Address, AddressId, CheckoutStep, NewAddress, Price};

use crate::checkout::{
    AddressChoice, CardRequest, Completion, PaymentNotice, PaymentProgress, PendingPayment,
    PixRequest, Totals,
};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::middleware::{CurrentShopper, OptionalAuth};
use crate::payments::{
    CardData, Identification, InstallmentQuery, InstallmentSelection, LookupResult,
};
use crate::routes::cart::CART_UPDATED;
use crate::shopper::Shopper;
use crate::state::AppState;

/// Event name sent when a payment completes.
pub const CHECKOUT_COMPLETED: &str = "checkout-completed";

// =============================================================================
// Views
// =============================================================================

/// Everything the checkout drawer shows.
#[derive(Debug, Serialize)]
pub struct CheckoutView {
    pub step: CheckoutStep,
    pub totals: Totals,
    pub item_count: usize,
    pub selected_address: Option<Address>,
    pub coupon_code: Option<String>,
    pub installments: InstallmentSelection,
    pub pending_payment: Option<PendingPayment>,
    pub notice: Option<PaymentNotice>,
    pub payment_id: Option<String>,
    pub final_total_price: Option<Price>,
    pub completion: Option<Completion>,
}

async fn view(state: &AppState, shopper: &Shopper) -> CheckoutView {
    let session = &shopper.checkout;
    CheckoutView {
        step: session.step,
        totals: state.checkout().totals(shopper),
        item_count: shopper.cart.total_items(),
        selected_address: session.selected_address.clone(),
        coupon_code: session.applied_coupon.as_ref().map(|c| c.code.clone()),
        installments: shopper.installments.current().await,
        pending_payment: session.pending_payment.clone(),
        notice: session.notice.clone(),
        payment_id: session.payment_id.clone(),
        final_total_price: session.final_total_price,
        completion: session.completion.clone(),
    }
}

// =============================================================================
// Steps
// =============================================================================

/// Current checkout state. Also polled by the front end while a payment is
/// pending.
pub async fn show(State(state): State<AppState>, shopper: CurrentShopper) -> Json<CheckoutView> {
    let shopper = shopper.handle.lock().await;
    Json(view(&state, &shopper).await)
}

/// Open the checkout, honouring a step requested via `/cart/open`.
#[instrument(skip_all, fields(shopper = %shopper.id))]
pub async fn open(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<CheckoutView>> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().open(&mut shopper, user.as_ref())?;
    Ok(Json(view(&state, &shopper).await))
}

/// `cart -> address`. Unauthenticated shoppers are redirected to login with
/// their cart untouched.
#[instrument(skip_all, fields(shopper = %shopper.id))]
pub async fn start(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<CheckoutView>> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().begin_checkout(&mut shopper, user.as_ref())?;
    add_breadcrumb("checkout", "Started checkout", None);
    Ok(Json(view(&state, &shopper).await))
}

/// Go back one step.
pub async fn back(
    State(state): State<AppState>,
    shopper: CurrentShopper,
) -> Result<Json<CheckoutView>> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().back(&mut shopper)?;
    Ok(Json(view(&state, &shopper).await))
}

/// Close the drawer.
pub async fn close(State(state): State<AppState>, shopper: CurrentShopper) -> Json<CheckoutView> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().close(&mut shopper).await;
    Json(view(&state, &shopper).await)
}

// =============================================================================
// Address
// =============================================================================

/// The user's saved addresses, default first.
pub async fn addresses(
    State(state): State<AppState>,
    OptionalAuth(user): OptionalAuth,
) -> Result<Json<Vec<Address>>> {
    Ok(Json(state.checkout().list_addresses(user.as_ref()).await?))
}

/// Either a saved address id or a new address.
#[derive(Debug, Deserialize)]
pub struct AddressForm {
    pub address_id: Option<i32>,
    pub address: Option<NewAddress>,
}

impl TryFrom<AddressForm> for AddressChoice {
    type Error = AppError;

    fn try_from(form: AddressForm) -> std::result::Result<Self, Self::Error> {
        match (form.address_id, form.address) {
            (Some(id), None) => Ok(Self::Saved(AddressId::new(id))),
            (None, Some(address)) => Ok(Self::New(address)),
            _ => Err(AppError::BadRequest(
                "send either address_id or address".to_string(),
            )),
        }
    }
}

/// `address -> payment`.
#[instrument(skip_all, fields(shopper = %shopper.id))]
pub async fn confirm_address(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    OptionalAuth(user): OptionalAuth,
    Json(form): Json<AddressForm>,
) -> Result<Json<CheckoutView>> {
    let choice = AddressChoice::try_from(form)?;
    let mut shopper = shopper.handle.lock().await;
    state
        .checkout()
        .confirm_address(&mut shopper, user.as_ref(), choice)
        .await?;
    Ok(Json(view(&state, &shopper).await))
}

// =============================================================================
// Coupons
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CouponForm {
    pub code: String,
}

/// Apply a coupon code.
#[instrument(skip_all, fields(shopper = %shopper.id, code = %form.code))]
pub async fn apply_coupon(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    Form(form): Form<CouponForm>,
) -> Result<Json<CheckoutView>> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().apply_coupon(&mut shopper, &form.code).await?;
    Ok(Json(view(&state, &shopper).await))
}

/// Remove the applied coupon.
pub async fn remove_coupon(
    State(state): State<AppState>,
    shopper: CurrentShopper,
) -> Result<Json<CheckoutView>> {
    let mut shopper = shopper.handle.lock().await;
    state.checkout().remove_coupon(&mut shopper)?;
    Ok(Json(view(&state, &shopper).await))
}

// =============================================================================
// Installments
// =============================================================================

/// Installment lookup, or a plan choice when only `select` is sent.
#[derive(Debug, Deserialize)]
pub struct InstallmentsForm {
    /// Card number as typed so far; only the first 6 digits are used.
    pub bin: Option<String>,
    pub payment_method_id: Option<String>,
    pub select: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InstallmentsView {
    Current(InstallmentSelection),
    /// A newer lookup for this shopper replaced this one.
    Superseded,
}

/// Look up installment plans for the current total.
///
/// The lookup runs outside the shopper lock; when several are in flight only
/// the newest one is applied.
pub async fn installments(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    Json(form): Json<InstallmentsForm>,
) -> Result<Json<InstallmentsView>> {
    let (lookup, amount) = {
        let shopper = shopper.handle.lock().await;
        (
            std::sync::Arc::clone(&shopper.installments),
            state.checkout().totals(&shopper).total,
        )
    };

    if form.bin.is_none()
        && form.payment_method_id.is_none()
        && let Some(quantity) = form.select
    {
        if !lookup.select(quantity).await {
            return Err(AppError::BadRequest(format!(
                "{quantity} parcelas não disponível"
            )));
        }
        return Ok(Json(InstallmentsView::Current(lookup.current().await)));
    }

    let query = InstallmentQuery {
        amount,
        payment_method_id: form.payment_method_id,
        bin: form.bin,
    };

    match lookup.lookup(state.checkout().gateway().as_ref(), query).await? {
        LookupResult::Applied(selection) => Ok(Json(InstallmentsView::Current(selection))),
        LookupResult::Superseded => Ok(Json(InstallmentsView::Superseded)),
    }
}

// =============================================================================
// Payment
// =============================================================================

/// Card payment form. Card data is never logged or stored.
#[derive(Deserialize)]
pub struct CardForm {
    pub number: SecretString,
    pub security_code: SecretString,
    pub expiration_month: u32,
    pub expiration_year: u32,
    pub holder_name: String,
    pub identification: Option<Identification>,
    pub installments: Option<u32>,
    pub payment_method_id: Option<String>,
    pub issuer_id: Option<String>,
}

impl From<CardForm> for CardRequest {
    fn from(form: CardForm) -> Self {
        Self {
            card: CardData {
                number: form.number,
                security_code: form.security_code,
                expiration_month: form.expiration_month,
                expiration_year: form.expiration_year,
                holder_name: form.holder_name,
                identification: form.identification.clone(),
            },
            installments: form.installments,
            payment_method_id: form.payment_method_id,
            issuer_id: form.issuer_id,
            identification: form.identification,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PixForm {
    pub first_name: Option<String>,
    pub identification: Option<Identification>,
}

fn progress_response(progress: PaymentProgress) -> Response {
    if let PaymentProgress::Completed(completion) = &progress {
        add_breadcrumb(
            "checkout",
            "Payment completed",
            Some(&[("payment_id", completion.payment_id.as_str())]),
        );
        let trigger = format!("{CART_UPDATED}, {CHECKOUT_COMPLETED}");
        return (AppendHeaders([("HX-Trigger", trigger)]), Json(progress)).into_response();
    }
    Json(progress).into_response()
}

/// Pay by card.
#[instrument(skip_all, fields(shopper = %shopper.id))]
pub async fn pay_card(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    OptionalAuth(user): OptionalAuth,
    Json(form): Json<CardForm>,
) -> Result<Response> {
    let progress = state
        .checkout()
        .pay_with_card(&shopper.handle, user.as_ref(), form.into())
        .await?;
    Ok(progress_response(progress))
}

/// Pay by PIX. The answer carries the QR code; completion is reported by
/// `GET /checkout/status`.
#[instrument(skip_all, fields(shopper = %shopper.id))]
pub async fn pay_pix(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    OptionalAuth(user): OptionalAuth,
    Json(form): Json<PixForm>,
) -> Result<Response> {
    let request = PixRequest {
        first_name: form.first_name,
        identification: form.identification,
    };
    let progress = state
        .checkout()
        .pay_with_pix(&shopper.handle, user.as_ref(), request)
        .await?;
    Ok(progress_response(progress))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_address_form_requires_exactly_one_choice() {
        let saved = AddressForm {
            address_id: Some(3),
            address: None,
        };
        assert!(matches!(
            AddressChoice::try_from(saved).unwrap(),
            AddressChoice::Saved(id) if id == AddressId::new(3)
        ));

        let both = AddressForm {
            address_id: Some(3),
            address: Some(NewAddress::default()),
        };
        assert!(AddressChoice::try_from(both).is_err());

        let neither = AddressForm {
            address_id: None,
            address: None,
        };
        assert!(AddressChoice::try_from(neither).is_err());
    }

    #[test]
    fn test_card_form_deserializes_without_optional_fields() {
        let form: CardForm = serde_json::from_str(
            r#"{
                "number": "5031433215406351",
                "security_code": "123",
                "expiration_month": 11,
                "expiration_year": 2030,
                "holder_name": "APRO"
            }"#,
        )
        .unwrap();

        let request = CardRequest::from(form);
        assert_eq!(request.card.holder_name, "APRO");
        assert!(request.installments.is_none());
        assert!(request.card.validate().is_ok());
    }
}
