//! Cart route handlers.
//!
//! Mutations answer with the updated cart and an `HX-Trigger` header so
//! badges and "in cart" indicators refresh.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Form, Json,
    extract::State,
    http::StatusCode,
    response::{
        AppendHeaders, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, instrument, warn};

use versos_core::{CartItem, CheckoutStep, Price, VerseId};

use crate::cart::{AddOutcome, CartStore};
use crate::error::{AppError, Result};
use crate::middleware::CurrentShopper;
use crate::state::AppState;

/// Event name announcing any cart change.
pub const CART_UPDATED: &str = "cart-updated";

/// Cart contents and totals.
#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartItem>,
    pub total_items: usize,
    pub total_price: Price,
}

impl From<&CartStore> for CartView {
    fn from(cart: &CartStore) -> Self {
        Self {
            items: cart.items().to_vec(),
            total_items: cart.total_items(),
            total_price: cart.total_price(),
        }
    }
}

fn cart_updated(cart: &CartStore) -> Response {
    (
        AppendHeaders([("HX-Trigger", CART_UPDATED)]),
        Json(CartView::from(cart)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub verse_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenCartForm {
    pub step: CheckoutStep,
}

#[derive(Debug, Serialize)]
pub struct CartCount {
    pub count: usize,
}

/// Show the cart.
pub async fn show(shopper: CurrentShopper) -> Json<CartView> {
    let shopper = shopper.handle.lock().await;
    Json(CartView::from(&shopper.cart))
}

/// Add a verse to the cart. Adding a verse already in the cart is a no-op.
#[instrument(skip(state, shopper), fields(shopper = %shopper.id))]
pub async fn add(
    State(state): State<AppState>,
    shopper: CurrentShopper,
    Form(form): Form<AddToCartForm>,
) -> Result<Response> {
    let verse = state
        .catalog()
        .get(VerseId::new(form.verse_id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("verse {}", form.verse_id)))?;

    let mut shopper = shopper.handle.lock().await;
    match shopper.cart.add_to_cart(verse.to_cart_item()) {
        AddOutcome::Added => Ok(cart_updated(&shopper.cart)),
        AddOutcome::AlreadyInCart => Ok(Json(CartView::from(&shopper.cart)).into_response()),
        AddOutcome::Rejected => Err(AppError::BadRequest(
            "Este verso não pode ser adicionado ao carrinho.".to_string(),
        )),
    }
}

/// Remove an entry. Removing an absent entry is not an error.
#[instrument(skip(shopper), fields(shopper = %shopper.id))]
pub async fn remove(shopper: CurrentShopper, Form(form): Form<RemoveFromCartForm>) -> Response {
    let mut shopper = shopper.handle.lock().await;
    shopper.cart.remove_from_cart(&form.id);
    cart_updated(&shopper.cart)
}

/// Empty the cart.
#[instrument(skip(shopper), fields(shopper = %shopper.id))]
pub async fn clear(shopper: CurrentShopper) -> Response {
    let mut shopper = shopper.handle.lock().await;
    shopper.cart.clear_cart();
    cart_updated(&shopper.cart)
}

/// Cart count badge.
pub async fn count(shopper: CurrentShopper) -> Json<CartCount> {
    let shopper = shopper.handle.lock().await;
    Json(CartCount {
        count: shopper.cart.total_items(),
    })
}

/// Ask for the checkout to open directly on a step.
///
/// The request is validated when the checkout is next opened.
pub async fn open(shopper: CurrentShopper, Form(form): Form<OpenCartForm>) -> StatusCode {
    shopper.handle.lock().await.cart.open_cart_to_step(form.step);
    StatusCode::NO_CONTENT
}

/// Stream this shopper's cart events as server-sent events.
pub async fn events(
    State(state): State<AppState>,
    shopper: CurrentShopper,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = state.cart_events().subscribe();
    let id = shopper.id;
    debug!(shopper = %id, "Cart event stream opened");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) if event.shopper() == id => {
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event(event.name()).data(json)),
                        Err(e) => warn!(error = %e, "Failed to serialize cart event"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cart event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
