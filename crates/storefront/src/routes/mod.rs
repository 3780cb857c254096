//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness
//! GET  /health/ready           - Readiness (database)
//!
//! # Catalog
//! GET  /verses                 - Verses loaded so far (?page, q, category, sort)
//! GET  /verses/{id}            - Verse detail
//!
//! # Cart
//! GET  /cart                   - Cart contents and totals
//! POST /cart/add               - Add a verse (no-op when already present)
//! POST /cart/remove            - Remove an entry
//! POST /cart/clear             - Empty the cart
//! GET  /cart/count             - Cart count badge
//! GET  /cart/events            - Cart events (SSE)
//! POST /cart/open              - Ask the checkout to open on a step
//!
//! # Checkout
//! GET    /checkout             - Checkout state (polled while a payment is pending)
//! POST   /checkout/open        - Open, honouring /cart/open
//! POST   /checkout/start       - cart -> address
//! POST   /checkout/back        - One step back
//! POST   /checkout/close       - Close the drawer
//! GET    /checkout/addresses   - Saved addresses
//! POST   /checkout/address     - address -> payment
//! POST   /checkout/coupon      - Apply coupon
//! DELETE /checkout/coupon      - Remove coupon
//! POST   /checkout/installments - Installment plans for a BIN / method
//! POST   /checkout/pay/card    - Pay by card
//! POST   /checkout/pay/pix     - Pay by PIX
//! GET    /checkout/status      - Same as GET /checkout
//!
//! # Auth
//! GET  /login                  - Login page
//! POST /login                  - Login action
//! POST /register               - Register action
//! POST /logout                 - Logout action
//!
//! # Account (requires auth)
//! GET  /account/orders         - Order history
//! GET  /account/addresses      - Saved addresses
//! ```

pub mod account;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod health;
pub mod verses;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::{auth_rate_limiter, payment_rate_limiter};
use crate::state::AppState;

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/login",
            post(auth::login)
                .layer(auth_rate_limiter())
                .get(auth::login_page),
        )
        .route("/register", post(auth::register).layer(auth_rate_limiter()))
        .route("/logout", post(auth::logout))
}

/// Create the verse routes router.
pub fn verse_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(verses::index))
        .route("/{id}", get(verses::show))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/remove", post(cart::remove))
        .route("/clear", post(cart::clear))
        .route("/count", get(cart::count))
        .route("/events", get(cart::events))
        .route("/open", post(cart::open))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    let payments = Router::new()
        .route("/card", post(checkout::pay_card))
        .route("/pix", post(checkout::pay_pix))
        .layer(payment_rate_limiter());

    Router::new()
        .route("/", get(checkout::show))
        .route("/status", get(checkout::show))
        .route("/open", post(checkout::open))
        .route("/start", post(checkout::start))
        .route("/back", post(checkout::back))
        .route("/close", post(checkout::close))
        .route("/addresses", get(checkout::addresses))
        .route("/address", post(checkout::confirm_address))
        .route(
            "/coupon",
            post(checkout::apply_coupon).delete(checkout::remove_coupon),
        )
        .route("/installments", post(checkout::installments))
        .nest("/pay", payments)
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(account::orders))
        .route("/addresses", get(account::addresses))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/verses", verse_routes())
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
        .nest("/account", account_routes())
        .merge(auth_routes())
}
