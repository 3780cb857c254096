//! Integration tests for the Versos storefront.
//!
//! These tests talk to a running storefront over HTTP and are `#[ignore]`d
//! by default.
//!
//! # Running Tests
//!
//! ```bash
//! cargo run -p versos-cli -- migrate
//! cargo run -p versos-cli -- seed crates/cli/seed.example.yaml
//! cargo run -p versos-storefront &
//! cargo test -p versos-integration-tests -- --ignored
//! ```
//!
//! `STOREFRONT_BASE_URL` overrides the default `http://localhost:3000`.

use reqwest::{Client, StatusCode, redirect};
use serde_json::Value;
use uuid::Uuid;

/// Base URL for the storefront (configurable via environment).
#[must_use]
pub fn storefront_base_url() -> String {
    std::env::var("STOREFRONT_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// A client with its own cookie jar, so each test is a separate shopper.
///
/// Redirects are not followed so tests can assert on them.
///
/// # Panics
///
/// Panics if the HTTP client cannot be built.
#[must_use]
pub fn shopper_client() -> Client {
    Client::builder()
        .cookie_store(true)
        .redirect(redirect::Policy::none())
        .build()
        .expect("Failed to create HTTP client")
}

/// Register a fresh account and keep its session in the client's jar.
///
/// Returns the email used.
///
/// # Panics
///
/// Panics if the registration request fails or is not redirected.
pub async fn register_fresh_user(client: &Client) -> String {
    let base_url = storefront_base_url();
    let email = format!("teste-{}@versos.test", Uuid::new_v4().simple());

    let resp = client
        .post(format!("{base_url}/register"))
        .form(&[
            ("email", email.as_str()),
            ("password", "senha-segura-123"),
            ("password_confirm", "senha-segura-123"),
        ])
        .send()
        .await
        .expect("Failed to register");

    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    email
}

/// ID of the first verse in the catalog.
///
/// # Panics
///
/// Panics if the catalog is empty (run the seed command first).
pub async fn first_verse_id(client: &Client) -> i64 {
    let base_url = storefront_base_url();
    let listing: Value = client
        .get(format!("{base_url}/verses"))
        .send()
        .await
        .expect("Failed to list verses")
        .json()
        .await
        .expect("Failed to parse verse listing");

    listing["verses"][0]["id"]
        .as_i64()
        .expect("Catalog is empty; seed it first")
}

/// Add a verse to the shopper's cart.
///
/// # Panics
///
/// Panics if the request fails.
pub async fn add_to_cart(client: &Client, verse_id: i64) -> reqwest::Response {
    let base_url = storefront_base_url();
    client
        .post(format!("{base_url}/cart/add"))
        .form(&[("verse_id", verse_id.to_string())])
        .send()
        .await
        .expect("Failed to add to cart")
}
