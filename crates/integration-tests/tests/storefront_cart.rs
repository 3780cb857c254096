//! Integration tests for the cart.
//!
//! These tests require:
//! - A migrated and seeded `PostgreSQL` database
//! - The storefront running (cargo run -p versos-storefront)
//!
//! Run with: cargo test -p versos-integration-tests -- --ignored

use reqwest::StatusCode;
use serde_json::Value;

use versos_integration_tests::{add_to_cart, first_verse_id, shopper_client, storefront_base_url};

async fn cart(client: &reqwest::Client) -> Value {
    client
        .get(format!("{}/cart", storefront_base_url()))
        .send()
        .await
        .expect("Failed to get cart")
        .json()
        .await
        .expect("Failed to parse cart")
}

#[tokio::test]
#[ignore = "Requires running storefront server and seeded database"]
async fn test_health() {
    let resp = shopper_client()
        .get(format!("{}/health", storefront_base_url()))
        .send()
        .await
        .expect("Failed to reach storefront");

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "Requires running storefront server and seeded database"]
async fn test_add_same_verse_twice_keeps_one_entry() {
    let client = shopper_client();
    let verse_id = first_verse_id(&client).await;

    let first = add_to_cart(&client, verse_id).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(
        first.headers()["hx-trigger"]
            .to_str()
            .unwrap_or_default()
            .contains("cart-updated")
    );

    let second = add_to_cart(&client, verse_id).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get("hx-trigger").is_none());

    let cart = cart(&client).await;
    assert_eq!(cart["total_items"], 1);
}

#[tokio::test]
#[ignore = "Requires running storefront server and seeded database"]
async fn test_carts_are_per_session() {
    let alice = shopper_client();
    let bob = shopper_client();
    let verse_id = first_verse_id(&alice).await;

    add_to_cart(&alice, verse_id).await;

    assert_eq!(cart(&alice).await["total_items"], 1);
    assert_eq!(cart(&bob).await["total_items"], 0);
}

#[tokio::test]
#[ignore = "Requires running storefront server and seeded database"]
async fn test_remove_and_clear() {
    let client = shopper_client();
    let base_url = storefront_base_url();
    let verse_id = first_verse_id(&client).await;

    add_to_cart(&client, verse_id).await;
    let resp = client
        .post(format!("{base_url}/cart/remove"))
        .form(&[("id", verse_id.to_string())])
        .send()
        .await
        .expect("Failed to remove");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(cart(&client).await["total_items"], 0);

    // Removing an absent entry is not an error
    let resp = client
        .post(format!("{base_url}/cart/remove"))
        .form(&[("id", "nao-existe")])
        .send()
        .await
        .expect("Failed to remove");
    assert_eq!(resp.status(), StatusCode::OK);

    add_to_cart(&client, verse_id).await;
    client
        .post(format!("{base_url}/cart/clear"))
        .send()
        .await
        .expect("Failed to clear");
    assert_eq!(cart(&client).await["total_items"], 0);
}

#[tokio::test]
#[ignore = "Requires running storefront server and seeded database"]
async fn test_unknown_verse_is_not_found() {
    let client = shopper_client();
    let resp = add_to_cart(&client, i64::from(i32::MAX)).await;

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
