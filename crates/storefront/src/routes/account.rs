//! Account route handlers. These routes require authentication.

use axum::{Json, extract::State};

use versos_core::Address;

use crate::db::{AddressRepository, OrderRepository, OrderSummary};
use crate::error::Result;
use crate::middleware::RequireAuth;
use crate::state::AppState;

/// The user's orders, newest first.
pub async fn orders(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<OrderSummary>>> {
    let orders = OrderRepository::new(state.pool())
        .list_for_user(user.id)
        .await?;
    Ok(Json(orders))
}

/// The user's saved addresses, default first.
pub async fn addresses(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
) -> Result<Json<Vec<Address>>> {
    let addresses = AddressRepository::new(state.pool())
        .list_for_user(user.id)
        .await?;
    Ok(Json(addresses))
}
