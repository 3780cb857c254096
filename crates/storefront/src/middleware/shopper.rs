//! Shopper extractor.
//!
//! Each browser session is tied to a shopper id. The id is created on first
//! use and kept in the session, so the cart follows the visitor across pages
//! and across login.

use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::session_keys;
use crate::shopper::ShopperHandle;
use crate::state::AppState;

/// The in-memory state for this session's shopper.
pub struct CurrentShopper {
    pub id: Uuid,
    pub handle: ShopperHandle,
}

/// Read the shopper id from the session, creating one if absent.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn shopper_id(session: &Session) -> Result<Uuid, tower_sessions::session::Error> {
    if let Some(id) = session.get::<Uuid>(session_keys::SHOPPER_ID).await? {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    session.insert(session_keys::SHOPPER_ID, id).await?;
    tracing::debug!(shopper = %id, "New shopper");
    Ok(id)
}

impl FromRequestParts<AppState> for CurrentShopper {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("session layer missing".to_string()))?;

        let id = shopper_id(&session).await?;
        let handle = state.shoppers().get_or_create(id).await;

        Ok(Self { id, handle })
    }
}
