//! Cart change notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// A cart change that other components react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CartEvent {
    /// Every entry was removed from a shopper's cart.
    Cleared { shopper: Uuid },
}

impl CartEvent {
    /// The shopper the event belongs to.
    #[must_use]
    pub const fn shopper(&self) -> Uuid {
        match self {
            Self::Cleared { shopper } => *shopper,
        }
    }

    /// Event name used on the SSE stream and in `HX-Trigger`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Cleared { .. } => "cart-cleared",
        }
    }
}

/// Broadcast channel for [`CartEvent`]s.
#[derive(Clone)]
pub struct CartEvents {
    tx: broadcast::Sender<CartEvent>,
}

impl CartEvents {
    /// Create a channel buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: CartEvent) {
        match self.tx.send(event) {
            Ok(count) => debug!(subscribers = count, "Published cart event"),
            Err(_) => debug!("Cart event published with no subscribers"),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.tx.subscribe()
    }
}

impl Default for CartEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
