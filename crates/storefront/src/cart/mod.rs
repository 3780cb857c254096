//! Per-shopper cart.
//!
//! Each verse is purchasable once, so the cart holds at most one entry per
//! id and every entry counts as a single unit. Clearing the cart publishes a
//! [`CartEvent::Cleared`] so listeners (the SSE stream, "in cart" badges) can
//! resynchronise.

mod events;

pub use events::{CartEvent, CartEvents};

use tracing::{debug, warn};
use uuid::Uuid;

use versos_core::{CartItem, CheckoutStep, Price};

/// Result of [`CartStore::add_to_cart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The id was already present; the cart is unchanged.
    AlreadyInCart,
    /// The entry had a blank title and was ignored.
    Rejected,
}

/// A shopper's cart plus the step the checkout should open on.
pub struct CartStore {
    shopper: Uuid,
    items: Vec<CartItem>,
    initial_step: Option<CheckoutStep>,
    events: CartEvents,
}

impl CartStore {
    #[must_use]
    pub const fn new(shopper: Uuid, events: CartEvents) -> Self {
        Self {
            shopper,
            items: Vec::new(),
            initial_step: None,
            events,
        }
    }

    #[must_use]
    pub const fn shopper(&self) -> Uuid {
        self.shopper
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// Append an entry unless its title is blank or its id is already present.
    pub fn add_to_cart(&mut self, item: CartItem) -> AddOutcome {
        if !item.has_title() {
            warn!(item_id = %item.id, "Ignoring cart item without a title");
            return AddOutcome::Rejected;
        }

        if self.contains(&item.id) {
            debug!(item_id = %item.id, "Item already in cart");
            return AddOutcome::AlreadyInCart;
        }

        self.items.push(CartItem {
            quantity: 1,
            ..item
        });
        AddOutcome::Added
    }

    /// Remove the entry with `id`. Returns whether anything was removed.
    pub fn remove_from_cart(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    /// Empty the cart and notify listeners.
    pub fn clear_cart(&mut self) {
        self.items.clear();
        self.events.publish(CartEvent::Cleared {
            shopper: self.shopper,
        });
    }

    /// Remove the entries an approved payment covered.
    ///
    /// Entries added after the payment was submitted stay in the cart. When
    /// nothing is left the cart is cleared and listeners are notified.
    pub fn remove_purchased(&mut self, purchased: &[CartItem]) {
        self.items
            .retain(|item| !purchased.iter().any(|paid| paid.id == item.id));
        if self.items.is_empty() {
            self.clear_cart();
        }
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Sum of entry prices. Each entry counts once regardless of `quantity`.
    #[must_use]
    pub fn total_price(&self) -> Price {
        self.items.iter().map(|item| item.price).sum()
    }

    /// Ask the next checkout open to start on `step`.
    pub fn open_cart_to_step(&mut self, step: CheckoutStep) {
        self.initial_step = Some(step);
    }

    /// The requested initial step, if any.
    #[must_use]
    pub const fn initial_checkout_step(&self) -> Option<CheckoutStep> {
        self.initial_step
    }

    /// Consume the requested initial step.
    pub fn take_initial_step(&mut self) -> Option<CheckoutStep> {
        self.initial_step.take()
    }
}
