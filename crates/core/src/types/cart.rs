//! Cart line items.

use serde::{Deserialize, Serialize};

use super::{Price, VerseId};

/// An entry in a shopper's cart.
///
/// Each verse is purchasable once, so an entry always represents a single
/// unit: `quantity` is carried for wire compatibility and is always 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Verse identifier, or a derived slug for items without a numeric ID.
    pub id: String,
    /// Verse title.
    pub title: String,
    /// Performing or original artist.
    pub artist: String,
    /// Catalog category (e.g. "hinos", "pop").
    pub category: String,
    /// Cover image URL.
    pub image: Option<String>,
    /// Unit price.
    pub price: Price,
    /// Always 1.
    pub quantity: u32,
}

impl CartItem {
    /// Create a single-unit cart entry.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        category: impl Into<String>,
        image: Option<String>,
        price: Price,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            category: category.into(),
            image,
            price,
            quantity: 1,
        }
    }

    /// Whether the entry carries a usable title.
    #[must_use]
    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }

    /// The numeric verse ID, when `id` is not a slug.
    #[must_use]
    pub fn verse_id(&self) -> Option<VerseId> {
        self.id.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_single_unit() {
        let item = CartItem::new("7", "Hallelujah", "Cohen", "pop", None, Price::from_cents(1500));
        assert_eq!(item.quantity, 1);
        assert_eq!(item.verse_id(), Some(VerseId::new(7)));
    }

    #[test]
    fn test_blank_title() {
        let item = CartItem::new("7", "   ", "Cohen", "pop", None, Price::ZERO);
        assert!(!item.has_title());
    }

    #[test]
    fn test_slug_has_no_verse_id() {
        let item = CartItem::new("hallelujah-pt", "Aleluia", "Cohen", "pop", None, Price::ZERO);
        assert_eq!(item.verse_id(), None);
    }
}
