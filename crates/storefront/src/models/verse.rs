//! Catalog verse records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use versos_core::{CartItem, Price, VerseId};

/// A verse (translated lyric or score) offered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verse {
    pub id: VerseId,
    pub title: String,
    pub artist: String,
    pub category: String,
    pub image_url: Option<String>,
    pub price: Price,
    pub created_at: DateTime<Utc>,
}

impl Verse {
    /// Build the cart entry for this verse.
    #[must_use]
    pub fn to_cart_item(&self) -> CartItem {
        CartItem::new(
            self.id.to_string(),
            self.title.clone(),
            self.artist.clone(),
            self.category.clone(),
            self.image_url.clone(),
            self.price,
        )
    }
}
