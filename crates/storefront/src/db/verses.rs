//! Verse catalog repository (`versoes` table).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::instrument;

use versos_core::{Price, VerseId};

use super::RepositoryError;
use crate::models::Verse;

#[derive(sqlx::FromRow)]
struct VerseRow {
    id: i32,
    title: String,
    artist: String,
    category: String,
    image_url: Option<String>,
    price: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<VerseRow> for Verse {
    type Error = RepositoryError;

    fn try_from(row: VerseRow) -> Result<Self, Self::Error> {
        let price = Price::new(row.price).map_err(|e| {
            RepositoryError::DataCorruption(format!("verse {} has invalid price: {e}", row.id))
        })?;

        Ok(Self {
            id: VerseId::new(row.id),
            title: row.title,
            artist: row.artist,
            category: row.category,
            image_url: row.image_url,
            price,
            created_at: row.created_at,
        })
    }
}

/// A verse to add to the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVerse {
    pub title: String,
    pub artist: String,
    pub category: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub price: Price,
}

/// Repository for published catalog verses.
#[derive(Clone)]
pub struct VerseRepository {
    pool: PgPool,
}

impl VerseRepository {
    /// Create a new verse repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch up to `limit` published verses, newest first, skipping `offset`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored price is negative.
    #[instrument(skip(self))]
    pub async fn page(&self, offset: i64, limit: i64) -> Result<Vec<Verse>, RepositoryError> {
        let rows = sqlx::query_as::<_, VerseRow>(
            r"
            SELECT id, title, artist, category, image_url, price, created_at
            FROM versoes
            WHERE published
            ORDER BY created_at DESC, id DESC
            OFFSET $1
            LIMIT $2
            ",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Verse::try_from).collect()
    }

    /// Get a published verse by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, id: VerseId) -> Result<Option<Verse>, RepositoryError> {
        let row = sqlx::query_as::<_, VerseRow>(
            r"
            SELECT id, title, artist, category, image_url, price, created_at
            FROM versoes
            WHERE id = $1 AND published
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Verse::try_from).transpose()
    }

    /// Insert a published verse (used by seeding).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    #[instrument(skip(self, verse), fields(title = %verse.title))]
    pub async fn create(&self, verse: &NewVerse) -> Result<Verse, RepositoryError> {
        let row = sqlx::query_as::<_, VerseRow>(
            r"
            INSERT INTO versoes (title, artist, category, image_url, price, published)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            RETURNING id, title, artist, category, image_url, price, created_at
            ",
        )
        .bind(&verse.title)
        .bind(&verse.artist)
        .bind(&verse.category)
        .bind(verse.image_url.as_deref())
        .bind(verse.price.amount())
        .fetch_one(&self.pool)
        .await?;

        Verse::try_from(row)
    }
}
