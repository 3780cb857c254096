//! Verse catalog with paginated loading and an in-memory page cache.
//!
//! Pages are fetched from the `versoes` table newest first and cached with
//! `moka` for a configurable TTL (5 minutes by default). Filtering and sorting
//! happen over whatever has been loaded so far, which is how the infinite
//! scroll listing works: `load_through(n)` returns pages `0..=n` and
//! [`apply`] narrows them down.

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use versos_core::VerseId;

use crate::config::CatalogConfig;
use crate::db::{RepositoryError, VerseRepository};
use crate::models::Verse;

// =============================================================================
// Source
// =============================================================================

/// Where catalog records come from.
pub trait VerseSource: Send + Sync + 'static {
    /// Fetch up to `limit` verses, newest first, after skipping `offset`.
    fn fetch_page(
        &self,
        offset: i64,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Verse>, RepositoryError>> + Send;

    /// Fetch a single verse.
    fn fetch_one(
        &self,
        id: VerseId,
    ) -> impl Future<Output = Result<Option<Verse>, RepositoryError>> + Send;
}

impl VerseSource for VerseRepository {
    async fn fetch_page(&self, offset: i64, limit: i64) -> Result<Vec<Verse>, RepositoryError> {
        self.page(offset, limit).await
    }

    async fn fetch_one(&self, id: VerseId) -> Result<Option<Verse>, RepositoryError> {
        self.get(id).await
    }
}

// =============================================================================
// Query
// =============================================================================

/// Sort order for the listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Title,
}

/// Filter and sort options from the listing's query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogQuery {
    /// Free text matched against title and artist.
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sort: CatalogSort,
}

/// Filter and sort loaded verses.
///
/// Text matching is case-insensitive over title and artist. Category matching
/// is case-insensitive and exact. Blank filters are ignored.
#[must_use]
pub fn apply(query: &CatalogQuery, verses: &[Verse]) -> Vec<Verse> {
    let needle = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut matches: Vec<Verse> = verses
        .iter()
        .filter(|v| {
            needle.as_deref().is_none_or(|n| {
                v.title.to_lowercase().contains(n) || v.artist.to_lowercase().contains(n)
            })
        })
        .filter(|v| category.is_none_or(|c| v.category.eq_ignore_ascii_case(c)))
        .cloned()
        .collect();

    matches.sort_by(|a, b| compare(query.sort, a, b));
    matches
}

fn compare(sort: CatalogSort, a: &Verse, b: &Verse) -> Ordering {
    match sort {
        CatalogSort::Newest => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
        CatalogSort::PriceAsc => a.price.cmp(&b.price).then(a.id.cmp(&b.id)),
        CatalogSort::PriceDesc => b.price.cmp(&a.price).then(a.id.cmp(&b.id)),
        CatalogSort::Title => a
            .title
            .to_lowercase()
            .cmp(&b.title.to_lowercase())
            .then(a.id.cmp(&b.id)),
    }
}

// =============================================================================
// Store
// =============================================================================

/// One page of the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub page: u32,
    pub verses: Vec<Verse>,
    pub has_more: bool,
}

/// Cached, paginated access to the verse catalog.
pub struct CatalogStore<S = VerseRepository> {
    inner: Arc<CatalogStoreInner<S>>,
}

impl<S> Clone for CatalogStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CatalogStoreInner<S> {
    source: S,
    page_size: u32,
    pages: Cache<u32, CatalogPage>,
    verses: Cache<VerseId, Verse>,
}

impl<S: VerseSource> CatalogStore<S> {
    /// Create a catalog store over `source`.
    #[must_use]
    pub fn new(source: S, config: &CatalogConfig) -> Self {
        let pages = Cache::builder()
            .max_capacity(256)
            .time_to_live(config.cache_ttl)
            .build();
        let verses = Cache::builder()
            .max_capacity(2048)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            inner: Arc::new(CatalogStoreInner {
                source,
                page_size: config.page_size.max(1),
                pages,
                verses,
            }),
        }
    }

    /// Number of verses per page.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.inner.page_size
    }

    /// Load one page (zero-based).
    ///
    /// One extra row is fetched to decide `has_more`.
    ///
    /// # Errors
    ///
    /// Returns the repository error when the page is not cached and the
    /// query fails.
    #[instrument(skip(self))]
    pub async fn load_page(&self, page: u32) -> Result<CatalogPage, RepositoryError> {
        if let Some(cached) = self.inner.pages.get(&page).await {
            debug!("Cache hit for catalog page");
            return Ok(cached);
        }

        let size = i64::from(self.inner.page_size);
        let offset = i64::from(page) * size;
        let mut verses = self.inner.source.fetch_page(offset, size + 1).await?;

        let has_more = verses.len() > self.inner.page_size as usize;
        verses.truncate(self.inner.page_size as usize);

        for verse in &verses {
            self.inner.verses.insert(verse.id, verse.clone()).await;
        }

        let loaded = CatalogPage {
            page,
            verses,
            has_more,
        };
        self.inner.pages.insert(page, loaded.clone()).await;

        Ok(loaded)
    }

    /// Load pages `0..=page` and concatenate them.
    ///
    /// Stops early when a page reports no further rows.
    ///
    /// # Errors
    ///
    /// Returns the first repository error encountered.
    pub async fn load_through(&self, page: u32) -> Result<CatalogPage, RepositoryError> {
        let mut verses = Vec::new();
        let mut has_more = false;

        for current in 0..=page {
            let loaded = self.load_page(current).await?;
            verses.extend(loaded.verses);
            has_more = loaded.has_more;
            if !has_more {
                break;
            }
        }

        Ok(CatalogPage {
            page,
            verses,
            has_more,
        })
    }

    /// Look up a single verse.
    ///
    /// # Errors
    ///
    /// Returns the repository error when the verse is not cached and the
    /// query fails.
    #[instrument(skip(self), fields(verse_id = %id))]
    pub async fn get(&self, id: VerseId) -> Result<Option<Verse>, RepositoryError> {
        if let Some(cached) = self.inner.verses.get(&id).await {
            return Ok(Some(cached));
        }

        let verse = self.inner.source.fetch_one(id).await?;
        if let Some(verse) = &verse {
            self.inner.verses.insert(id, verse.clone()).await;
        }
        Ok(verse)
    }

    /// Drop every cached page and verse.
    pub fn invalidate_all(&self) {
        self.inner.pages.invalidate_all();
        self.inner.verses.invalidate_all();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use versos_core::Price;

    use super::*;

    fn verse(id: i32, title: &str, artist: &str, category: &str, cents: u32) -> Verse {
        Verse {
            id: VerseId::new(id),
            title: title.to_string(),
            artist: artist.to_string(),
            category: category.to_string(),
            image_url: None,
            price: Price::from_cents(cents),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::days(i64::from(id)),
        }
    }

    struct FakeSource {
        verses: Vec<Verse>,
        page_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with(count: i32) -> Self {
            let mut verses: Vec<Verse> = (1..=count)
                .map(|i| verse(i, &format!("Verso {i}"), "Artista", "hinos", 1000))
                .collect();
            verses.reverse();
            Self {
                verses,
                page_calls: AtomicUsize::new(0),
            }
        }
    }

    impl VerseSource for FakeSource {
        async fn fetch_page(&self, offset: i64, limit: i64) -> Result<Vec<Verse>, RepositoryError> {
            self.page_calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self
                .verses
                .iter()
                .skip(usize::try_from(offset).unwrap())
                .take(usize::try_from(limit).unwrap())
                .cloned()
                .collect())
        }

        async fn fetch_one(&self, id: VerseId) -> Result<Option<Verse>, RepositoryError> {
            Ok(self.verses.iter().find(|v| v.id == id).cloned())
        }
    }

    fn store(count: i32, page_size: u32) -> CatalogStore<FakeSource> {
        CatalogStore::new(
            FakeSource::with(count),
            &CatalogConfig {
                page_size,
                cache_ttl: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn test_load_page_reports_has_more() {
        let catalog = store(5, 2);

        let first = catalog.load_page(0).await.unwrap();
        assert_eq!(first.verses.len(), 2);
        assert!(first.has_more);

        let last = catalog.load_page(2).await.unwrap();
        assert_eq!(last.verses.len(), 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_load_page_is_cached() {
        let catalog = store(5, 2);

        catalog.load_page(0).await.unwrap();
        catalog.load_page(0).await.unwrap();
        assert_eq!(
            catalog.inner.source.page_calls.load(AtomicOrdering::SeqCst),
            1
        );

        catalog.invalidate_all();
        catalog.load_page(0).await.unwrap();
        assert_eq!(
            catalog.inner.source.page_calls.load(AtomicOrdering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn test_load_through_concatenates_pages() {
        let catalog = store(5, 2);

        let loaded = catalog.load_through(1).await.unwrap();
        let ids: Vec<i32> = loaded.verses.iter().map(|v| v.id.as_i32()).collect();
        assert_eq!(ids, vec![5, 4, 3, 2]);
        assert!(loaded.has_more);

        let everything = catalog.load_through(10).await.unwrap();
        assert_eq!(everything.verses.len(), 5);
        assert!(!everything.has_more);
    }

    #[tokio::test]
    async fn test_get_uses_source_when_not_cached() {
        let catalog = store(3, 2);
        let found = catalog.get(VerseId::new(2)).await.unwrap();
        assert_eq!(found.unwrap().title, "Verso 2");
        assert!(catalog.get(VerseId::new(99)).await.unwrap().is_none());
    }

    #[test]
    fn test_apply_text_filter_matches_title_and_artist() {
        let verses = vec![
            verse(1, "Amazing Grace", "John Newton", "hinos", 1500),
            verse(2, "Hallelujah", "Leonard Cohen", "pop", 1200),
            verse(3, "Imagine", "John Lennon", "pop", 900),
        ];

        let query = CatalogQuery {
            q: Some("  JOHN ".to_string()),
            ..CatalogQuery::default()
        };
        let ids: Vec<i32> = apply(&query, &verses).iter().map(|v| v.id.as_i32()).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_apply_category_and_price_sort() {
        let verses = vec![
            verse(1, "Amazing Grace", "John Newton", "hinos", 1500),
            verse(2, "Hallelujah", "Leonard Cohen", "pop", 1200),
            verse(3, "Imagine", "John Lennon", "Pop", 900),
        ];

        let query = CatalogQuery {
            category: Some("pop".to_string()),
            sort: CatalogSort::PriceAsc,
            ..CatalogQuery::default()
        };
        let ids: Vec<i32> = apply(&query, &verses).iter().map(|v| v.id.as_i32()).collect();
        assert_eq!(ids, vec![3, 2]);

        let query = CatalogQuery {
            sort: CatalogSort::PriceDesc,
            ..CatalogQuery::default()
        };
        let ids: Vec<i32> = apply(&query, &verses).iter().map(|v| v.id.as_i32()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_apply_title_sort_ignores_case() {
        let verses = vec![
            verse(1, "imagine", "John Lennon", "pop", 900),
            verse(2, "Hallelujah", "Leonard Cohen", "pop", 1200),
        ];
        let query = CatalogQuery {
            sort: CatalogSort::Title,
            ..CatalogQuery::default()
        };
        let ids: Vec<i32> = apply(&query, &verses).iter().map(|v| v.id.as_i32()).collect();
        assert_eq!(ids, vec![2, 1]);
    }
}
