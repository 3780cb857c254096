//! Catalog route handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use versos_core::VerseId;

use crate::catalog::{self, CatalogQuery, CatalogSort};
use crate::error::{AppError, Result};
use crate::models::Verse;
use crate::state::AppState;

/// Query string for the verse listing.
#[derive(Debug, Default, Deserialize)]
pub struct VerseListParams {
    /// Zero-based page; every page up to and including it is returned.
    pub page: Option<u32>,
    pub q: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub sort: CatalogSort,
}

/// Verses loaded so far, filtered and sorted.
#[derive(Debug, Serialize)]
pub struct VerseListView {
    pub page: u32,
    pub has_more: bool,
    pub verses: Vec<Verse>,
}

/// List verses with infinite-scroll pagination.
#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    Query(params): Query<VerseListParams>,
) -> Result<Json<VerseListView>> {
    let page = params.page.unwrap_or(0);
    let loaded = state.catalog().load_through(page).await?;

    let query = CatalogQuery {
        q: params.q,
        category: params.category,
        sort: params.sort,
    };

    Ok(Json(VerseListView {
        page: loaded.page,
        has_more: loaded.has_more,
        verses: catalog::apply(&query, &loaded.verses),
    }))
}

/// Show one verse.
#[instrument(skip(state))]
pub async fn show(State(state): State<AppState>, Path(id): Path<i32>) -> Result<Json<Verse>> {
    state
        .catalog()
        .get(VerseId::new(id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("verse {id}")))
}
