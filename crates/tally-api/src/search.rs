//! Handler for `GET /search`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;
use tally_core::{
  event::EntryKind,
  report::{SearchHit, SearchQuery},
  store::AnalyticsStore,
};
use tally_engine::{Analytics, BusFeed};

use crate::{error::ApiError, params::ScopeParams};

#[derive(Debug, Deserialize)]
pub struct SearchParams {
  /// Full-text query: terms, `"phrases"`, `AND`/`OR`/`NOT`, `prefix*`.
  pub q:    String,
  /// Restrict to one entry kind, e.g. `tool_result`.
  pub kind: Option<EntryKind>,
}

/// `GET /search?q=...[&kind=...]`
///
/// A query the index cannot parse is a 400, not a 500.
pub async fn handler<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let scope = scope.scope()?;
  let query = SearchQuery {
    text:    params.q,
    window:  scope.window,
    kind:    params.kind,
    project: scope.project,
    limit:   scope.limit,
  };
  Ok(Json(analytics.search_messages(query).await?))
}
