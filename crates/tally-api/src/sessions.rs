//! Handlers for `/sessions` endpoints and the per-session views.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/sessions` | Sessions active in the window, newest first |
//! | `GET`  | `/sessions/{id}` | One session rollup |
//! | `GET`  | `/sessions/classification` | `?min_tool_calls` (default 5) |
//! | `GET`  | `/sessions/commits` | Optional `session_id` |
//! | `GET`  | `/compactions` | Optional `session_id` |
//! | `GET`  | `/results/large` | Optional `min_bytes` (default 10 KiB) |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use tally_core::{
  classify::{ClassificationReport, DEFAULT_MIN_TOOL_CALLS},
  git::CommitView,
  report::{CompactionRow, LargeResult},
  session::Session,
  store::AnalyticsStore,
};
use tally_engine::{Analytics, BusFeed};

use crate::{error::ApiError, params::ScopeParams};

/// `GET /sessions`
pub async fn list<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
) -> Result<Json<Vec<Session>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.sessions(scope.scope()?).await?))
}

/// `GET /sessions/{id}`
pub async fn get_one<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Path(id): Path<String>,
) -> Result<Json<Session>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  analytics
    .session(id.clone())
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("session {id}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct ClassifyParams {
  pub min_tool_calls: Option<i64>,
}

/// `GET /sessions/classification[?min_tool_calls=5]`
pub async fn classification<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<ClassifyParams>,
) -> Result<Json<ClassificationReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let min = params.min_tool_calls.unwrap_or(DEFAULT_MIN_TOOL_CALLS);
  Ok(Json(analytics.classify_sessions(scope.scope()?, min).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionFilter {
  pub session_id: Option<String>,
}

/// `GET /sessions/commits[?session_id=...]`
pub async fn commits<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<CommitView>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.session_commits(scope.scope()?, filter.session_id).await?))
}

/// `GET /compactions[?session_id=...]`
pub async fn compactions<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<CompactionRow>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.compactions(scope.scope()?, filter.session_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct LargeResultParams {
  pub min_bytes: Option<i64>,
}

/// `GET /results/large[?min_bytes=10240]`
pub async fn large_results<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<LargeResultParams>,
) -> Result<Json<Vec<LargeResult>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.large_results(scope.scope()?, params.min_bytes).await?))
}
