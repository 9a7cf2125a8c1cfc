//! Handlers for the git and bus feeds.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tally_core::{
  git::{BusEvent, GitCommit},
  store::AnalyticsStore,
};
use tally_engine::{Analytics, BusFeed, BusReport, CorrelationReport};

use crate::{error::ApiError, params::ScopeParams};

#[derive(Debug, Serialize)]
pub struct CommitsAdded {
  pub received: usize,
  pub added:    usize,
}

/// `POST /git/commits` with a JSON array of commits; returns 201.
pub async fn record_commits<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Json(commits): Json<Vec<GitCommit>>,
) -> Result<(StatusCode, Json<CommitsAdded>), ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let received = commits.len();
  let added = analytics.ingest_commits(commits).await?;
  Ok((StatusCode::CREATED, Json(CommitsAdded { received, added })))
}

/// `POST /git/correlate[?days=...]`
pub async fn correlate<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
) -> Result<Json<CorrelationReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.correlate_commits(scope.window()?).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct BusParams {
  pub event_type: Option<String>,
}

/// `GET /bus/events[?event_type=...]`
pub async fn events<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<BusParams>,
) -> Result<Json<Vec<BusEvent>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let event_type = params.event_type.filter(|t| !t.is_empty());
  Ok(Json(analytics.bus_events(scope.scope()?, event_type).await?))
}

/// `POST /bus/ingest`
pub async fn ingest<S, B>(State(analytics): State<Arc<Analytics<S, B>>>) -> Result<Json<BusReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.ingest_bus().await?))
}
