//! Handlers for the derived analytics: sequences, permission gaps,
//! failures, trends and insights.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;
use tally_core::{
  failures::FailureReport,
  permissions::GapReport,
  sequence::SequenceSample,
  store::AnalyticsStore,
  trends::{Comparison, TrendReport},
};
use tally_engine::{
  Analytics, BusFeed, Insights, SequenceReport,
  analytics::{
    DEFAULT_GAP_MIN_COUNT, DEFAULT_SAMPLE_CONTEXT, DEFAULT_SAMPLE_COUNT, DEFAULT_SEQUENCE_LENGTH,
    DEFAULT_SEQUENCE_MIN_COUNT,
  },
};

use crate::{error::ApiError, params::ScopeParams};

/// Samples returned per request at most.
const MAX_SAMPLES: usize = 50;

// ─── Sequences ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct SequenceParams {
  pub length:    Option<usize>,
  pub min_count: Option<u64>,
}

/// `GET /sequences[?length=2][&min_count=3]`
pub async fn sequences<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<SequenceParams>,
) -> Result<Json<SequenceReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let report = analytics
    .sequences(
      scope.scope()?,
      params.length.unwrap_or(DEFAULT_SEQUENCE_LENGTH),
      params.min_count.unwrap_or(DEFAULT_SEQUENCE_MIN_COUNT),
    )
    .await?;
  Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct SampleParams {
  /// Tool names joined by `→` or `,`, e.g. `Read,Edit`.
  pub pattern: String,
  pub count:   Option<usize>,
  pub context: Option<usize>,
}

/// `GET /sequences/samples?pattern=Read,Edit[&count=5][&context=2]`
pub async fn samples<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<SampleParams>,
) -> Result<Json<Vec<SequenceSample>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let count = params.count.unwrap_or(DEFAULT_SAMPLE_COUNT).clamp(1, MAX_SAMPLES);
  let context = params.context.unwrap_or(DEFAULT_SAMPLE_CONTEXT);
  let samples = analytics
    .sample_sequences(scope.scope()?, &params.pattern, count, context)
    .await?;
  Ok(Json(samples))
}

// ─── Permissions and failures ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct GapParams {
  pub min_count: Option<u64>,
}

/// `GET /permissions/gaps[?min_count=5]`
pub async fn gaps<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<GapParams>,
) -> Result<Json<GapReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let min_count = params.min_count.unwrap_or(DEFAULT_GAP_MIN_COUNT);
  Ok(Json(analytics.permission_gaps(scope.scope()?, min_count).await?))
}

/// `GET /failures`
pub async fn failures<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
) -> Result<Json<FailureReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.failures(scope.scope()?).await?))
}

// ─── Trends and insights ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TrendParams {
  /// `previous` (default) or `same_last_month`.
  #[serde(default)]
  pub compare: Comparison,
}

/// `GET /trends[?compare=previous|same_last_month]`
pub async fn trends<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<TrendParams>,
) -> Result<Json<TrendReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let report = analytics
    .trends(scope.window()?, scope.project(), params.compare)
    .await?;
  Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct InsightParams {
  /// Recompute the pattern cache first.
  #[serde(default)]
  pub refresh: bool,
}

/// `GET /insights[?refresh=true]`
pub async fn insights<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<InsightParams>,
) -> Result<Json<Insights>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.insights(scope.scope()?, params.refresh).await?))
}
