//! Handlers for `/tools`, `/commands` and `/tokens`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;
use tally_core::{
  report::{CommandFrequency, TokenGrouping, TokenUsageRow, ToolFrequency},
  store::AnalyticsStore,
};
use tally_engine::{Analytics, BusFeed};

use crate::{error::ApiError, params::ScopeParams};

/// `GET /tools`
pub async fn tools<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
) -> Result<Json<Vec<ToolFrequency>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.tool_frequency(scope.scope()?).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandParams {
  /// Only commands starting with this.
  pub prefix: Option<String>,
}

/// `GET /commands[?prefix=...]`
pub async fn commands<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<CommandParams>,
) -> Result<Json<Vec<CommandFrequency>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.command_breakdown(scope.scope()?, params.prefix).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
  /// `day` (default), `session` or `model`.
  #[serde(default)]
  pub by: TokenGrouping,
}

/// `GET /tokens[?by=day|session|model]`
pub async fn tokens<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(scope): Query<ScopeParams>,
  Query(params): Query<TokenParams>,
) -> Result<Json<Vec<TokenUsageRow>>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.token_usage(scope.scope()?, params.by).await?))
}
