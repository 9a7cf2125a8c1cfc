//! Handlers for `/status` and `POST /ingest`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::Deserialize;
use tally_core::store::AnalyticsStore;
use tally_engine::{Analytics, BusFeed, IngestOptions, IngestReport, Status};

use crate::error::ApiError;

/// `GET /status`
///
/// Never triggers ingestion.
pub async fn status<S, B>(State(analytics): State<Arc<Analytics<S, B>>>) -> Result<Json<Status>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Ok(Json(analytics.status().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct IngestParams {
  /// Lookback in days; zero scans every file.
  pub days:    Option<i64>,
  pub project: Option<String>,
  /// Re-parse files the ledger says are unchanged.
  #[serde(default)]
  pub force:   bool,
}

/// `POST /ingest[?days=...][&project=...][&force=true]`
pub async fn ingest<S, B>(
  State(analytics): State<Arc<Analytics<S, B>>>,
  Query(params): Query<IngestParams>,
) -> Result<Json<IngestReport>, ApiError>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  let options = IngestOptions {
    days:    params.days,
    project: params.project.filter(|p| !p.trim().is_empty()),
    force:   params.force,
  };
  Ok(Json(analytics.ingest(options).await?))
}
