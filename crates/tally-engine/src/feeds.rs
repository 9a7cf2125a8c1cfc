//! Ingesting the external record feeds: git commits and bus events.

use std::convert::Infallible;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tally_core::{
  git::{BusEvent, CORRELATION_SLACK_MINUTES, GitCommit, correlate},
  store::AnalyticsStore,
  window::TimeWindow,
};
use tracing::info;

pub use tally_core::git::BusFeed;

use crate::{Error, Result};

/// A bus feed that never has events, for deployments without a bus.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBus;

impl BusFeed for NoBus {
  type Error = Infallible;

  async fn events_after(
    &self,
    _watermark: Option<i64>,
    _since: DateTime<Utc>,
  ) -> Result<Vec<BusEvent>, Infallible> {
    Ok(Vec::new())
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BusReport {
  pub events_pulled: usize,
  pub events_added:  usize,
  /// Highest stored id after the pull.
  pub watermark:     Option<i64>,
}

/// Pull bus events newer than the stored watermark. With no watermark yet,
/// pull the last `lookback`.
pub async fn ingest_bus<S, F>(store: &S, feed: &F, lookback: TimeDelta) -> Result<BusReport>
where
  S: AnalyticsStore,
  F: BusFeed,
{
  let watermark = store.bus_watermark().await.map_err(Error::store)?;
  let events = feed
    .events_after(watermark, Utc::now() - lookback)
    .await
    .map_err(Error::feed)?;
  let pulled = events.len();
  let high = events.iter().map(|e| e.id).max().max(watermark);
  let added = store.record_bus_events(events).await.map_err(Error::store)?;
  info!(pulled, added, "bus events ingested");
  Ok(BusReport { events_pulled: pulled, events_added: added, watermark: high })
}

/// Store commits not already known. Returns how many were new.
pub async fn ingest_commits<S: AnalyticsStore>(store: &S, commits: Vec<GitCommit>) -> Result<usize> {
  let received = commits.len();
  let added = store.record_commits(commits).await.map_err(Error::store)?;
  info!(received, added, "git commits ingested");
  Ok(added)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrelationReport {
  pub sessions:    usize,
  pub commits:     usize,
  pub links_found: usize,
  pub links_added: usize,
}

/// Link the commits in `window` to the sessions active around them.
pub async fn correlate_commits<S: AnalyticsStore>(store: &S, window: TimeWindow) -> Result<CorrelationReport> {
  let slack = TimeDelta::minutes(CORRELATION_SLACK_MINUTES);
  let padded = TimeWindow::new(window.start() - slack, window.end() + slack)?;
  let spans = store.session_spans(padded).await.map_err(Error::store)?;
  let commits = store.commits(padded).await.map_err(Error::store)?;

  let links = correlate(&spans, &commits);
  let found = links.len();
  let added = store.link_session_commits(links).await.map_err(Error::store)?;
  info!(sessions = spans.len(), commits = commits.len(), found, added, "commits correlated");
  Ok(CorrelationReport {
    sessions:    spans.len(),
    commits:     commits.len(),
    links_found: found,
    links_added: added,
  })
}
