//! JSON HTTP API for tally.
//!
//! Exposes an axum [`Router`] backed by an [`Analytics`] facade over any
//! [`AnalyticsStore`]. Every scoped `GET` accepts `days`, `hours`,
//! `since`/`until`, `project` and `limit`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(analytics.clone()))
//! ```

pub mod error;
pub mod feeds;
pub mod ingest;
pub mod params;
pub mod patterns;
pub mod search;
pub mod sessions;
pub mod usage;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use tally_core::store::AnalyticsStore;
use tally_engine::{Analytics, BusFeed};

pub use error::ApiError;

/// Build a fully-materialised API router over `analytics`.
pub fn api_router<S, B>(analytics: Arc<Analytics<S, B>>) -> Router<()>
where
  S: AnalyticsStore + 'static,
  B: BusFeed + 'static,
{
  Router::new()
    // Ingestion
    .route("/status", get(ingest::status::<S, B>))
    .route("/ingest", post(ingest::ingest::<S, B>))
    // Usage
    .route("/tools", get(usage::tools::<S, B>))
    .route("/commands", get(usage::commands::<S, B>))
    .route("/tokens", get(usage::tokens::<S, B>))
    // Derived patterns
    .route("/sequences", get(patterns::sequences::<S, B>))
    .route("/sequences/samples", get(patterns::samples::<S, B>))
    .route("/permissions/gaps", get(patterns::gaps::<S, B>))
    .route("/failures", get(patterns::failures::<S, B>))
    .route("/trends", get(patterns::trends::<S, B>))
    .route("/insights", get(patterns::insights::<S, B>))
    // Sessions
    .route("/sessions", get(sessions::list::<S, B>))
    .route("/sessions/classification", get(sessions::classification::<S, B>))
    .route("/sessions/commits", get(sessions::commits::<S, B>))
    .route("/sessions/{id}", get(sessions::get_one::<S, B>))
    .route("/compactions", get(sessions::compactions::<S, B>))
    .route("/results/large", get(sessions::large_results::<S, B>))
    // Search
    .route("/search", get(search::handler::<S, B>))
    // Feeds
    .route("/git/commits", post(feeds::record_commits::<S, B>))
    .route("/git/correlate", post(feeds::correlate::<S, B>))
    .route("/bus/events", get(feeds::events::<S, B>))
    .route("/bus/ingest", post(feeds::ingest::<S, B>))
    .with_state(analytics)
}
