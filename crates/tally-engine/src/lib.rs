//! Ingestion and query orchestration for tally.
//!
//! Finds agent log files, decides which changed since the last pass, parses
//! them in parallel and writes them through an
//! [`AnalyticsStore`](tally_core::store::AnalyticsStore). [`Analytics`] sits
//! on top and keeps reads fresh: any read issued after the staleness window
//! has elapsed runs an ingestion pass first.
//!
//! ```rust,ignore
//! let store = Arc::new(SqliteStore::open(path, ConnectionConfig::default()).await?);
//! let analytics = Analytics::new(store, AnalyticsConfig::default());
//! let tools = analytics.tool_frequency(Scope::new(TimeWindow::last_days(7)?)).await?;
//! ```

pub mod analytics;
pub mod discover;
pub mod error;
pub mod feeds;
pub mod pipeline;
pub mod settings;
pub mod tracker;

pub use analytics::{Analytics, AnalyticsConfig, Insights, SequenceReport, Status};
pub use discover::{LogFile, discover_logs};
pub use error::{Error, Result};
pub use feeds::{BusFeed, BusReport, CorrelationReport, NoBus, correlate_commits, ingest_bus, ingest_commits};
pub use pipeline::{IngestConfig, IngestOptions, IngestReport, Ingestor};
pub use settings::load_allow_list;
pub use tracker::FileTracker;
