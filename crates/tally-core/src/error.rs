//! Error types for `tally-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid time window: start {start} is not before end {end}")]
  InvalidWindow {
    start: DateTime<Utc>,
    end:   DateTime<Utc>,
  },

  #[error("unknown entry kind: {0:?}")]
  UnknownEntryKind(String),

  #[error("unknown pattern kind: {0:?}")]
  UnknownPatternKind(String),

  #[error("malformed settings document: {0}")]
  Settings(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
