//! Error type for `tally-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tally_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("migration v{version} failed: {message}")]
  Migration { version: i64, message: String },

  /// The full-text query could not be parsed.
  #[error("invalid search query: {0}")]
  InvalidSearch(String),

  #[error("cannot decode stored value: {0}")]
  Decode(String),
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(e.into()) }
}

impl tally_core::store::StoreError for Error {
  fn is_invalid_input(&self) -> bool { matches!(self, Self::InvalidSearch(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
