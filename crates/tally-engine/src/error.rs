//! Error types for `tally-engine`.

use std::path::PathBuf;

use tally_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Any failure reported by the storage backend. The backend is generic,
  /// so its error is boxed where it crosses the trait.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// Any failure reported by an external event feed.
  #[error("feed error: {0}")]
  Feed(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("i/o error at {path}: {source}")]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("settings error: {0}")]
  Settings(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("background task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error(transparent)]
  Core(#[from] tally_core::Error),
}

impl Error {
  /// Wrap a backend error. Rejected caller input becomes
  /// [`Error::InvalidArgument`].
  pub fn store<E: StoreError>(e: E) -> Self {
    if e.is_invalid_input() {
      Self::InvalidArgument(e.to_string())
    } else {
      Self::Store(Box::new(e))
    }
  }

  pub fn feed<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Feed(Box::new(e))
  }

  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io { path: path.into(), source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
