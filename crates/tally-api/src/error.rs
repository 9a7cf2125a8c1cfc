//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("engine error: {0}")]
  Engine(#[source] tally_engine::Error),
}

impl From<tally_engine::Error> for ApiError {
  fn from(e: tally_engine::Error) -> Self {
    use tally_engine::Error as E;
    match e {
      E::InvalidArgument(m) => ApiError::BadRequest(m),
      E::Core(tally_core::Error::InvalidWindow { .. }) => ApiError::BadRequest(e.to_string()),
      E::Store(inner) => ApiError::Store(inner),
      other => ApiError::Engine(other),
    }
  }
}

impl From<tally_core::Error> for ApiError {
  fn from(e: tally_core::Error) -> Self { ApiError::BadRequest(e.to_string()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
      ApiError::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if status.is_server_error() {
      error!(error = %message, "request failed");
    }
    (status, Json(json!({ "error": message }))).into_response()
  }
}
