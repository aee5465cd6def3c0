//! API error type and [`axum::response::IntoResponse`] implementation.

use arrels_governance::ErrorKind;
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

  #[error("internal error: {0}")]
  Internal(#[source] arrels_governance::Error),
}

impl From<arrels_governance::Error> for ApiError {
  fn from(e: arrels_governance::Error) -> Self {
    match e.kind() {
      ErrorKind::NotFound => ApiError::NotFound(e.to_string()),
      ErrorKind::Validation | ErrorKind::Conflict => ApiError::BadRequest(e.to_string()),
      _ => ApiError::Internal(e),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Internal(e) => {
        error!(error = %e, "api request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
