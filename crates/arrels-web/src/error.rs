//! Error types and axum `IntoResponse` implementation.
//!
//! Every failure renders as JSON `{"error": <message key>, "message": <text>}`
//! with the status its kind maps to.

use arrels_governance::{ErrorKind, Guardrail};
use axum::{
  Json,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum Error {
  #[error("unauthorized")]
  Unauthorized,

  #[error("missing or invalid CSRF token")]
  Csrf,

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Governance(#[from] arrels_governance::Error),

  #[error("internal error: {0}")]
  Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::Unauthorized => StatusCode::UNAUTHORIZED,
      Error::Csrf | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
      Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
      Error::Governance(e) => match e {
        arrels_governance::Error::Guardrail(Guardrail::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        _ => match e.kind() {
          ErrorKind::Validation | ErrorKind::Conflict | ErrorKind::Guardrail => StatusCode::BAD_REQUEST,
          ErrorKind::Denied => StatusCode::FORBIDDEN,
          ErrorKind::NotFound => StatusCode::NOT_FOUND,
          ErrorKind::Cancelled | ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        },
      },
    }
  }

  pub fn message_key(&self) -> &'static str {
    match self {
      Error::Unauthorized => "error.unauthorized",
      Error::Csrf => "error.csrf",
      Error::BadRequest(_) => "error.validation",
      Error::Internal(_) => "error.internal",
      Error::Governance(e) => e.message_key(),
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    } else {
      debug!(error = %self, %status, "request refused");
    }
    let body = json!({ "error": self.message_key(), "message": self.to_string() });
    let mut res = (status, Json(body)).into_response();
    if matches!(self, Error::Unauthorized) {
      res
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"arrels\""));
    }
    res
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn guardrails_split_between_400_and_429() {
    let rate = Error::from(arrels_governance::Error::Guardrail(Guardrail::RateLimited));
    assert_eq!(rate.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rate.message_key(), "wiki.guardrail.rate");
    let size = Error::from(arrels_governance::Error::Guardrail(Guardrail::MetadataTooLarge));
    assert_eq!(size.status(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn governance_kinds_map_to_statuses() {
    let denied = Error::from(arrels_governance::Error::Denied("admin.politiques".into()));
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let missing = Error::from(arrels_governance::Error::NotFound { kind: "persona", id: 3 });
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let conflict = Error::from(arrels_governance::Error::conflict("cycle"));
    assert_eq!(conflict.status(), StatusCode::BAD_REQUEST);
    let cancelled = Error::from(arrels_governance::Error::Cancelled);
    assert_eq!(cancelled.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
