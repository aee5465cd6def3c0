//! Error types for `arrels-governance`.

use std::fmt;

use thiserror::Error;

/// The four guardrails checked before a wiki proposal or mark is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guardrail {
  MetadataTooLarge,
  PendingObjectLimit,
  PendingUserLimit,
  RateLimited,
}

impl Guardrail {
  /// Localisation key of the user-facing message.
  pub fn message_key(self) -> &'static str {
    match self {
      Self::MetadataTooLarge => "wiki.guardrail.size",
      Self::PendingObjectLimit => "wiki.guardrail.object",
      Self::PendingUserLimit => "wiki.guardrail.user",
      Self::RateLimited => "wiki.guardrail.rate",
    }
  }
}

impl fmt::Display for Guardrail {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::MetadataTooLarge => "change metadata too large",
      Self::PendingObjectLimit => "too many pending changes on this object",
      Self::PendingUserLimit => "too many pending changes by this user on this object",
      Self::RateLimited => "too many requests",
    };
    f.write_str(s)
  }
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Validation,
  Denied,
  NotFound,
  Guardrail,
  Conflict,
  Cancelled,
  Infrastructure,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(String),

  /// The policy evaluator refused the permission key.
  #[error("permission denied: {0}")]
  Denied(String),

  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: i64 },

  #[error("{0}")]
  Guardrail(Guardrail),

  /// Duplicate key or redirect cycle.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("request cancelled")]
  Cancelled,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }

  pub fn conflict(msg: impl Into<String>) -> Self { Self::Conflict(msg.into()) }

  pub fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self { Self::Store(Box::new(e)) }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::Denied(_) => ErrorKind::Denied,
      Self::NotFound { .. } => ErrorKind::NotFound,
      Self::Guardrail(_) => ErrorKind::Guardrail,
      Self::Conflict(_) => ErrorKind::Conflict,
      Self::Cancelled => ErrorKind::Cancelled,
      Self::Store(_) => ErrorKind::Infrastructure,
    }
  }

  /// Localisation key for the user-facing message.
  pub fn message_key(&self) -> &'static str {
    match self {
      Self::Validation(_) => "error.validation",
      Self::Denied(_) => "error.forbidden",
      Self::NotFound { .. } => "error.not_found",
      Self::Guardrail(g) => g.message_key(),
      Self::Conflict(_) => "error.conflict",
      Self::Cancelled => "error.cancelled",
      Self::Store(_) => "error.internal",
    }
  }
}

impl From<arrels_core::Error> for Error {
  fn from(e: arrels_core::Error) -> Self {
    match e {
      arrels_core::Error::Serialization(e) => Self::store(e),
      other => Self::Validation(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
