//! Error types for `arrels-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed user input: missing field, out-of-range value, bad format.
  #[error("validation error: {0}")]
  Validation(String),

  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },

  #[error("invalid policy document: {0}")]
  InvalidPolicy(String),

  #[error("invalid achievement rule: {0}")]
  InvalidRule(String),

  #[error("invalid snapshot: {0}")]
  InvalidSnapshot(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
