//! Error type for `arrels-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] arrels_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored discriminant column holds a value the domain enum rejects.
  #[error("unknown {kind} in column: {value:?}")]
  Discriminant { kind: &'static str, value: String },

  #[error("{kind} {id} not found")]
  NotFound { kind: &'static str, id: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
