//! SQLite backend for the Arrels repositories.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod achievements;
mod cognoms;
mod encode;
mod entities;
mod points;
mod schema;
mod store;
mod transcripcions;
mod wiki;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
