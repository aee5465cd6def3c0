//! Core types and repository traits for the Arrels contribution engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends implement the traits in [`store`]; the governance engines
//! and the web layer depend on those traits, never on a concrete backend.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod achievement;
pub mod activity;
pub mod cognom;
pub mod documental;
pub mod error;
pub mod event;
pub mod fields;
pub mod moderation;
pub mod persona;
pub mod policy;
pub mod store;
pub mod territory;
pub mod transcripcio;
pub mod user;
pub mod wiki;

pub use error::{Error, Result};
pub use fields::{Entity, EntityFields, EntityKind, FieldKind, FieldSpec, Snapshot, StoredEntity};
pub use moderation::{Moderation, ModerationState};
pub use user::UserId;
