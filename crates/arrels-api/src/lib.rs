//! JSON endpoints for Arrels.
//!
//! Exposes an axum [`Router`] over a shared [`Governance`] engine. The
//! endpoints are read-only and public; auth and CSRF belong to the caller.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest_service("/api", arrels_api::api_router(gov.clone()))
//! ```

pub mod cognoms;
pub mod error;

use std::sync::Arc;

use arrels_core::store::Store;
use arrels_governance::Governance;
use axum::{Router, routing::get};

pub use error::ApiError;

/// Build the API router for `gov`.
///
/// The returned `Router<()>` is a service; mount it with `nest_service` into
/// a router of any state type.
pub fn api_router<S>(gov: Arc<Governance<S>>) -> Router<()>
where
  S: Store + 'static,
{
  Router::new()
    .route("/cognoms/search", get(cognoms::search::<S>))
    .route("/cognoms/{id}/heatmap", get(cognoms::heatmap::<S>))
    .with_state(gov)
}
