//! The moderation queue and its transitions.

use std::collections::BTreeMap;

use arrels_core::{
  EntityKind, StoredEntity,
  store::Store,
  wiki::{ChangeId, WikiChange},
};
use axum::{
  Json,
  extract::{Path, Query, State},
  response::Redirect,
};
use serde::Serialize;

use super::Page;
use crate::{
  AppState, ENTITY_ROUTES,
  auth::AuthUser,
  csrf::Submission,
  error::{Error, Result},
};

#[derive(Debug, Serialize)]
pub struct Queue {
  pub wiki:     Vec<WikiChange>,
  /// Pending rows per kind, kinds with nothing pending left out.
  pub entitats: BTreeMap<String, Vec<StoredEntity>>,
}

/// `GET /moderacio[?page=..][&per_page=..]`
pub async fn queue<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
  Query(page): Query<Page>,
) -> Result<Json<Queue>> {
  let (limit, offset) = page.window();
  let wiki = state.gov.moderation_queue(&auth.ctx, limit, offset).await?;
  let mut entitats = BTreeMap::new();
  for (kind, _) in ENTITY_ROUTES {
    let pending = state.gov.moderation_list(&auth.ctx, *kind).await?;
    if !pending.is_empty() {
      entitats.insert(kind.to_string(), pending);
    }
  }
  Ok(Json(Queue { wiki, entitats }))
}

fn kind(raw: &str) -> Result<EntityKind> {
  raw.parse().map_err(|_| Error::BadRequest(format!("unknown entity kind {raw:?}")))
}

/// `POST /moderacio/{kind}/{id}/aprovar`
pub async fn approve<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path((raw, id)): Path<(String, i64)>,
  sub: Submission,
) -> Result<Redirect> {
  state.gov.approve_entity(&sub.auth.ctx, kind(&raw)?, id).await?;
  Ok(Redirect::to("/moderacio"))
}

/// `POST /moderacio/{kind}/{id}/rebutjar` with an optional `motiu`.
pub async fn reject<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path((raw, id)): Path<(String, i64)>,
  sub: Submission,
) -> Result<Redirect> {
  state.gov.reject_entity(&sub.auth.ctx, kind(&raw)?, id, sub.text("motiu")).await?;
  Ok(Redirect::to("/moderacio"))
}

/// `POST /moderacio/wiki/{id}/aprovar`
pub async fn approve_change<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<ChangeId>,
  sub: Submission,
) -> Result<Redirect> {
  state.gov.approve_change(&sub.auth.ctx, id).await?;
  Ok(Redirect::to("/moderacio"))
}

/// `POST /moderacio/wiki/{id}/rebutjar`
pub async fn reject_change<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<ChangeId>,
  sub: Submission,
) -> Result<Redirect> {
  state.gov.reject_change(&sub.auth.ctx, id).await?;
  Ok(Redirect::to("/moderacio"))
}
