//! Wiki routes of every wiki-edited kind: history, versions, comparison,
//! revert, marks and mark statistics.

use arrels_core::{
  EntityKind,
  store::Store,
  wiki::{ChangeId, DiffRow, FieldValue, ObjectType, PublicCount, VersionToken, WikiChange, WikiMark},
};
use axum::{
  Extension, Json,
  extract::{OriginalUri, Path, Query, State},
  response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use super::{canonical_id, canonical_redirect};
use crate::{
  AppState,
  auth::Viewer,
  base_path,
  csrf::Submission,
  error::{Error, Result},
};

fn object_type(kind: EntityKind) -> Result<ObjectType> {
  kind
    .object_type()
    .ok_or_else(|| Error::BadRequest(format!("{kind} is not edited through the wiki")))
}

pub(crate) fn token(raw: &str) -> Result<VersionToken> { Ok(raw.parse::<VersionToken>().map_err(arrels_governance::Error::from)?) }

#[derive(Debug, Deserialize, Default)]
pub struct HistoryParams {
  /// Show one version.
  pub view:  Option<String>,
  /// Compare two versions.
  pub left:  Option<String>,
  pub right: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HistoryView {
  Changes { changes: Vec<WikiChange>, published: Option<ChangeId> },
  Version { version: Vec<FieldValue> },
  Diff { diff: Vec<DiffRow> },
}

/// `GET /<object>/{id}/historial[?view=..|?left=..&right=..]`
///
/// Version tokens are a change id, or `current`.
pub async fn history<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  viewer: Viewer,
  Path(id): Path<i64>,
  OriginalUri(uri): OriginalUri,
  Query(params): Query<HistoryParams>,
) -> Result<Response> {
  if let Some(redirect) = canonical_redirect(&state.gov, kind, id, "/historial", &uri).await? {
    return Ok(redirect);
  }
  let ot = object_type(kind)?;
  let gov = &state.gov;
  let view = match (params.view, params.left, params.right) {
    (Some(v), _, _) => HistoryView::Version { version: gov.view_version(&viewer.ctx, ot, id, token(&v)?).await? },
    (None, left, right) if left.is_some() || right.is_some() => {
      let left = token(left.as_deref().unwrap_or("current"))?;
      let right = token(right.as_deref().unwrap_or("current"))?;
      HistoryView::Diff { diff: gov.compare(&viewer.ctx, ot, id, left, right).await? }
    }
    _ => HistoryView::Changes {
      changes:   gov.history(&viewer.ctx, ot, id).await?,
      published: gov.published_version(ot, id).await?,
    },
  };
  Ok(Json(view).into_response())
}

/// `POST /<object>/{id}/historial/revert` with `change_id` and `reason`.
pub async fn revert<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  Path(id): Path<i64>,
  sub: Submission,
) -> Result<Redirect> {
  let ot = object_type(kind)?;
  let source = sub.require_id("change_id")?;
  let change = state.gov.revert(&sub.auth.ctx, ot, id, source, sub.text("reason")).await?;
  Ok(Redirect::to(&format!("{}/{}/historial", base_path(kind), change.object_id)))
}

/// `POST /<object>/{id}/marca` with `tipus` and `public`.
pub async fn mark<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  Path(id): Path<i64>,
  sub: Submission,
) -> Result<Redirect> {
  let ot = object_type(kind)?;
  let tipus = sub.get("tipus").unwrap_or_default();
  let mark = state.gov.mark(&sub.auth.ctx, ot, id, tipus, sub.flag("public")).await?;
  Ok(Redirect::to(&format!("{}/{}", base_path(kind), mark.object_id)))
}

/// `POST /<object>/{id}/desmarca`
pub async fn unmark<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  Path(id): Path<i64>,
  sub: Submission,
) -> Result<Redirect> {
  let ot = object_type(kind)?;
  let id = canonical_id(&state.gov, kind, id).await?;
  state.gov.unmark(&sub.auth.ctx, ot, id).await?;
  Ok(Redirect::to(&format!("{}/{id}", base_path(kind))))
}

#[derive(Debug, Serialize)]
pub struct Stats {
  pub counts: Vec<PublicCount>,
  /// The caller's own mark, public or not.
  pub mine:   Option<WikiMark>,
}

/// `GET /<object>/{id}/estadistiques`
pub async fn stats<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  viewer: Viewer,
  Path(id): Path<i64>,
  OriginalUri(uri): OriginalUri,
) -> Result<Response> {
  if let Some(redirect) = canonical_redirect(&state.gov, kind, id, "/estadistiques", &uri).await? {
    return Ok(redirect);
  }
  let ot = object_type(kind)?;
  let counts = state.gov.public_counts(&viewer.ctx, ot, id).await?;
  let mine = match viewer.user {
    Some(_) => state.gov.user_mark(&viewer.ctx, ot, id).await?,
    None => None,
  };
  Ok(Json(Stats { counts, mine }).into_response())
}
