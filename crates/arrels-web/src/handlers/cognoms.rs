//! Surname merges and variants.

use arrels_core::{
  cognom::{CognomHit, CognomId, CognomRedirect, CognomRedirectSuggestion, SuggestionState},
  store::Store,
};
use arrels_governance::cognoms::parse_alias_list;
use axum::{
  Json,
  extract::{Path, Query, State},
  response::Redirect,
};
use serde::{Deserialize, Serialize};

use crate::{
  AppState,
  auth::{AuthUser, Viewer},
  csrf::Submission,
  error::{Error, Result},
};

const SEARCH_LIMIT: usize = 20;

#[derive(Debug, Deserialize, Default)]
pub struct MergeParams {
  pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MergeForm {
  pub hits: Vec<CognomHit>,
}

/// `GET /cognoms/merge[?q=..]`: candidates for a merge suggestion.
pub async fn merge_form<S: Store + 'static>(
  State(state): State<AppState<S>>,
  _viewer: Viewer,
  Query(params): Query<MergeParams>,
) -> Result<Json<MergeForm>> {
  let hits = state.gov.search_surnames(params.q.as_deref().unwrap_or_default(), SEARCH_LIMIT).await?;
  Ok(Json(MergeForm { hits }))
}

/// `POST /cognoms/merge` with `canonical_id`, a free-form `aliases` list and
/// an optional `reason`.
pub async fn suggest<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let to = sub.require_id("canonical_id")?;
  let aliases = parse_alias_list(sub.get("aliases").unwrap_or_default());
  if aliases.is_empty() {
    return Err(Error::BadRequest("aliases is required".into()));
  }
  let created = state.gov.suggest_merge(&sub.auth.ctx, to, &aliases, sub.text("reason")).await?;
  Ok(Redirect::to(&format!("/cognoms/merge?suggerits={created}")))
}

/// `POST /cognoms/{id}/variants` with `variant`.
pub async fn add_variant<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<CognomId>,
  sub: Submission,
) -> Result<Redirect> {
  let id = state.gov.resolve_canonical(id).await?.canonical;
  state.gov.add_variant(&sub.auth.ctx, id, sub.get("variant").unwrap_or_default()).await?;
  Ok(Redirect::to(&format!("/cognoms/{id}")))
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminParams {
  pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminMerges {
  pub suggestions: Vec<CognomRedirectSuggestion>,
  pub redirects:   Vec<CognomRedirect>,
}

/// `GET /admin/cognoms/merge[?state=pendent|acceptat|rebutjat]`
pub async fn admin_list<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
  Query(params): Query<AdminParams>,
) -> Result<Json<AdminMerges>> {
  let filter = match params.state.as_deref().map(str::trim) {
    None | Some("") => None,
    Some(raw) => Some(
      raw
        .parse::<SuggestionState>()
        .map_err(|_| Error::BadRequest(format!("unknown suggestion state {raw:?}")))?,
    ),
  };
  let suggestions = state.gov.list_merge_suggestions(&auth.ctx, filter).await?;
  let redirects = state.gov.list_redirects(&auth.ctx).await?;
  Ok(Json(AdminMerges { suggestions, redirects }))
}

/// `POST /admin/cognoms/merge`: accept (`suggestion_id`) or reject
/// (`suggestion_id` with `accio=rebutjar`) a suggestion, or merge directly
/// (`alias_id`, `canonical_id`, optional `reason`).
pub async fn admin_merge<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let ctx = &sub.auth.ctx;
  match sub.id("suggestion_id")? {
    Some(id) if sub.get("accio") == Some("rebutjar") => state.gov.reject_suggestion(ctx, id).await?,
    Some(id) => {
      state.gov.accept_suggestion(ctx, id).await?;
    }
    None => {
      let alias = sub.require_id("alias_id")?;
      let canonical = sub.require_id("canonical_id")?;
      state.gov.materialize_merge(ctx, alias, canonical, sub.text("reason")).await?;
    }
  }
  Ok(Redirect::to("/admin/cognoms/merge"))
}

/// `POST /admin/cognoms/merge/delete` with `alias_id`.
pub async fn admin_delete<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let alias = sub.require_id("alias_id")?;
  if !state.gov.delete_redirect(&sub.auth.ctx, alias).await? {
    return Err(arrels_governance::Error::NotFound { kind: "cognom redirect", id: alias }.into());
  }
  Ok(Redirect::to("/admin/cognoms/merge"))
}
