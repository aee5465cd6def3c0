//! Entity CRUD, mounted once per kind under its `/<domain>/<collection>`.

use arrels_core::{
  EntityKind, FieldKind, ModerationState, StoredEntity,
  store::{EntityFilter, Store},
  wiki::FieldValue,
};
use arrels_governance::moderation::EditOutcome;
use axum::{
  Extension, Json,
  extract::{OriginalUri, Path, Query, State},
  response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use super::{Page, blank_as_none, canonical_redirect};
use crate::{
  AppState,
  auth::{AuthUser, Viewer},
  base_path,
  csrf::Submission,
  error::{Error, Result},
};

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
  pub q:              Option<String>,
  pub status:         Option<String>,
  #[serde(default, deserialize_with = "blank_as_none")]
  pub municipi_id:    Option<i64>,
  #[serde(default, deserialize_with = "blank_as_none")]
  pub pais_id:        Option<i64>,
  #[serde(default, deserialize_with = "blank_as_none")]
  pub arxiu_id:       Option<i64>,
  #[serde(default, deserialize_with = "blank_as_none", alias = "arquevisbat_id", alias = "entitat_id")]
  pub arquebisbat_id: Option<i64>,
  #[serde(default, deserialize_with = "blank_as_none")]
  pub nivell_id:      Option<i64>,
  pub tipus:          Option<String>,
  pub acces:          Option<String>,
  #[serde(flatten)]
  pub page:           Page,
}

fn blank(s: Option<String>) -> Option<String> { s.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()) }

impl ListParams {
  fn into_filter(self) -> Result<EntityFilter> {
    let status = blank(self.status)
      .map(|s| s.parse::<ModerationState>().map_err(|_| Error::BadRequest(format!("unknown status {s:?}"))))
      .transpose()?;
    let (limit, offset) = self.page.window();
    Ok(EntityFilter {
      q: blank(self.q),
      status,
      municipi_id: self.municipi_id,
      pais_id: self.pais_id,
      arxiu_id: self.arxiu_id,
      arquebisbat_id: self.arquebisbat_id,
      nivell_id: self.nivell_id,
      tipus: blank(self.tipus),
      acces: blank(self.acces),
      limit,
      offset,
      ..Default::default()
    })
  }
}

#[derive(Debug, Serialize)]
pub struct EntityList {
  pub kind:     EntityKind,
  pub items:    Vec<StoredEntity>,
  pub limit:    usize,
  pub offset:   usize,
}

/// `GET /<collection>[?q=..][&status=..][&<filters>..][&page=..][&per_page=..]`
pub async fn list<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  viewer: Viewer,
  Query(params): Query<ListParams>,
) -> Result<Json<EntityList>> {
  let filter = params.into_filter()?;
  let (limit, offset) = (filter.effective_limit(), filter.offset);
  let items = state.gov.list_entities(&viewer.ctx, kind, filter).await?;
  Ok(Json(EntityList { kind, items, limit, offset }))
}

#[derive(Debug, Serialize)]
pub struct FieldInfo {
  pub key:      &'static str,
  pub label:    &'static str,
  pub kind:     &'static str,
  pub required: bool,
}

fn field_table(kind: EntityKind) -> Vec<FieldInfo> {
  kind
    .fields()
    .iter()
    .map(|f| FieldInfo {
      key:      f.key,
      label:    f.label,
      kind:     match f.kind {
        FieldKind::Text => "text",
        FieldKind::Int => "int",
        FieldKind::Float => "float",
        FieldKind::IdList => "id_list",
      },
      required: f.required,
    })
    .collect()
}

#[derive(Debug, Serialize)]
pub struct EntityForm {
  pub kind:   EntityKind,
  pub fields: Vec<FieldInfo>,
  /// Current values, when editing.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub values: Option<Vec<FieldValue>>,
}

/// `GET /<collection>/new`
pub async fn new_form<S: Store + 'static>(Extension(kind): Extension<EntityKind>, _auth: AuthUser) -> Json<EntityForm> {
  Json(EntityForm { kind, fields: field_table(kind), values: None })
}

/// `POST /<collection>`: the new row waits for moderation.
pub async fn create<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  sub: Submission,
) -> Result<Redirect> {
  let entity = state.gov.create_entity_form(&sub.auth.ctx, kind, &sub.form).await?;
  Ok(Redirect::to(&format!("{}/{}", base_path(kind), entity.id)))
}

#[derive(Debug, Serialize)]
pub struct EntityView {
  pub entity: StoredEntity,
  pub fields: Vec<FieldValue>,
}

/// `GET /<collection>/{id}`
pub async fn show<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  viewer: Viewer,
  Path(id): Path<i64>,
  OriginalUri(uri): OriginalUri,
) -> Result<Response> {
  if let Some(redirect) = canonical_redirect(&state.gov, kind, id, "", &uri).await? {
    return Ok(redirect);
  }
  let entity = state.gov.get_entity(&viewer.ctx, kind, id).await?;
  let fields = entity.snapshot.flatten(kind);
  Ok(Json(EntityView { entity, fields }).into_response())
}

/// `GET /<collection>/{id}/edit`
pub async fn edit_form<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  auth: AuthUser,
  Path(id): Path<i64>,
  OriginalUri(uri): OriginalUri,
) -> Result<Response> {
  if let Some(redirect) = canonical_redirect(&state.gov, kind, id, "/edit", &uri).await? {
    return Ok(redirect);
  }
  let entity = state.gov.get_entity(&auth.ctx, kind, id).await?;
  Ok(
    Json(EntityForm {
      kind,
      fields: field_table(kind),
      values: Some(entity.snapshot.flatten(kind)),
    })
    .into_response(),
  )
}

/// `POST /<collection>/{id}`: a direct write, or a wiki proposal for
/// published rows of wiki-edited kinds.
pub async fn update<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  Path(id): Path<i64>,
  sub: Submission,
) -> Result<Redirect> {
  let base = base_path(kind);
  match state.gov.edit_entity(&sub.auth.ctx, kind, id, &sub.form).await? {
    EditOutcome::Updated(entity) => Ok(Redirect::to(&format!("{base}/{}", entity.id))),
    EditOutcome::Proposed(change) => Ok(Redirect::to(&format!("{base}/{}/historial", change.object_id))),
  }
}

/// `POST /<collection>/{id}/delete`
pub async fn delete<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Extension(kind): Extension<EntityKind>,
  Path(id): Path<i64>,
  sub: Submission,
) -> Result<Redirect> {
  if !state.gov.delete_entity(&sub.auth.ctx, kind, id).await? {
    return Err(arrels_governance::Error::NotFound { kind: "entity", id }.into());
  }
  Ok(Redirect::to(base_path(kind)))
}
