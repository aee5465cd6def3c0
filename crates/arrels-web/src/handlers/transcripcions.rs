//! Raw transcriptions: JSON bodies, field-level history, moderation.

use arrels_core::{
  store::Store,
  transcripcio::{TranscripcioChange, TranscripcioChangeId, TranscripcioId, TranscripcioRaw, TranscripcioSnapshot},
  wiki::{DiffRow, FieldValue},
};
use arrels_governance::wiki::raw::TranscripcioEdit;
use axum::{
  Json,
  extract::{Path, Query, State},
  response::Redirect,
};
use serde::Serialize;

use super::wiki::{HistoryParams, token};
use crate::{
  AppState,
  auth::Viewer,
  csrf::{JsonSubmission, Submission},
  error::{Error, Result},
};

const BASE: &str = "/documentals/transcripcions";

/// `aprovar` or `rebutjar` from the `decisio` field.
fn decision(sub: &Submission) -> Result<bool> {
  match sub.get("decisio") {
    Some("aprovar") => Ok(true),
    Some("rebutjar") => Ok(false),
    other => Err(Error::BadRequest(format!("decisio must be aprovar or rebutjar, got {other:?}"))),
  }
}

/// `POST /documentals/transcripcions` with a snapshot as JSON.
pub async fn create<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: JsonSubmission<TranscripcioSnapshot>,
) -> Result<Redirect> {
  let raw = state.gov.create_transcripcio(&sub.auth.ctx, sub.body).await?;
  Ok(Redirect::to(&format!("{BASE}/{}", raw.id)))
}

/// `GET /documentals/transcripcions/{id}`
pub async fn show<S: Store + 'static>(
  State(state): State<AppState<S>>,
  viewer: Viewer,
  Path(id): Path<TranscripcioId>,
) -> Result<Json<TranscripcioRaw>> {
  Ok(Json(state.gov.get_transcripcio(&viewer.ctx, id).await?))
}

/// `POST /documentals/transcripcions/{id}` with a JSON list of field edits.
/// Answers with the changes recorded.
pub async fn edit<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<TranscripcioId>,
  sub: JsonSubmission<Vec<TranscripcioEdit>>,
) -> Result<Json<Vec<TranscripcioChange>>> {
  Ok(Json(state.gov.edit_transcripcio(&sub.auth.ctx, id, sub.body).await?))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TranscripcioHistory {
  Changes { changes: Vec<TranscripcioChange> },
  Version { version: Vec<FieldValue> },
  Diff { diff: Vec<DiffRow> },
}

/// `GET /documentals/transcripcions/{id}/historial[?view=..|?left=..&right=..]`
pub async fn history<S: Store + 'static>(
  State(state): State<AppState<S>>,
  viewer: Viewer,
  Path(id): Path<TranscripcioId>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<TranscripcioHistory>> {
  let gov = &state.gov;
  let view = match (params.view, params.left, params.right) {
    (Some(v), _, _) => TranscripcioHistory::Version {
      version: gov.view_transcripcio_version(&viewer.ctx, id, token(&v)?).await?,
    },
    (None, left, right) if left.is_some() || right.is_some() => {
      let left = token(left.as_deref().unwrap_or("current"))?;
      let right = token(right.as_deref().unwrap_or("current"))?;
      TranscripcioHistory::Diff { diff: gov.compare_transcripcio(&viewer.ctx, id, left, right).await? }
    }
    _ => TranscripcioHistory::Changes { changes: gov.transcripcio_history(&viewer.ctx, id).await? },
  };
  Ok(Json(view))
}

/// `POST /documentals/transcripcions/{id}/moderar` with `decisio` and `motiu`.
pub async fn moderate<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(id): Path<TranscripcioId>,
  sub: Submission,
) -> Result<Redirect> {
  let approve = decision(&sub)?;
  state.gov.moderate_transcripcio(&sub.auth.ctx, id, approve, sub.text("motiu")).await?;
  Ok(Redirect::to(&format!("{BASE}/{id}")))
}

/// `POST /documentals/transcripcions/canvis/{change_id}/moderar` with `decisio`.
pub async fn moderate_change<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(change_id): Path<TranscripcioChangeId>,
  sub: Submission,
) -> Result<Redirect> {
  let approve = decision(&sub)?;
  state.gov.moderate_transcripcio_change(&sub.auth.ctx, change_id, approve).await?;
  Ok(Redirect::to("/moderacio"))
}
