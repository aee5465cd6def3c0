//! Handlers for `/cognoms/*`.

use std::sync::Arc;

use arrels_core::{
  cognom::{CognomHit, CognomId, HeatmapCell},
  store::Store,
};
use arrels_governance::Governance;
use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
  pub q:     Option<String>,
  pub limit: Option<usize>,
}

/// `GET /cognoms/search?q=...[&limit=...]`
///
/// Prefix search over surname forms and variants; hits are reported under
/// their canonical surname.
pub async fn search<S: Store>(
  State(gov): State<Arc<Governance<S>>>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<CognomHit>>, ApiError> {
  let q = params.q.unwrap_or_default();
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
  Ok(Json(gov.search_surnames(&q, limit).await?))
}

/// Year bounds arrive as raw strings so that `?y0=&y1=` means "unbounded".
#[derive(Debug, Deserialize, Default)]
pub struct HeatmapParams {
  pub y0: Option<String>,
  pub y1: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeatmapResponse {
  pub cognom_id: CognomId,
  pub forms:     Vec<String>,
  pub y0:        Option<i64>,
  pub y1:        Option<i64>,
  pub total:     i64,
  pub cells:     Vec<HeatmapCell>,
}

fn year(name: &str, raw: Option<String>) -> Result<Option<i64>, ApiError> {
  match raw.as_deref().map(str::trim) {
    None | Some("") => Ok(None),
    Some(s) => s
      .parse::<i64>()
      .map(Some)
      .map_err(|_| ApiError::BadRequest(format!("{name} must be a year, got {s:?}"))),
  }
}

/// `GET /cognoms/{id}/heatmap[?y0=...][&y1=...]`
pub async fn heatmap<S: Store>(
  State(gov): State<Arc<Governance<S>>>,
  Path(id): Path<CognomId>,
  Query(params): Query<HeatmapParams>,
) -> Result<Json<HeatmapResponse>, ApiError> {
  let y0 = year("y0", params.y0)?;
  let y1 = year("y1", params.y1)?;
  let map = gov.surname_heatmap(id, y0, y1).await?;
  Ok(Json(HeatmapResponse {
    cognom_id: map.canonical,
    forms:     map.forms,
    y0,
    y1,
    total:     map.cells.iter().map(|c| c.persones).sum(),
    cells:     map.cells,
  }))
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use arrels_core::{
    EntityKind, ModerationState, Snapshot,
    moderation::ModerationUpdate,
    store::{CognomRepository, EntityRepository},
  };
  use arrels_governance::{Governance, GovernanceConfig};
  use arrels_store_sqlite::SqliteStore;
  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use crate::api_router;

  async fn setup() -> (Arc<Governance<SqliteStore>>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let gov = Arc::new(Governance::new(Arc::clone(&store), GovernanceConfig::default()));
    (gov, store)
  }

  async fn published(store: &SqliteStore, kind: EntityKind, value: Value) -> i64 {
    let snapshot = Snapshot(value.as_object().unwrap().clone()).canonical(kind);
    let entity = store.create_entity(kind, snapshot, 0, ModerationState::Pendent).await.unwrap();
    store
      .set_moderation(kind, entity.id, ModerationUpdate {
        state:        ModerationState::Publicat,
        moderated_by: 0,
        moderated_at: chrono::Utc::now(),
        motiu:        None,
      })
      .await
      .unwrap();
    entity.id
  }

  async fn get_json(gov: Arc<Governance<SqliteStore>>, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = api_router(gov).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn search_empty_query_returns_empty_list() {
    let (gov, _) = setup().await;
    let (status, body) = get_json(gov, "/cognoms/search?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
  }

  #[tokio::test]
  async fn search_finds_forms_and_variants() {
    let (gov, store) = setup().await;
    let puig = published(&store, EntityKind::Cognom, json!({"forma": "Puig"})).await;
    store.add_cognom_variant(puig, "Puch".into()).await.unwrap();

    let (status, body) = get_json(Arc::clone(&gov), "/cognoms/search?q=pu").await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 1, "one hit per canonical surname: {body}");
    assert_eq!(hits[0]["cognom_id"], json!(puig));

    let (_, body) = get_json(gov, "/cognoms/search?q=puch").await;
    assert_eq!(body[0]["variant"], json!("Puch"));
    assert_eq!(body[0]["forma"], json!("Puig"));
  }

  #[tokio::test]
  async fn heatmap_counts_published_persons_per_municipality() {
    let (gov, store) = setup().await;
    let cognom = published(&store, EntityKind::Cognom, json!({"forma": "Serra"})).await;
    let reus = published(&store, EntityKind::Municipi, json!({"nom": "Reus"})).await;
    for (nom, any) in [("Joan", 1850), ("Maria", 1870), ("Pere", 1920)] {
      published(
        &store,
        EntityKind::Persona,
        json!({"nom": nom, "cognom1": "Serra", "any_naixement": any, "municipi_id": reus}),
      )
      .await;
    }

    let (status, body) = get_json(Arc::clone(&gov), &format!("/cognoms/{cognom}/heatmap")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(3));
    assert_eq!(body["cells"][0]["municipi_id"], json!(reus));

    let (_, body) = get_json(gov, &format!("/cognoms/{cognom}/heatmap?y0=1900&y1=")).await;
    assert_eq!(body["total"], json!(1));
    assert_eq!(body["y1"], Value::Null);
  }

  #[tokio::test]
  async fn heatmap_unknown_surname_is_404() {
    let (gov, _) = setup().await;
    let (status, body) = get_json(gov, "/cognoms/999/heatmap").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn heatmap_rejects_malformed_year() {
    let (gov, store) = setup().await;
    let cognom = published(&store, EntityKind::Cognom, json!({"forma": "Vila"})).await;
    let (status, _) = get_json(gov, &format!("/cognoms/{cognom}/heatmap?y0=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }
}
