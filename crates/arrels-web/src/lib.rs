//! HTTP layer for Arrels.
//!
//! Exposes an axum [`Router`] over a shared [`Governance`] engine: entity
//! CRUD per domain, the wiki routes of every wiki-edited kind, raw
//! transcriptions, moderation, administration, surname merges, registration
//! and the JSON API under `/api`.

pub mod auth;
pub mod csrf;
pub mod error;
pub mod handlers;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use arrels_core::{EntityKind, store::Store};
use arrels_governance::{Governance, GovernanceConfig};
use axum::{
  Extension, Router, middleware,
  routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use handlers::{admin, cognoms, entities, moderacio, registre, transcripcions, wiki};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and the
/// environment. The engine limits sit at the top level next to the server
/// keys, under the names the deployment documentation uses.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                   String,
  #[serde(default = "default_port")]
  pub port:                   u16,
  #[serde(default = "default_store_path")]
  pub store_path:             PathBuf,
  /// Key the per-login CSRF tokens are derived from.
  pub csrf_secret:            String,
  /// Wall-clock budget of an admin achievement recompute.
  #[serde(default = "default_recompute_timeout")]
  pub recompute_timeout_secs: u64,
  #[serde(flatten)]
  pub governance:             GovernanceConfig,
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("arrels.db") }

fn default_recompute_timeout() -> u64 { 300 }

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub gov:    Arc<Governance<S>>,
  pub config: Arc<ServerConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self { Self { gov: Arc::clone(&self.gov), config: Arc::clone(&self.config) } }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Where each entity kind lives, `/<domain>/<collection>`.
pub const ENTITY_ROUTES: &[(EntityKind, &str)] = &[
  (EntityKind::Pais, "/territori/paisos"),
  (EntityKind::Nivell, "/territori/nivells"),
  (EntityKind::Municipi, "/territori/municipis"),
  (EntityKind::Arquebisbat, "/eclesia/entitats"),
  (EntityKind::Arxiu, "/documentals/arxius"),
  (EntityKind::Llibre, "/documentals/llibres"),
  (EntityKind::Persona, "/persones"),
  (EntityKind::Cognom, "/cognoms"),
  (EntityKind::EventHistoric, "/historia/events"),
];

pub fn base_path(kind: EntityKind) -> &'static str {
  ENTITY_ROUTES.iter().find(|(k, _)| *k == kind).map_or("/", |(_, base)| base)
}

fn entity_routes<S: Store + 'static>(kind: EntityKind) -> Router<AppState<S>> {
  let mut routes = Router::new()
    .route("/", get(entities::list::<S>).post(entities::create::<S>))
    .route("/new", get(entities::new_form::<S>))
    .route("/{id}", get(entities::show::<S>).post(entities::update::<S>))
    .route("/{id}/edit", get(entities::edit_form::<S>))
    .route("/{id}/delete", post(entities::delete::<S>));
  if kind.object_type().is_some() {
    routes = routes
      .route("/{id}/historial", get(wiki::history::<S>))
      .route("/{id}/historial/revert", post(wiki::revert::<S>))
      .route("/{id}/marca", post(wiki::mark::<S>))
      .route("/{id}/desmarca", post(wiki::unmark::<S>))
      .route("/{id}/estadistiques", get(wiki::stats::<S>));
  }
  if kind == EntityKind::Cognom {
    routes = routes
      .route("/merge", get(cognoms::merge_form::<S>).post(cognoms::suggest::<S>))
      .route("/{id}/variants", post(cognoms::add_variant::<S>));
  }
  routes.layer(Extension(kind))
}

/// Build the axum [`Router`] for the whole site.
pub fn router<S: Store + 'static>(state: AppState<S>) -> Router {
  let mut app = Router::new();
  for (kind, base) in ENTITY_ROUTES {
    app = app.nest(base, entity_routes::<S>(*kind));
  }
  app
    // Raw transcriptions
    .route("/documentals/transcripcions", post(transcripcions::create::<S>))
    .route("/documentals/transcripcions/{id}", get(transcripcions::show::<S>).post(transcripcions::edit::<S>))
    .route("/documentals/transcripcions/{id}/historial", get(transcripcions::history::<S>))
    .route("/documentals/transcripcions/{id}/moderar", post(transcripcions::moderate::<S>))
    .route("/documentals/transcripcions/canvis/{change_id}/moderar", post(transcripcions::moderate_change::<S>))
    // Moderation
    .route("/moderacio", get(moderacio::queue::<S>))
    .route("/moderacio/wiki/{id}/aprovar", post(moderacio::approve_change::<S>))
    .route("/moderacio/wiki/{id}/rebutjar", post(moderacio::reject_change::<S>))
    .route("/moderacio/{kind}/{id}/aprovar", post(moderacio::approve::<S>))
    .route("/moderacio/{kind}/{id}/rebutjar", post(moderacio::reject::<S>))
    // Administration
    .route("/admin/achievements", get(admin::achievements::<S>).post(admin::save_achievement::<S>))
    .route("/admin/achievements/recompute", post(admin::recompute::<S>))
    .route("/admin/punts/regles", get(admin::points_rules::<S>).post(admin::save_points_rule::<S>))
    .route("/admin/punts/regles/recalc", post(admin::recalc_points::<S>))
    .route("/admin/politiques", get(admin::policies::<S>).post(admin::save_policy::<S>))
    .route("/admin/politiques/assignacions", get(admin::assignments::<S>))
    .route("/admin/politiques/assignacions/user", post(admin::assign_user::<S>))
    .route("/admin/politiques/assignacions/grup", post(admin::assign_group::<S>))
    .route("/admin/cognoms/merge", get(cognoms::admin_list::<S>).post(cognoms::admin_merge::<S>))
    .route("/admin/cognoms/merge/delete", post(cognoms::admin_delete::<S>))
    // Accounts
    .route("/registre", post(registre::register::<S>))
    .route("/activar/{token}", get(registre::activate::<S>))
    .route("/perfil", get(registre::profile::<S>))
    .nest_service("/api", arrels_api::api_router(Arc::clone(&state.gov)))
    .layer(middleware::from_fn_with_state(Arc::clone(&state.config), csrf::issue))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
pub(crate) mod testutil;

#[cfg(test)]
mod tests {
  use arrels_core::{
    EntityKind,
    cognom::CognomRedirect,
    store::{CognomRepository, WikiRepository},
    wiki::ObjectType,
  };
  use arrels_governance::GovernanceConfig;
  use axum::http::{StatusCode, header};
  use chrono::Utc;
  use serde_json::json;

  use super::*;
  use crate::testutil::{admin, get, grant, inactive_user, json, location, post_form, published, send, state, state_with, user};

  #[tokio::test]
  async fn writes_need_credentials() {
    let (state, _store) = state().await;
    let resp = send(&state, post_form("/territori/paisos", None, &[("nom", "Andorra")], false)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
  }

  #[tokio::test]
  async fn inactive_users_are_refused() {
    let (state, store) = state().await;
    inactive_user(&store, "nova").await;
    let resp = send(&state, get("/perfil", Some("nova"))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn authenticated_responses_carry_the_csrf_token() {
    let (state, store) = state().await;
    user(&store, "joan").await;
    let resp = send(&state, get("/perfil", Some("joan"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let minted = resp.headers().get(csrf::HEADER).and_then(|v| v.to_str().ok()).map(str::to_owned);
    assert_eq!(minted, Some(csrf::token(testutil::SECRET, "joan")));
    assert_eq!(json(resp).await["user"]["login"], "joan");
  }

  #[tokio::test]
  async fn posts_without_token_are_refused() {
    let (state, store) = state().await;
    admin(&store).await;
    let fields = [("nom", "Andorra"), ("codi_iso2", "AD")];
    let resp = send(&state, post_form("/territori/paisos", Some("admin"), &fields, false)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(resp).await["error"], "error.csrf");
  }

  #[tokio::test]
  async fn created_rows_are_hidden_until_approved() {
    let (state, store) = state().await;
    admin(&store).await;
    let fields = [("nom", "Andorra"), ("codi_iso2", "AD")];
    let resp = send(&state, post_form("/territori/paisos", Some("admin"), &fields, true)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let path = location(&resp).to_owned();
    let id = path.rsplit('/').next().unwrap().to_owned();

    let resp = send(&state, get(&path, None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let approve = format!("/moderacio/pais/{id}/aprovar");
    let resp = send(&state, post_form(&approve, Some("admin"), &[], true)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), "/moderacio");

    let resp = send(&state, get(&path, None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["entity"]["moderation"]["state"], "publicat");
  }

  #[tokio::test]
  async fn edits_to_published_rows_become_proposals() {
    let (state, store) = state().await;
    admin(&store).await;
    let id = published(&store, EntityKind::Municipi, json!({"nom": "Reus"})).await;
    let path = format!("/territori/municipis/{id}");
    let resp = send(&state, post_form(&path, Some("admin"), &[("nom", "Reus del Camp")], true)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), format!("{path}/historial"));

    let resp = send(&state, get(&path, None)).await;
    assert_eq!(json(resp).await["entity"]["snapshot"]["nom"], "Reus");
  }

  #[tokio::test]
  async fn proposal_bursts_answer_too_many_requests() {
    let config = GovernanceConfig { wiki_change_burst: 1.0, ..Default::default() };
    let (state, store) = state_with(config).await;
    admin(&store).await;
    let id = published(&store, EntityKind::Municipi, json!({"nom": "Reus"})).await;
    let path = format!("/territori/municipis/{id}");
    let resp = send(&state, post_form(&path, Some("admin"), &[("nom", "Reus A")], true)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let resp = send(&state, post_form(&path, Some("admin"), &[("nom", "Reus B")], true)).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
  }

  #[tokio::test]
  async fn merged_surnames_redirect_to_the_canonical_page() {
    let (state, store) = state().await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Puix"})).await;
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Puig"})).await;
    store
      .set_cognom_redirect(CognomRedirect {
        from_id:    alias,
        to_id:      canonical,
        reason:     None,
        created_by: None,
        created_at: Utc::now(),
      })
      .await
      .unwrap();

    let resp = send(&state, get(&format!("/cognoms/{alias}/historial?view=current"), None)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), format!("/cognoms/{canonical}/historial?view=current"));

    let resp = send(&state, get(&format!("/cognoms/{canonical}"), None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  fn interest_count(stats: &serde_json::Value) -> i64 {
    stats["counts"]
      .as_array()
      .and_then(|counts| counts.iter().find(|c| c["tipus"] == "interes"))
      .and_then(|c| c["n"].as_i64())
      .unwrap_or(0)
  }

  #[tokio::test]
  async fn writes_to_a_merged_alias_reach_the_canonical_surname() {
    let (state, store) = state().await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Puix"})).await;
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Puig"})).await;
    store
      .set_cognom_redirect(CognomRedirect {
        from_id:    alias,
        to_id:      canonical,
        reason:     None,
        created_by: None,
        created_at: Utc::now(),
      })
      .await
      .unwrap();
    let u = user(&store, "maria").await;
    grant(&store, u, r#"{"cognoms.edit": "allow"}"#).await;

    let mark = [("tipus", "interes"), ("public", "1")];
    let resp = send(&state, post_form(&format!("/cognoms/{alias}/marca"), Some("maria"), &mark, true)).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), format!("/cognoms/{canonical}"));
    let stats = json(send(&state, get(&format!("/cognoms/{canonical}/estadistiques"), None)).await).await;
    assert_eq!(interest_count(&stats), 1);
    assert!(store.get_wiki_mark(ObjectType::Cognom, alias, u).await.unwrap().is_none());

    let resp = send(&state, post_form(&format!("/cognoms/{alias}/desmarca"), Some("maria"), &[], true)).await;
    assert_eq!(location(&resp), format!("/cognoms/{canonical}"));
    let stats = json(send(&state, get(&format!("/cognoms/{canonical}/estadistiques"), None)).await).await;
    assert_eq!(interest_count(&stats), 0);

    let variant = [("variant", "Puitg")];
    let resp = send(&state, post_form(&format!("/cognoms/{alias}/variants"), Some("maria"), &variant, true)).await;
    assert_eq!(location(&resp), format!("/cognoms/{canonical}"));
    let variants = store.list_cognom_variants(canonical).await.unwrap();
    assert_eq!(variants.iter().map(|v| v.variant.as_str()).collect::<Vec<_>>(), vec!["Puitg"]);

    let resp = send(&state, get(&format!("/cognoms/{alias}/edit"), Some("maria"))).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&resp), format!("/cognoms/{canonical}/edit"));
  }

  #[tokio::test]
  async fn registration_and_activation() {
    let (state, store) = state().await;
    let fields = [("login", "maria"), ("password", "prou-llarga")];
    let resp = send(&state, post_form("/registre", None, &fields, false)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(json(resp).await["login"], "maria");

    let resp = send(&state, post_form("/registre", None, &fields, false)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    inactive_user(&store, "pere").await;
    let resp = send(&state, get("/activar/tok-pere", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = send(&state, get("/activar/tok-pere", None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = send(&state, get("/perfil", Some("pere"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn administration_needs_permission() {
    let (state, store) = state().await;
    user(&store, "joan").await;
    let resp = send(&state, post_form("/admin/achievements/recompute", Some("joan"), &[], true)).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn moderators_see_the_queue() {
    let (state, store) = state().await;
    let id = user(&store, "mod").await;
    grant(&store, id, r#"{"moderacio.moderate": "allow"}"#).await;
    let resp = send(&state, get("/moderacio", Some("mod"))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["wiki"], json!([]));
  }

  #[tokio::test]
  async fn api_is_mounted() {
    let (state, _store) = state().await;
    let resp = send(&state, get("/api/cognoms/search?q=", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await, json!([]));
  }
}
