//! Fixtures for the router tests.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, Version, password_hash::SaltString};
use arrels_core::{
  EntityKind, ModerationState, Snapshot,
  moderation::ModerationUpdate,
  policy::NewPolicy,
  store::{EntityRepository, PolicyRepository, UserRepository},
  user::NewUser,
};
use arrels_governance::{Governance, GovernanceConfig};
use arrels_store_sqlite::SqliteStore;
use axum::{
  Router,
  body::Body,
  http::{Request, Response, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::Utc;
use rand_core::OsRng;
use tower::ServiceExt as _;

use crate::{AppState, ServerConfig, csrf};

pub const SECRET: &str = "test-secret";
pub const PASSWORD: &str = "secret-password";

pub async fn state() -> (AppState<SqliteStore>, Arc<SqliteStore>) { state_with(GovernanceConfig::default()).await }

pub async fn state_with(governance: GovernanceConfig) -> (AppState<SqliteStore>, Arc<SqliteStore>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let config = ServerConfig {
    host: "127.0.0.1".into(),
    port: 0,
    store_path: ":memory:".into(),
    csrf_secret: SECRET.into(),
    recompute_timeout_secs: 30,
    governance: governance.clone(),
  };
  let state = AppState {
    gov:    Arc::new(Governance::new(Arc::clone(&store), governance)),
    config: Arc::new(config),
  };
  (state, store)
}

/// A cheap argon2 hash of [`PASSWORD`]; verification reads the cost from
/// the PHC string.
fn cheap_hash() -> String {
  let params = Params::new(1024, 1, 1, None).expect("argon2 params");
  let salt = SaltString::generate(&mut OsRng);
  Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    .hash_password(PASSWORD.as_bytes(), &salt)
    .expect("hash")
    .to_string()
}

/// A registered but not yet activated user; its token is `tok-<login>`.
pub async fn inactive_user(store: &SqliteStore, login: &str) -> i64 {
  store
    .create_user(NewUser {
      login:            login.into(),
      nom:              None,
      cognoms:          None,
      email:            None,
      locale:           "ca".into(),
      password_hash:    cheap_hash(),
      activation_token: format!("tok-{login}"),
    })
    .await
    .unwrap()
    .id
}

pub async fn user(store: &SqliteStore, login: &str) -> i64 {
  let id = inactive_user(store, login).await;
  store.activate_user(format!("tok-{login}")).await.unwrap();
  id
}

static POLICY_SEQ: AtomicUsize = AtomicUsize::new(0);

pub async fn grant(store: &SqliteStore, user: i64, document: &str) {
  let n = POLICY_SEQ.fetch_add(1, Ordering::Relaxed);
  let policy = store
    .save_policy(NewPolicy {
      id:         None,
      nom:        format!("web-policy-{n}"),
      descripcio: None,
      document:   document.into(),
    })
    .await
    .unwrap();
  store.assign_policy_to_user(policy.id, user).await.unwrap();
}

pub async fn admin(store: &SqliteStore) -> i64 {
  let id = user(store, "admin").await;
  grant(store, id, r#"{"*": "allow"}"#).await;
  id
}

pub async fn published(store: &SqliteStore, kind: EntityKind, value: serde_json::Value) -> i64 {
  let snapshot = Snapshot(value.as_object().expect("object literal").clone()).canonical(kind);
  let entity = store.create_entity(kind, snapshot, 0, ModerationState::Pendent).await.unwrap();
  store
    .set_moderation(kind, entity.id, ModerationUpdate {
      state:        ModerationState::Publicat,
      moderated_by: 0,
      moderated_at: Utc::now(),
      motiu:        None,
    })
    .await
    .unwrap();
  entity.id
}

pub fn basic(login: &str) -> String { format!("Basic {}", B64.encode(format!("{login}:{PASSWORD}"))) }

pub fn get(uri: &str, login: Option<&str>) -> Request<Body> {
  let mut req = Request::get(uri);
  if let Some(login) = login {
    req = req.header(header::AUTHORIZATION, basic(login));
  }
  req.body(Body::empty()).unwrap()
}

fn encode(s: &str) -> String {
  s.bytes()
    .map(|b| match b {
      b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
      _ => format!("%{b:02X}"),
    })
    .collect()
}

/// A form POST; the login's CSRF token is added unless `with_token` is off.
pub fn post_form(uri: &str, login: Option<&str>, fields: &[(&str, &str)], with_token: bool) -> Request<Body> {
  let mut pairs: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", encode(k), encode(v))).collect();
  let mut req = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
  if let Some(login) = login {
    req = req.header(header::AUTHORIZATION, basic(login));
    if with_token {
      pairs.push(format!("{}={}", csrf::FIELD, csrf::token(SECRET, login)));
    }
  }
  req.body(Body::from(pairs.join("&"))).unwrap()
}

pub async fn send(state: &AppState<SqliteStore>, req: Request<Body>) -> Response<Body> {
  crate::router(state.clone()).oneshot(req).await.unwrap()
}

pub async fn json(resp: Response<Body>) -> serde_json::Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

pub fn location(resp: &Response<Body>) -> &str {
  resp.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()).unwrap_or_default()
}
