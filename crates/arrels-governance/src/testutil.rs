//! Fixtures shared by the engine tests.

use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

use arrels_core::{
  EntityKind, ModerationState, Snapshot,
  moderation::ModerationUpdate,
  policy::NewPolicy,
  store::{EntityRepository, PolicyRepository, UserRepository},
  user::NewUser,
};
use arrels_store_sqlite::SqliteStore;
use chrono::Utc;

use crate::{Governance, GovernanceConfig, RequestContext};

pub async fn engine() -> (Governance<SqliteStore>, Arc<SqliteStore>) {
  engine_with(GovernanceConfig::default()).await
}

pub async fn engine_with(config: GovernanceConfig) -> (Governance<SqliteStore>, Arc<SqliteStore>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  (Governance::new(Arc::clone(&store), config), store)
}

pub fn snap(value: serde_json::Value) -> Snapshot {
  Snapshot(value.as_object().expect("object literal").clone())
}

pub fn ctx(user: i64) -> RequestContext { RequestContext::new(user) }

pub async fn user(store: &SqliteStore, login: &str) -> i64 {
  store
    .create_user(NewUser {
      login:            login.into(),
      nom:              None,
      cognoms:          None,
      email:            None,
      locale:           "ca".into(),
      password_hash:    "$argon2id$stub".into(),
      activation_token: format!("tok-{login}"),
    })
    .await
    .unwrap()
    .id
}

static POLICY_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Attach a fresh policy carrying `document` to `user`.
pub async fn grant(store: &SqliteStore, user: i64, document: &str) {
  let n = POLICY_SEQ.fetch_add(1, Ordering::Relaxed);
  let policy = store
    .save_policy(NewPolicy {
      id:         None,
      nom:        format!("policy-{n}"),
      descripcio: None,
      document:   document.into(),
    })
    .await
    .unwrap();
  store.assign_policy_to_user(policy.id, user).await.unwrap();
}

/// A user holding every permission globally.
pub async fn admin(store: &SqliteStore) -> i64 {
  let id = user(store, "admin").await;
  grant(store, id, r#"{"*": "allow"}"#).await;
  id
}

/// Insert an already published entity created by user 0.
pub async fn published(store: &SqliteStore, kind: EntityKind, value: serde_json::Value) -> i64 {
  let snapshot = snap(value).canonical(kind);
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
