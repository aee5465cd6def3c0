//! Registration, activation and the caller's profile.

use std::collections::HashMap;

use arrels_core::{
  policy::Capabilities,
  store::{Store, UserRepository},
  user::{NewUser, User},
};
use axum::{
  Form, Json,
  extract::{Path, State},
  http::StatusCode,
};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use tracing::info;

use crate::{
  AppState,
  auth::{AuthUser, hash_password},
  error::{Error, Result},
};

const MIN_PASSWORD: usize = 8;

fn field(form: &HashMap<String, String>, key: &str) -> Option<String> {
  form.get(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn valid_login(login: &str) -> bool {
  (3..=32).contains(&login.len())
    && login.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn activation_token() -> String {
  let mut bytes = [0u8; 24];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}

#[derive(Debug, Serialize)]
pub struct Registered {
  pub id:    i64,
  pub login: String,
}

/// `POST /registre` with `login`, `password` and optional `email`, `nom`,
/// `cognoms`, `locale`. The account stays inactive until `/activar/{token}`.
pub async fn register<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Form(form): Form<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Registered>)> {
  let login = field(&form, "login").ok_or_else(|| Error::BadRequest("login is required".into()))?;
  if !valid_login(&login) {
    return Err(Error::BadRequest("login must be 3 to 32 letters, digits, '.', '_' or '-'".into()));
  }
  let password = form.get("password").map(String::as_str).unwrap_or_default();
  if password.chars().count() < MIN_PASSWORD {
    return Err(Error::BadRequest(format!("password must have at least {MIN_PASSWORD} characters")));
  }
  let store = state.gov.store();
  if store.get_credentials(login.clone()).await.map_err(arrels_governance::Error::store)?.is_some() {
    return Err(arrels_governance::Error::conflict(format!("login {login:?} is taken")).into());
  }

  let token = activation_token();
  let user = store
    .create_user(NewUser {
      login:            login.clone(),
      nom:              field(&form, "nom"),
      cognoms:          field(&form, "cognoms"),
      email:            field(&form, "email"),
      locale:           field(&form, "locale").unwrap_or_else(|| "ca".to_owned()),
      password_hash:    hash_password(password)?,
      activation_token: token.clone(),
    })
    .await
    .map_err(arrels_governance::Error::store)?;
  info!(user = user.id, %login, activation = %format!("/activar/{token}"), "user registered");
  Ok((StatusCode::CREATED, Json(Registered { id: user.id, login })))
}

/// `GET /activar/{token}`
pub async fn activate<S: Store + 'static>(
  State(state): State<AppState<S>>,
  Path(token): Path<String>,
) -> Result<Json<User>> {
  let user = state
    .gov
    .store()
    .activate_user(token)
    .await
    .map_err(arrels_governance::Error::store)?
    .ok_or(arrels_governance::Error::NotFound { kind: "activation token", id: 0 })?;
  info!(user = user.id, login = %user.login, "user activated");
  Ok(Json(user))
}

#[derive(Debug, Serialize)]
pub struct Profile {
  pub user:         User,
  pub points:       i64,
  pub capabilities: Capabilities,
}

/// `GET /perfil`
pub async fn profile<S: Store + 'static>(State(state): State<AppState<S>>, auth: AuthUser) -> Result<Json<Profile>> {
  let points = state.gov.user_points(auth.user.id).await?;
  let capabilities = state.gov.permissions_for_user(auth.user.id).await?;
  Ok(Json(Profile { user: auth.user, points, capabilities }))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn login_rules() {
    assert!(valid_login("joan.puig"));
    assert!(!valid_login("jo"));
    assert!(!valid_login("joan puig"));
  }

  #[test]
  fn activation_tokens_are_fresh() {
    let a = activation_token();
    assert_eq!(a.len(), 48);
    assert_ne!(a, activation_token());
  }
}
