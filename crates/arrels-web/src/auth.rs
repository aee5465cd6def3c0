//! HTTP Basic-auth extractors backed by the user table.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::SaltString,
};
use arrels_core::{
  UserId,
  store::{Store, UserRepository},
  user::User,
};
use arrels_governance::RequestContext;
use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand_core::OsRng;
use tracing::debug;

use crate::{AppState, error::Error};

/// User id the engines see for requests without credentials. No row
/// carries it, so it holds no policies.
pub const ANONYMOUS: UserId = 0;

/// `(login, password)` from an `Authorization: Basic` header. `None` when
/// the header is absent; `Err` when it is present but malformed.
pub fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, Error> {
  let Some(value) = headers.get(header::AUTHORIZATION) else {
    return Ok(None);
  };
  let encoded = value
    .to_str()
    .ok()
    .and_then(|v| v.strip_prefix("Basic "))
    .ok_or(Error::Unauthorized)?;
  let decoded = B64.decode(encoded.trim()).map_err(|_| Error::Unauthorized)?;
  let creds = String::from_utf8(decoded).map_err(|_| Error::Unauthorized)?;
  let (login, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;
  Ok(Some((login.to_owned(), password.to_owned())))
}

/// Argon2 PHC string for `password` with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, Error> {
  let salt = SaltString::generate(&mut OsRng);
  Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|h| h.to_string())
    .map_err(|e| Error::Internal(format!("argon2: {e}")))
}

pub fn verify_password(password: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    .unwrap_or(false)
}

/// Resolve the request's credentials to an active user. `None` without
/// credentials; `Unauthorized` for wrong, unknown or inactive ones.
async fn authenticate<S: Store>(headers: &HeaderMap, state: &AppState<S>) -> Result<Option<User>, Error> {
  let Some((login, password)) = basic_credentials(headers)? else {
    return Ok(None);
  };
  let found = state
    .gov
    .store()
    .get_credentials(login.clone())
    .await
    .map_err(arrels_governance::Error::store)?;
  let Some((user, hash)) = found else {
    debug!(%login, "unknown login");
    return Err(Error::Unauthorized);
  };
  if !user.actiu {
    debug!(%login, "inactive user");
    return Err(Error::Unauthorized);
  }
  if !verify_password(&password, &hash) {
    debug!(%login, "wrong password");
    return Err(Error::Unauthorized);
  }
  Ok(Some(user))
}

fn context_for(user: &User) -> RequestContext { RequestContext::new(user.id).with_lang(user.locale.clone()) }

/// An authenticated, active user. Rejects with 401 otherwise.
pub struct AuthUser {
  pub user: User,
  pub ctx:  RequestContext,
}

impl<S: Store + 'static> FromRequestParts<AppState<S>> for AuthUser {
  type Rejection = Error;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let user = authenticate(&parts.headers, state).await?.ok_or(Error::Unauthorized)?;
    let ctx = context_for(&user);
    Ok(AuthUser { user, ctx })
  }
}

/// The caller of a read-only route: a user when credentials are sent,
/// anonymous otherwise. Wrong credentials still reject with 401.
pub struct Viewer {
  pub user: Option<User>,
  pub ctx:  RequestContext,
}

impl<S: Store + 'static> FromRequestParts<AppState<S>> for Viewer {
  type Rejection = Error;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let user = authenticate(&parts.headers, state).await?;
    let ctx = match &user {
      Some(u) => context_for(u),
      None => RequestContext::new(ANONYMOUS),
    };
    Ok(Viewer { user, ctx })
  }
}
