//! Per-login CSRF tokens.
//!
//! A token is the SHA-256 of the server secret and the login, hex encoded.
//! It is minted into the `X-CSRF-Token` header of every response to a request
//! carrying credentials, and every POST must echo it back, either as the
//! `csrf_token` form field or in the same header.

use std::{collections::HashMap, sync::Arc};

use arrels_core::store::Store;
use axum::{
  Form, Json,
  extract::{FromRequest, FromRequestParts, Request, State},
  http::{HeaderMap, HeaderValue},
  middleware::Next,
  response::Response,
};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::{AppState, ServerConfig, auth::{AuthUser, basic_credentials}, error::Error};

pub const HEADER: &str = "x-csrf-token";
pub const FIELD: &str = "csrf_token";

pub fn token(secret: &str, login: &str) -> String {
  let digest = Sha256::new()
    .chain_update(secret.as_bytes())
    .chain_update([0u8])
    .chain_update(login.as_bytes())
    .finalize();
  hex::encode(digest)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify(secret: &str, login: &str, presented: Option<&str>) -> Result<(), Error> {
  let presented = presented.map(str::trim).filter(|t| !t.is_empty()).ok_or(Error::Csrf)?;
  if constant_time_eq(presented.as_bytes(), token(secret, login).as_bytes()) {
    Ok(())
  } else {
    Err(Error::Csrf)
  }
}

fn header_token(headers: &HeaderMap) -> Option<String> {
  headers.get(HEADER).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

/// Middleware minting the caller's token into the response headers.
pub async fn issue(State(config): State<Arc<ServerConfig>>, req: Request, next: Next) -> Response {
  let login = basic_credentials(req.headers()).ok().flatten().map(|(login, _)| login);
  let mut res = next.run(req).await;
  if let Some(login) = login
    && !res.headers().contains_key(HEADER)
    && let Ok(value) = HeaderValue::from_str(&token(&config.csrf_secret, &login))
  {
    res.headers_mut().insert(HEADER, value);
  }
  res
}

/// An authenticated form POST whose CSRF token has been checked.
pub struct Submission {
  pub auth: AuthUser,
  pub form: HashMap<String, String>,
}

impl Submission {
  /// Trimmed, non-empty value of `key`.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.form.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
  }

  pub fn text(&self, key: &str) -> Option<String> { self.get(key).map(str::to_owned) }

  /// Parse `key` as an id; absent or blank is `None`.
  pub fn id(&self, key: &str) -> Result<Option<i64>, Error> {
    self
      .get(key)
      .map(|v| v.parse::<i64>().map_err(|_| Error::BadRequest(format!("{key} must be an integer"))))
      .transpose()
  }

  pub fn require_id(&self, key: &str) -> Result<i64, Error> {
    self.id(key)?.ok_or_else(|| Error::BadRequest(format!("{key} is required")))
  }

  /// Checkbox semantics: present and not an explicit false.
  pub fn flag(&self, key: &str) -> bool {
    self.get(key).is_some_and(|v| !matches!(v, "0" | "false" | "off" | "no"))
  }
}

impl<S: Store + 'static> FromRequest<AppState<S>> for Submission {
  type Rejection = Error;

  async fn from_request(req: Request, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let (mut parts, body) = req.into_parts();
    let auth = AuthUser::from_request_parts(&mut parts, state).await?;
    let from_header = header_token(&parts.headers);
    let req = Request::from_parts(parts, body);
    let Form(form) = Form::<HashMap<String, String>>::from_request(req, state)
      .await
      .map_err(|e| Error::BadRequest(e.body_text()))?;
    let presented = form.get(FIELD).cloned().or(from_header);
    verify(&state.config.csrf_secret, &auth.user.login, presented.as_deref())?;
    Ok(Submission { auth, form })
  }
}

/// An authenticated JSON POST; the token travels in the header.
pub struct JsonSubmission<T> {
  pub auth: AuthUser,
  pub body: T,
}

impl<S, T> FromRequest<AppState<S>> for JsonSubmission<T>
where
  S: Store + 'static,
  T: DeserializeOwned + Send,
{
  type Rejection = Error;

  async fn from_request(req: Request, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let (mut parts, body) = req.into_parts();
    let auth = AuthUser::from_request_parts(&mut parts, state).await?;
    verify(&state.config.csrf_secret, &auth.user.login, header_token(&parts.headers).as_deref())?;
    let req = Request::from_parts(parts, body);
    let Json(body) = Json::<T>::from_request(req, state)
      .await
      .map_err(|e| Error::BadRequest(e.body_text()))?;
    Ok(JsonSubmission { auth, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tokens_are_per_login_and_secret() {
    let a = token("s3cret", "joan");
    assert_eq!(a.len(), 64);
    assert_eq!(a, token("s3cret", "joan"));
    assert_ne!(a, token("s3cret", "maria"));
    assert_ne!(a, token("other", "joan"));
  }

  #[test]
  fn verify_requires_the_exact_token() {
    let t = token("k", "joan");
    assert!(verify("k", "joan", Some(&t)).is_ok());
    assert!(matches!(verify("k", "joan", None), Err(Error::Csrf)));
    assert!(matches!(verify("k", "joan", Some("")), Err(Error::Csrf)));
    assert!(matches!(verify("k", "maria", Some(&t)), Err(Error::Csrf)));
  }
}
