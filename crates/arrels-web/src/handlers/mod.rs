//! Route handlers, one module per area.
//!
//! Views answer with JSON; successful POSTs redirect with `303 See Other`.

pub mod admin;
pub mod cognoms;
pub mod entities;
pub mod moderacio;
pub mod registre;
pub mod transcripcions;
pub mod wiki;

use arrels_core::{EntityKind, store::Store};
use arrels_governance::Governance;
use axum::{
  http::Uri,
  response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Deserializer};

use crate::{base_path, error::Result};

/// `Some(303)` to the canonical surname's page when `id` is a merged alias.
/// `suffix` is the part of the path after the id.
pub(crate) async fn canonical_redirect<S: Store>(
  gov: &Governance<S>,
  kind: EntityKind,
  id: i64,
  suffix: &str,
  uri: &Uri,
) -> Result<Option<Response>> {
  if kind != EntityKind::Cognom {
    return Ok(None);
  }
  let resolved = gov.resolve_canonical(id).await?;
  if !resolved.redirected {
    return Ok(None);
  }
  let mut location = format!("{}/{}{suffix}", base_path(kind), resolved.canonical);
  if let Some(query) = uri.query() {
    location.push('?');
    location.push_str(query);
  }
  Ok(Some(Redirect::to(&location).into_response()))
}

/// `id`, or its canonical surname when it is a merged surname alias.
pub(crate) async fn canonical_id<S: Store>(gov: &Governance<S>, kind: EntityKind, id: i64) -> Result<i64> {
  if kind != EntityKind::Cognom {
    return Ok(id);
  }
  Ok(gov.resolve_canonical(id).await?.canonical)
}

/// Query-string integer where a blank value means absent.
pub(crate) fn blank_as_none<'de, D>(de: D) -> std::result::Result<Option<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Option::<String>::deserialize(de)?;
  match raw.as_deref().map(str::trim) {
    None | Some("") => Ok(None),
    Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
  }
}

#[derive(Debug, Deserialize, Default)]
pub struct Page {
  #[serde(default, deserialize_with = "blank_as_none")]
  pub page:     Option<i64>,
  #[serde(default, deserialize_with = "blank_as_none")]
  pub per_page: Option<i64>,
}

impl Page {
  const DEFAULT_PER_PAGE: i64 = 50;
  pub const MAX_PER_PAGE: i64 = 200;

  /// `(limit, offset)`; pages count from 1 and `per_page` is capped at
  /// [`Self::MAX_PER_PAGE`]. A page past any representable offset is empty.
  pub fn window(&self) -> (usize, usize) {
    let per_page = self
      .per_page
      .filter(|n| *n > 0)
      .map_or(Self::DEFAULT_PER_PAGE, |n| n.min(Self::MAX_PER_PAGE));
    let page = self.page.filter(|n| *n > 0).unwrap_or(1);
    match (page - 1).checked_mul(per_page).map(usize::try_from) {
      Some(Ok(offset)) => (per_page as usize, offset),
      _ => (0, 0),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(page: Option<i64>, per_page: Option<i64>) -> Page { Page { page, per_page } }

  #[test]
  fn windows_count_pages_from_one() {
    assert_eq!(page(None, None).window(), (50, 0));
    assert_eq!(page(Some(3), Some(20)).window(), (20, 40));
    assert_eq!(page(Some(-4), Some(0)).window(), (50, 0));
  }

  #[test]
  fn oversized_pages_are_capped() {
    assert_eq!(page(Some(2), Some(10_000)).window(), (200, 200));
  }

  #[test]
  fn unrepresentable_offsets_give_an_empty_window() {
    assert_eq!(page(Some(i64::MAX), Some(i64::MAX)).window(), (0, 0));
    assert_eq!(page(Some(i64::MAX), None).window(), (0, 0));
  }
}
