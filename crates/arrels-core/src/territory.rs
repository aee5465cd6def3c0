//! Territorial and ecclesiastic entities: countries, administrative levels,
//! municipalities and ecclesiastic entities.
//!
//! These are the anchors that scoped permissions refer to.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  fields::{EntityFields, EntityKind, FieldKind, FieldSpec},
};

pub const MAX_NIVELL: i64 = 7;

// ─── Pais ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaisFields {
  pub nom:       String,
  /// ISO 3166-1 alpha-2, unique.
  pub codi_iso2: String,
  pub codi_iso3: Option<String>,
}

pub const PAIS_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::required("codi_iso2", "Codi ISO 2", FieldKind::Text),
  FieldSpec::optional("codi_iso3", "Codi ISO 3", FieldKind::Text),
];

impl EntityFields for PaisFields {
  const KIND: EntityKind = EntityKind::Pais;

  fn title(&self) -> &str { &self.nom }

  fn validate(&self) -> Result<()> {
    if !is_iso_code(&self.codi_iso2, 2) {
      return Err(Error::validation(format!("invalid ISO 3166 alpha-2 code: {:?}", self.codi_iso2)));
    }
    if let Some(iso3) = &self.codi_iso3
      && !is_iso_code(iso3, 3)
    {
      return Err(Error::validation(format!("invalid ISO 3166 alpha-3 code: {iso3:?}")));
    }
    Ok(())
  }
}

fn is_iso_code(code: &str, len: usize) -> bool {
  code.len() == len && code.bytes().all(|b| b.is_ascii_uppercase())
}

// ─── Nivell administratiu ────────────────────────────────────────────────────

/// An administrative level (province, comarca, region...). Level 1 is the
/// broadest below the country.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NivellFields {
  pub nom:       String,
  pub nivell:    i64,
  pub tipus:     Option<String>,
  pub pais_id:   Option<i64>,
  pub parent_id: Option<i64>,
  pub any_inici: Option<i64>,
  pub any_fi:    Option<i64>,
}

pub const NIVELL_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::required("nivell", "Nivell", FieldKind::Int),
  FieldSpec::optional("tipus", "Tipus", FieldKind::Text),
  FieldSpec::optional("pais_id", "País", FieldKind::Int),
  FieldSpec::optional("parent_id", "Nivell superior", FieldKind::Int),
  FieldSpec::optional("any_inici", "Any d'inici", FieldKind::Int),
  FieldSpec::optional("any_fi", "Any de fi", FieldKind::Int),
];

impl EntityFields for NivellFields {
  const KIND: EntityKind = EntityKind::Nivell;

  fn title(&self) -> &str { &self.nom }

  fn validate(&self) -> Result<()> {
    if !(1..=MAX_NIVELL).contains(&self.nivell) {
      return Err(Error::validation(format!("nivell out of range: {}", self.nivell)));
    }
    check_parent(self.parent_id)?;
    check_years(self.any_inici, self.any_fi)
  }
}

// ─── Municipi ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MunicipiFields {
  pub nom:         String,
  pub tipus:       Option<String>,
  pub pais_id:     Option<i64>,
  /// Enclosing administrative levels, broadest first.
  #[serde(default)]
  pub nivells:     Vec<i64>,
  pub codi_postal: Option<String>,
  pub latitud:     Option<f64>,
  pub longitud:    Option<f64>,
}

pub const MUNICIPI_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::optional("tipus", "Tipus", FieldKind::Text),
  FieldSpec::optional("pais_id", "País", FieldKind::Int),
  FieldSpec::optional("nivells", "Nivells administratius", FieldKind::IdList),
  FieldSpec::optional("codi_postal", "Codi postal", FieldKind::Text),
  FieldSpec::optional("latitud", "Latitud", FieldKind::Float),
  FieldSpec::optional("longitud", "Longitud", FieldKind::Float),
];

impl EntityFields for MunicipiFields {
  const KIND: EntityKind = EntityKind::Municipi;

  fn title(&self) -> &str { &self.nom }

  fn validate(&self) -> Result<()> {
    if self.nivells.len() > MAX_NIVELL as usize {
      return Err(Error::validation("too many administrative levels"));
    }
    if let Some(lat) = self.latitud
      && !(-90.0..=90.0).contains(&lat)
    {
      return Err(Error::validation(format!("latitud out of range: {lat}")));
    }
    if let Some(lon) = self.longitud
      && !(-180.0..=180.0).contains(&lon)
    {
      return Err(Error::validation(format!("longitud out of range: {lon}")));
    }
    Ok(())
  }
}

// ─── Entitat eclesiàstica ────────────────────────────────────────────────────

/// An ecclesiastic entity (archdiocese, diocese, deanery, parish...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArquebisbatFields {
  pub nom:       String,
  pub tipus:     Option<String>,
  pub pais_id:   Option<i64>,
  pub parent_id: Option<i64>,
  pub any_inici: Option<i64>,
  pub any_fi:    Option<i64>,
  pub web:       Option<String>,
}

pub const ARQUEBISBAT_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::optional("tipus", "Tipus", FieldKind::Text),
  FieldSpec::optional("pais_id", "País", FieldKind::Int),
  FieldSpec::optional("parent_id", "Entitat superior", FieldKind::Int),
  FieldSpec::optional("any_inici", "Any d'inici", FieldKind::Int),
  FieldSpec::optional("any_fi", "Any de fi", FieldKind::Int),
  FieldSpec::optional("web", "Web", FieldKind::Text),
];

impl EntityFields for ArquebisbatFields {
  const KIND: EntityKind = EntityKind::Arquebisbat;

  fn title(&self) -> &str { &self.nom }

  fn validate(&self) -> Result<()> {
    check_parent(self.parent_id)?;
    check_years(self.any_inici, self.any_fi)
  }
}

// ─── Shared checks ───────────────────────────────────────────────────────────

/// A parent reference must point at a real row. Id 0 is what an unset form
/// field decodes to, so it is rejected here rather than later.
pub(crate) fn check_parent(parent_id: Option<i64>) -> Result<()> {
  match parent_id {
    Some(id) if id <= 0 => Err(Error::validation(format!("invalid parent id: {id}"))),
    _ => Ok(()),
  }
}

/// Years must be in `1..=9999` and ordered.
pub(crate) fn check_years(start: Option<i64>, end: Option<i64>) -> Result<()> {
  for year in [start, end].into_iter().flatten() {
    if !(1..=9999).contains(&year) {
      return Err(Error::validation(format!("year out of range: {year}")));
    }
  }
  if let (Some(s), Some(e)) = (start, end)
    && s > e
  {
    return Err(Error::validation(format!("start year {s} is after end year {e}")));
  }
  Ok(())
}

/// Reject an entity being its own parent. `id` is `None` for a row that has
/// not been inserted yet.
pub fn check_not_self_parent(id: Option<i64>, parent_id: Option<i64>) -> Result<()> {
  check_parent(parent_id)?;
  match (id, parent_id) {
    (Some(id), Some(parent)) if id == parent => {
      Err(Error::validation("an entity cannot be its own parent"))
    }
    _ => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn iso_codes_are_checked() {
    let ok = PaisFields { nom: "Andorra".into(), codi_iso2: "AD".into(), codi_iso3: Some("AND".into()) };
    assert!(ok.validate().is_ok());
    let bad = PaisFields { codi_iso2: "ad".into(), ..ok.clone() };
    assert!(bad.validate().is_err());
    let bad3 = PaisFields { codi_iso3: Some("AN".into()), ..ok };
    assert!(bad3.validate().is_err());
  }

  #[test]
  fn years_must_be_ordered_and_in_range() {
    assert!(check_years(Some(1700), Some(1800)).is_ok());
    assert!(check_years(Some(1800), Some(1700)).is_err());
    assert!(check_years(Some(0), None).is_err());
    assert!(check_years(None, Some(10_000)).is_err());
  }

  #[test]
  fn zero_parent_is_rejected_even_without_id() {
    assert!(check_not_self_parent(None, Some(0)).is_err());
    assert!(check_not_self_parent(Some(4), Some(4)).is_err());
    assert!(check_not_self_parent(Some(4), Some(3)).is_ok());
  }

  #[test]
  fn nivell_level_range() {
    let n = NivellFields { nom: "Osona".into(), nivell: 8, ..Default::default() };
    assert!(n.validate().is_err());
  }
}
