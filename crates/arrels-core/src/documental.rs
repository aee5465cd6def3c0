//! Archives and books.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  fields::{EntityFields, EntityKind, FieldKind, FieldSpec},
  territory::check_years,
};

// ─── Arxiu ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArxiuFields {
  pub nom:                     String,
  /// e.g. `parroquial`, `municipal`, `diocesa`, `estatal`.
  pub tipus:                   Option<String>,
  /// e.g. `public`, `restringit`, `online`.
  pub acces:                   Option<String>,
  pub municipi_id:             Option<i64>,
  pub entitat_eclesiastica_id: Option<i64>,
  pub adreca:                  Option<String>,
  pub web:                     Option<String>,
  pub notes:                   Option<String>,
}

pub const ARXIU_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::optional("tipus", "Tipus", FieldKind::Text),
  FieldSpec::optional("acces", "Accés", FieldKind::Text),
  FieldSpec::optional("municipi_id", "Municipi", FieldKind::Int),
  FieldSpec::optional("entitat_eclesiastica_id", "Entitat eclesiàstica", FieldKind::Int),
  FieldSpec::optional("adreca", "Adreça", FieldKind::Text),
  FieldSpec::optional("web", "Web", FieldKind::Text),
  FieldSpec::optional("notes", "Notes", FieldKind::Text),
];

impl EntityFields for ArxiuFields {
  const KIND: EntityKind = EntityKind::Arxiu;

  fn title(&self) -> &str { &self.nom }
}

// ─── Llibre ──────────────────────────────────────────────────────────────────

/// A register book (baptisms, marriages, burials, notarial...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlibreFields {
  pub titol:          String,
  pub tipus_llibre:   Option<String>,
  /// Free-text chronology as written on the spine, e.g. `1750-1789`.
  pub cronologia:     Option<String>,
  pub any_inici:      Option<i64>,
  pub any_fi:         Option<i64>,
  pub municipi_id:    Option<i64>,
  pub arquebisbat_id: Option<i64>,
  /// Archives holding a copy of this book.
  #[serde(default)]
  pub arxius:         Vec<i64>,
  pub pagines:        Option<i64>,
  pub notes:          Option<String>,
}

pub const LLIBRE_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("titol", "Títol", FieldKind::Text),
  FieldSpec::optional("tipus_llibre", "Tipus de llibre", FieldKind::Text),
  FieldSpec::optional("cronologia", "Cronologia", FieldKind::Text),
  FieldSpec::optional("any_inici", "Any d'inici", FieldKind::Int),
  FieldSpec::optional("any_fi", "Any de fi", FieldKind::Int),
  FieldSpec::optional("municipi_id", "Municipi", FieldKind::Int),
  FieldSpec::optional("arquebisbat_id", "Entitat eclesiàstica", FieldKind::Int),
  FieldSpec::optional("arxius", "Arxius", FieldKind::IdList),
  FieldSpec::optional("pagines", "Pàgines", FieldKind::Int),
  FieldSpec::optional("notes", "Notes", FieldKind::Text),
];

impl EntityFields for LlibreFields {
  const KIND: EntityKind = EntityKind::Llibre;

  fn title(&self) -> &str { &self.titol }

  fn validate(&self) -> Result<()> {
    if let Some(p) = self.pagines
      && p < 0
    {
      return Err(Error::validation(format!("negative page count: {p}")));
    }
    check_years(self.any_inici, self.any_fi)
  }
}
