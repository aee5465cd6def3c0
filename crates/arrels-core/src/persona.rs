//! Transcribed persons.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  fields::{EntityFields, EntityKind, FieldKind, FieldSpec},
  territory::check_years,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonaFields {
  pub nom:           String,
  pub cognom1:       Option<String>,
  pub cognom2:       Option<String>,
  /// `h`, `d` or unknown.
  pub sexe:          Option<String>,
  pub any_naixement: Option<i64>,
  pub any_defuncio:  Option<i64>,
  pub municipi_id:   Option<i64>,
  pub ofici:         Option<String>,
  pub notes:         Option<String>,
}

pub const PERSONA_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("nom", "Nom", FieldKind::Text),
  FieldSpec::optional("cognom1", "Primer cognom", FieldKind::Text),
  FieldSpec::optional("cognom2", "Segon cognom", FieldKind::Text),
  FieldSpec::optional("sexe", "Sexe", FieldKind::Text),
  FieldSpec::optional("any_naixement", "Any de naixement", FieldKind::Int),
  FieldSpec::optional("any_defuncio", "Any de defunció", FieldKind::Int),
  FieldSpec::optional("municipi_id", "Municipi", FieldKind::Int),
  FieldSpec::optional("ofici", "Ofici", FieldKind::Text),
  FieldSpec::optional("notes", "Notes", FieldKind::Text),
];

impl EntityFields for PersonaFields {
  const KIND: EntityKind = EntityKind::Persona;

  fn title(&self) -> &str { &self.nom }

  fn validate(&self) -> Result<()> {
    if let Some(sexe) = self.sexe.as_deref()
      && !matches!(sexe, "h" | "d" | "")
    {
      return Err(Error::validation(format!("unknown sexe: {sexe:?}")));
    }
    check_years(self.any_naixement, self.any_defuncio)
  }
}
