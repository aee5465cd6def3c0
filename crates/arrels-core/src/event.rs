//! Historical events.

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  fields::{EntityFields, EntityKind, FieldKind, FieldSpec},
  territory::check_years,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventHistoricFields {
  pub titol:       String,
  /// e.g. `epidemia`, `guerra`, `fam`, `riuada`.
  pub tipus:       Option<String>,
  pub any_inici:   Option<i64>,
  pub any_fi:      Option<i64>,
  pub municipi_id: Option<i64>,
  pub descripcio:  Option<String>,
}

pub const EVENT_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("titol", "Títol", FieldKind::Text),
  FieldSpec::optional("tipus", "Tipus", FieldKind::Text),
  FieldSpec::optional("any_inici", "Any d'inici", FieldKind::Int),
  FieldSpec::optional("any_fi", "Any de fi", FieldKind::Int),
  FieldSpec::optional("municipi_id", "Municipi", FieldKind::Int),
  FieldSpec::optional("descripcio", "Descripció", FieldKind::Text),
];

impl EntityFields for EventHistoricFields {
  const KIND: EntityKind = EntityKind::EventHistoric;

  fn title(&self) -> &str { &self.titol }

  fn validate(&self) -> Result<()> { check_years(self.any_inici, self.any_fi) }
}
