//! Surnames, their variants, redirects between surname ids and merge
//! suggestions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result, UserId,
  fields::{EntityFields, EntityKind, FieldKind, FieldSpec},
};

pub type CognomId = i64;
pub type SuggestionId = i64;

/// Upper bound on redirect hops walked when resolving a canonical surname.
pub const MAX_REDIRECT_STEPS: usize = 20;

// ─── Cognom ──────────────────────────────────────────────────────────────────

/// The canonical written form of a surname.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CognomFields {
  pub forma:  String,
  pub origen: Option<String>,
  pub notes:  Option<String>,
}

pub const COGNOM_FIELDS: &[FieldSpec] = &[
  FieldSpec::required("forma", "Forma", FieldKind::Text),
  FieldSpec::optional("origen", "Origen", FieldKind::Text),
  FieldSpec::optional("notes", "Notes", FieldKind::Text),
];

impl EntityFields for CognomFields {
  const KIND: EntityKind = EntityKind::Cognom;

  fn title(&self) -> &str { &self.forma }

  fn validate(&self) -> Result<()> {
    if self.forma.chars().any(|c| c.is_ascii_digit()) {
      return Err(Error::validation(format!("surname contains digits: {:?}", self.forma)));
    }
    Ok(())
  }
}

/// An alternative spelling; unique per `(cognom_id, variant)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognomVariant {
  pub id:        i64,
  pub cognom_id: CognomId,
  pub variant:   String,
}

/// A search hit over canonical forms and variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognomHit {
  pub cognom_id: CognomId,
  pub forma:     String,
  /// The variant that matched, when the hit did not come from the form.
  pub variant:   Option<String>,
}

/// One municipality cell of a surname heatmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapCell {
  pub municipi_id: i64,
  pub nom:         String,
  pub latitud:     Option<f64>,
  pub longitud:    Option<f64>,
  pub persones:    i64,
}

// ─── Redirects ───────────────────────────────────────────────────────────────

/// `from_id` is an alias of `to_id`. Only the next hop is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognomRedirect {
  pub from_id:    CognomId,
  pub to_id:      CognomId,
  pub reason:     Option<String>,
  pub created_by: Option<UserId>,
  pub created_at: DateTime<Utc>,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SuggestionState {
  #[default]
  Pendent,
  Acceptat,
  Rebutjat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognomRedirectSuggestion {
  pub id:           SuggestionId,
  pub from_id:      CognomId,
  pub to_id:        CognomId,
  pub reason:       Option<String>,
  pub state:        SuggestionState,
  pub created_by:   UserId,
  pub created_at:   DateTime<Utc>,
  pub moderated_by: Option<UserId>,
  pub moderated_at: Option<DateTime<Utc>>,
}

/// Input to [`crate::store::CognomRepository::create_redirect_suggestion`].
#[derive(Debug, Clone)]
pub struct NewSuggestion {
  pub from_id:    CognomId,
  pub to_id:      CognomId,
  pub reason:     Option<String>,
  pub created_by: UserId,
}
