//! Raw transcriptions of register entries and their field-level history.
//!
//! Unlike the other entities, a raw transcription is edited in place and every
//! edited field is recorded as a [`TranscripcioChange`] whose [`ChangeInfo`]
//! addresses the field inside a [`TranscripcioSnapshot`]. Historical versions
//! are rebuilt by replaying those descriptors backwards from the live state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result, UserId,
  moderation::{Moderation, ModerationState},
  wiki::{ChangeType, FieldValue},
};

pub type TranscripcioId = i64;
pub type TranscripcioChangeId = i64;

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// The top-level fields of a transcribed entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscripcioFields {
  pub llibre_id:  i64,
  pub pagina:     Option<String>,
  /// Baptisme, matrimoni, defunció...
  pub tipus_acte: Option<String>,
  pub data_acte:  Option<String>,
  pub any:        Option<i64>,
  pub literal:    Option<String>,
  pub notes:      Option<String>,
}

/// `(key, label)` of every raw field, in display order.
pub const RAW_FIELDS: &[(&str, &str)] = &[
  ("llibre_id", "Llibre"),
  ("pagina", "Pàgina"),
  ("tipus_acte", "Tipus d'acte"),
  ("data_acte", "Data de l'acte"),
  ("any", "Any"),
  ("literal", "Transcripció literal"),
  ("notes", "Notes"),
];

/// `(key, label)` of every person field, in display order.
pub const PERSON_FIELDS: &[(&str, &str)] = &[
  ("nom", "Nom"),
  ("cognom1", "Primer cognom"),
  ("cognom2", "Segon cognom"),
  ("sexe", "Sexe"),
  ("edat", "Edat"),
  ("ofici", "Ofici"),
  ("residencia", "Residència"),
];

/// A person named in the entry (the baptised child, a parent, a witness).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscripcioPersona {
  /// Stable key within the transcription, e.g. `p1`.
  pub key:        String,
  pub role:       String,
  pub nom:        Option<String>,
  pub cognom1:    Option<String>,
  pub cognom2:    Option<String>,
  pub sexe:       Option<String>,
  pub edat:       Option<String>,
  pub ofici:      Option<String>,
  pub residencia: Option<String>,
}

impl TranscripcioPersona {
  fn slot(&mut self, field: &str) -> Result<&mut Option<String>> {
    Ok(match field {
      "nom" => &mut self.nom,
      "cognom1" => &mut self.cognom1,
      "cognom2" => &mut self.cognom2,
      "sexe" => &mut self.sexe,
      "edat" => &mut self.edat,
      "ofici" => &mut self.ofici,
      "residencia" => &mut self.residencia,
      other => return Err(Error::validation(format!("unknown person field {other:?}"))),
    })
  }

  fn value(&self, field: &str) -> Option<&str> {
    match field {
      "nom" => self.nom.as_deref(),
      "cognom1" => self.cognom1.as_deref(),
      "cognom2" => self.cognom2.as_deref(),
      "sexe" => self.sexe.as_deref(),
      "edat" => self.edat.as_deref(),
      "ofici" => self.ofici.as_deref(),
      "residencia" => self.residencia.as_deref(),
      _ => None,
    }
  }
}

/// A free-form typed attribute of the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscripcioAtribut {
  pub key:   String,
  /// `text`, `int`, `date`.
  pub tipus: String,
  pub value: String,
}

/// One full version of a transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscripcioSnapshot {
  pub raw:      TranscripcioFields,
  #[serde(default)]
  pub persones: Vec<TranscripcioPersona>,
  #[serde(default)]
  pub atributs: Vec<TranscripcioAtribut>,
}

impl TranscripcioSnapshot {
  pub fn raw_value(&self, field: &str) -> Option<String> {
    let r = &self.raw;
    match field {
      "llibre_id" => Some(r.llibre_id.to_string()),
      "pagina" => r.pagina.clone(),
      "tipus_acte" => r.tipus_acte.clone(),
      "data_acte" => r.data_acte.clone(),
      "any" => r.any.map(|a| a.to_string()),
      "literal" => r.literal.clone(),
      "notes" => r.notes.clone(),
      _ => None,
    }
  }

  fn set_raw(&mut self, field: &str, value: Option<&str>) -> Result<()> {
    let value = value.map(str::trim).filter(|v| !v.is_empty());
    let text = value.map(str::to_owned);
    let r = &mut self.raw;
    match field {
      "llibre_id" => {
        r.llibre_id = value
          .and_then(|v| v.parse().ok())
          .filter(|id: &i64| *id > 0)
          .ok_or_else(|| Error::validation("llibre_id must be a positive id"))?;
      }
      "pagina" => r.pagina = text,
      "tipus_acte" => r.tipus_acte = text,
      "data_acte" => r.data_acte = text,
      "any" => {
        r.any = value
          .map(|v| v.parse::<i64>().map_err(|_| Error::validation(format!("any: {v:?}"))))
          .transpose()?;
      }
      "literal" => r.literal = text,
      "notes" => r.notes = text,
      other => return Err(Error::validation(format!("unknown raw field {other:?}"))),
    }
    Ok(())
  }

  fn person_index(&self, info: &ChangeInfo) -> Option<usize> {
    match (&info.person_key, &info.role) {
      (Some(key), _) => self.persones.iter().position(|p| p.key == *key),
      (None, Some(role)) => self.persones.iter().position(|p| p.role == *role),
      (None, None) => None,
    }
  }

  /// Current value of the field `info` addresses.
  pub fn get(&self, info: &ChangeInfo) -> Option<String> {
    match info.target {
      ChangeTarget::Raw => info.raw_field.as_deref().and_then(|f| self.raw_value(f)),
      ChangeTarget::Attr => {
        let key = info.attr_key.as_deref()?;
        self.atributs.iter().find(|a| a.key == key).map(|a| a.value.clone())
      }
      ChangeTarget::Person => {
        let field = info.person_field.as_deref()?;
        let idx = self.person_index(info)?;
        self.persones[idx].value(field).map(str::to_owned)
      }
    }
  }

  /// Set the field `info` addresses. `None` clears it; clearing an attribute
  /// removes it. A missing attribute or person is created.
  pub fn set(&mut self, info: &ChangeInfo, value: Option<&str>) -> Result<()> {
    match info.target {
      ChangeTarget::Raw => {
        let field = info.raw_field.as_deref().ok_or_else(|| Error::validation("raw_field missing"))?;
        self.set_raw(field, value)
      }
      ChangeTarget::Attr => {
        let key = info.attr_key.as_deref().ok_or_else(|| Error::validation("attr_key missing"))?;
        let pos = self.atributs.iter().position(|a| a.key == key);
        match (pos, value) {
          (Some(i), None) => {
            self.atributs.remove(i);
          }
          (Some(i), Some(v)) => v.clone_into(&mut self.atributs[i].value),
          (None, Some(v)) => self.atributs.push(TranscripcioAtribut {
            key:   key.to_owned(),
            tipus: info.attr_type.clone().unwrap_or_else(|| "text".to_owned()),
            value: v.to_owned(),
          }),
          (None, None) => {}
        }
        Ok(())
      }
      ChangeTarget::Person => {
        let field =
          info.person_field.as_deref().ok_or_else(|| Error::validation("person_field missing"))?;
        let idx = match self.person_index(info) {
          Some(i) => i,
          None if value.is_none() => return Ok(()),
          None => {
            let key = info
              .person_key
              .clone()
              .unwrap_or_else(|| format!("p{}", self.persones.len() + 1));
            self.persones.push(TranscripcioPersona {
              key,
              role: info.role.clone().unwrap_or_default(),
              ..Default::default()
            });
            self.persones.len() - 1
          }
        };
        *self.persones[idx].slot(field)? = value.map(str::to_owned);
        Ok(())
      }
    }
  }

  /// Every field as a flat list: raw fields, then people in order, then
  /// attributes.
  pub fn flatten(&self) -> Vec<FieldValue> {
    let mut out = Vec::new();
    for (key, label) in RAW_FIELDS {
      out.push(FieldValue {
        key:   format!("raw.{key}"),
        label: (*label).to_owned(),
        value: self.raw_value(key).unwrap_or_default(),
      });
    }
    for p in &self.persones {
      for (field, label) in PERSON_FIELDS {
        out.push(FieldValue {
          key:   format!("person.{}.{field}", p.key),
          label: format!("{} ({}): {label}", p.role, p.key),
          value: p.value(field).unwrap_or_default().to_owned(),
        });
      }
    }
    for a in &self.atributs {
      out.push(FieldValue {
        key:   format!("attr.{}", a.key),
        label: a.key.clone(),
        value: a.value.clone(),
      });
    }
    out
  }
}

// ─── Changes ─────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeTarget {
  Raw,
  Attr,
  Person,
}

/// Addresses the single field a transcription change touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
  pub target:       ChangeTarget,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub raw_field:    Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attr_key:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attr_type:    Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub person_field: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub person_key:   Option<String>,
}

impl ChangeInfo {
  fn empty(target: ChangeTarget) -> Self {
    Self {
      target,
      raw_field: None,
      attr_key: None,
      attr_type: None,
      role: None,
      person_field: None,
      person_key: None,
    }
  }

  pub fn raw(field: &str) -> Self {
    Self { raw_field: Some(field.to_owned()), ..Self::empty(ChangeTarget::Raw) }
  }

  pub fn attr(key: &str, tipus: &str) -> Self {
    Self {
      attr_key: Some(key.to_owned()),
      attr_type: Some(tipus.to_owned()),
      ..Self::empty(ChangeTarget::Attr)
    }
  }

  pub fn person(person_key: &str, role: &str, field: &str) -> Self {
    Self {
      person_key: Some(person_key.to_owned()),
      role: Some(role.to_owned()),
      person_field: Some(field.to_owned()),
      ..Self::empty(ChangeTarget::Person)
    }
  }
}

/// Optional full versions stored alongside a field change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscripcioMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before: Option<TranscripcioSnapshot>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub after:  Option<TranscripcioSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscripcioChange {
  pub id:               TranscripcioChangeId,
  pub transcripcio_id:  TranscripcioId,
  pub change_type:      ChangeType,
  pub info:             ChangeInfo,
  pub old_value:        Option<String>,
  pub new_value:        Option<String>,
  pub metadata:         TranscripcioMetadata,
  pub moderation_state: ModerationState,
  pub changed_by:       UserId,
  pub changed_at:       DateTime<Utc>,
  pub moderated_by:     Option<UserId>,
  pub moderated_at:     Option<DateTime<Utc>>,
}

/// Input to [`crate::store::TranscripcioRepository::save_transcripcio_edit`].
#[derive(Debug, Clone)]
pub struct NewTranscripcioChange {
  pub change_type: ChangeType,
  pub info:        ChangeInfo,
  pub old_value:   Option<String>,
  pub new_value:   Option<String>,
  pub metadata:    TranscripcioMetadata,
  pub changed_by:  UserId,
}

/// A raw transcription row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscripcioRaw {
  pub id:         TranscripcioId,
  pub snapshot:   TranscripcioSnapshot,
  pub moderation: Moderation,
}
