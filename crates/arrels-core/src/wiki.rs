//! Wiki changes, marks and version comparison types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
  Error, Result, UserId,
  fields::{EntityKind, Snapshot},
  moderation::ModerationState,
};

pub type ChangeId = i64;

// ─── Object types ────────────────────────────────────────────────────────────

/// The whitelist of entity kinds whose published rows are edited through
/// wiki proposals.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
  EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObjectType {
  Municipi,
  Arxiu,
  Llibre,
  Persona,
  Cognom,
  EventHistoric,
}

impl ObjectType {
  pub const ALL: [Self; 6] =
    [Self::Municipi, Self::Arxiu, Self::Llibre, Self::Persona, Self::Cognom, Self::EventHistoric];

  pub fn entity_kind(self) -> EntityKind {
    match self {
      Self::Municipi => EntityKind::Municipi,
      Self::Arxiu => EntityKind::Arxiu,
      Self::Llibre => EntityKind::Llibre,
      Self::Persona => EntityKind::Persona,
      Self::Cognom => EntityKind::Cognom,
      Self::EventHistoric => EntityKind::EventHistoric,
    }
  }

  pub fn from_kind(kind: EntityKind) -> Option<Self> {
    match kind {
      EntityKind::Municipi => Some(Self::Municipi),
      EntityKind::Arxiu => Some(Self::Arxiu),
      EntityKind::Llibre => Some(Self::Llibre),
      EntityKind::Persona => Some(Self::Persona),
      EntityKind::Cognom => Some(Self::Cognom),
      EntityKind::EventHistoric => Some(Self::EventHistoric),
      EntityKind::Pais | EntityKind::Nivell | EntityKind::Arquebisbat => None,
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeType {
  /// A whole-form edit with before/after snapshots.
  Form,
  /// A proposal restoring an earlier change's `after`.
  Revert,
  /// A single-field edit.
  Field,
}

// ─── Changes ─────────────────────────────────────────────────────────────────

/// The metadata document of a change. Serialised as canonical JSON; its byte
/// length is what the size guardrail measures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WikiMetadata {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub before:           Option<Snapshot>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub after:            Option<Snapshot>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason:           Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_change_id: Option<ChangeId>,
}

impl WikiMetadata {
  pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string(self)?) }

  pub fn from_json(s: &str) -> Result<Self> {
    serde_json::from_str(s).map_err(|e| Error::InvalidSnapshot(format!("wiki metadata: {e}")))
  }
}

/// An immutable proposal against one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiChange {
  pub id:               ChangeId,
  pub object_type:      ObjectType,
  pub object_id:        i64,
  pub change_type:      ChangeType,
  pub field_key:        Option<String>,
  pub old_value:        Option<String>,
  pub new_value:        Option<String>,
  pub metadata:         WikiMetadata,
  pub moderation_state: ModerationState,
  pub changed_by:       UserId,
  pub changed_at:       DateTime<Utc>,
  pub moderated_by:     Option<UserId>,
  pub moderated_at:     Option<DateTime<Utc>>,
}

impl WikiChange {
  /// The snapshot this change represents: `after`, falling back to `before`.
  pub fn version_snapshot(&self) -> Option<&Snapshot> {
    self.metadata.after.as_ref().or(self.metadata.before.as_ref())
  }
}

/// Limits on pending changes, checked in the same transaction that stores a
/// new change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCaps {
  /// Pending changes on one object, across authors.
  pub per_object: i64,
  /// Pending changes by one author on one object.
  pub per_author: i64,
}

/// The cap that refused a new change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCap {
  Object,
  Author,
}

/// Input to [`crate::store::WikiRepository::create_wiki_change`].
#[derive(Debug, Clone)]
pub struct NewWikiChange {
  pub object_type:   ObjectType,
  pub object_id:     i64,
  pub change_type:   ChangeType,
  pub field_key:     Option<String>,
  pub old_value:     Option<String>,
  pub new_value:     Option<String>,
  /// Already-encoded [`WikiMetadata`].
  pub metadata_json: String,
  pub changed_by:    UserId,
}

// ─── Versions and diffs ──────────────────────────────────────────────────────

/// Addresses one version of an object: the live row or a change's snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionToken {
  Current,
  Change(ChangeId),
}

impl FromStr for VersionToken {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "" | "current" | "published" => Ok(Self::Current),
      other => other
        .parse::<ChangeId>()
        .ok()
        .filter(|id| *id > 0)
        .map(Self::Change)
        .ok_or_else(|| Error::validation(format!("invalid version token: {other:?}"))),
    }
  }
}

/// One field of a flattened version, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
  pub key:   String,
  pub label: String,
  pub value: String,
}

impl Snapshot {
  /// Flatten along `kind`'s field table.
  pub fn flatten(&self, kind: EntityKind) -> Vec<FieldValue> {
    kind
      .fields()
      .iter()
      .map(|spec| FieldValue {
        key:   spec.key.to_owned(),
        label: spec.label.to_owned(),
        value: self.display(spec.key),
      })
      .collect()
  }
}

/// One row of a version comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRow {
  pub key:     String,
  pub label:   String,
  pub before:  String,
  pub after:   String,
  pub changed: bool,
}

// ─── Marks ───────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
  EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MarkType {
  /// Blood relative.
  Consanguini,
  /// Relative by marriage.
  Politic,
  Interes,
}

/// At most one per `(object_type, object_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiMark {
  pub object_type: ObjectType,
  pub object_id:   i64,
  pub user_id:     UserId,
  pub tipus:       MarkType,
  pub is_public:   bool,
}

/// A change to one public counter, applied with the mark that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkDelta {
  pub tipus: MarkType,
  pub delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicCount {
  pub tipus: MarkType,
  pub n:     i64,
}

/// Counter changes for replacing `old` with `new`. Non-public marks count
/// for nothing; deltas cancelling out are dropped.
pub fn mark_deltas(old: Option<&WikiMark>, new: Option<&WikiMark>) -> Vec<MarkDelta> {
  let public = |m: Option<&WikiMark>| m.filter(|m| m.is_public).map(|m| m.tipus);
  match (public(old), public(new)) {
    (Some(a), Some(b)) if a == b => Vec::new(),
    (a, b) => {
      let mut deltas = Vec::new();
      deltas.extend(a.map(|tipus| MarkDelta { tipus, delta: -1 }));
      deltas.extend(b.map(|tipus| MarkDelta { tipus, delta: 1 }));
      deltas
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn version_tokens() {
    assert_eq!("current".parse::<VersionToken>().unwrap(), VersionToken::Current);
    assert_eq!("published".parse::<VersionToken>().unwrap(), VersionToken::Current);
    assert_eq!("17".parse::<VersionToken>().unwrap(), VersionToken::Change(17));
    assert!("-1".parse::<VersionToken>().is_err());
    assert!("latest".parse::<VersionToken>().is_err());
  }

  #[test]
  fn metadata_roundtrip_is_stable() {
    let before: Snapshot = serde_json::from_str(r#"{"nom":"Joan","cognom1":"Puig"}"#).unwrap();
    let after: Snapshot =
      serde_json::from_str(r#"{"cognom1":"Puig i Serra","nom":"Joan"}"#).unwrap();
    let meta = WikiMetadata { before: Some(before), after: Some(after), ..Default::default() };
    let json = meta.to_json().unwrap();
    let back = WikiMetadata::from_json(&json).unwrap();
    assert_eq!(back, meta);
    assert_eq!(back.to_json().unwrap(), json);
  }

  fn wm(tipus: MarkType, is_public: bool) -> WikiMark {
    WikiMark { object_type: ObjectType::Persona, object_id: 1, user_id: 1, tipus, is_public }
  }

  #[test]
  fn mark_deltas_skip_no_ops() {
    let public = wm(MarkType::Interes, true);
    assert!(mark_deltas(Some(&public), Some(&public)).is_empty());
    assert!(mark_deltas(None, Some(&wm(MarkType::Politic, false))).is_empty());
    assert_eq!(mark_deltas(None, Some(&public)), vec![MarkDelta { tipus: MarkType::Interes, delta: 1 }]);
    assert_eq!(
      mark_deltas(Some(&public), Some(&wm(MarkType::Consanguini, true))),
      vec![
        MarkDelta { tipus: MarkType::Interes, delta: -1 },
        MarkDelta { tipus: MarkType::Consanguini, delta: 1 },
      ]
    );
    assert_eq!(mark_deltas(Some(&public), None), vec![MarkDelta { tipus: MarkType::Interes, delta: -1 }]);
  }

  #[test]
  fn unknown_object_type_is_rejected() {
    assert!("pais".parse::<ObjectType>().is_err());
    assert_eq!("event_historic".parse::<ObjectType>().unwrap(), ObjectType::EventHistoric);
  }
}
