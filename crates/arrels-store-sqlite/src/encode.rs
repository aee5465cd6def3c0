//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Enums are stored as their
//! lowercase `strum` names. Structured documents (wiki metadata, change
//! descriptors) are stored as compact JSON.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;

use arrels_core::{
  FieldKind, Moderation,
  achievement::{Achievement, UserAchievement},
  activity::{PointsRule, UserActivity},
  cognom::{CognomRedirect, CognomRedirectSuggestion},
  policy::Policy,
  transcripcio::{TranscripcioChange, TranscripcioMetadata},
  user::User,
  wiki::{WikiChange, WikiMetadata},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::Discriminant { kind, value: s.to_owned() })
}

// ─── Field values ────────────────────────────────────────────────────────────

/// Convert one snapshot value into the column value for a field of `kind`.
/// `IdList` fields never reach a column.
pub fn json_to_sql(kind: FieldKind, value: Option<&JsonValue>) -> SqlValue {
  match (kind, value) {
    (_, None | Some(JsonValue::Null)) => SqlValue::Null,
    (FieldKind::Int, Some(v)) => v.as_i64().map_or(SqlValue::Null, SqlValue::Integer),
    (FieldKind::Float, Some(v)) => v.as_f64().map_or(SqlValue::Null, SqlValue::Real),
    (_, Some(JsonValue::String(s))) => SqlValue::Text(s.clone()),
    (_, Some(other)) => SqlValue::Text(other.to_string()),
  }
}

pub fn sql_to_json(kind: FieldKind, value: SqlValue) -> JsonValue {
  match (kind, value) {
    (_, SqlValue::Null) => JsonValue::Null,
    (FieldKind::Float, SqlValue::Integer(i)) => serde_json::Number::from_f64(i as f64)
      .map_or(JsonValue::Null, JsonValue::Number),
    (_, SqlValue::Integer(i)) => JsonValue::from(i),
    (_, SqlValue::Real(f)) => {
      serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
    }
    (_, SqlValue::Text(s)) => JsonValue::String(s),
    (_, SqlValue::Blob(_)) => JsonValue::Null,
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// The moderation columns shared by every entity table, in
/// [`MODERATION_COLUMNS`] order.
pub struct RawModeration {
  pub state:        String,
  pub created_by:   Option<i64>,
  pub created_at:   Option<String>,
  pub moderated_by: Option<i64>,
  pub moderated_at: Option<String>,
  pub motiu:        Option<String>,
}

pub const MODERATION_COLUMNS: &str =
  "moderation_state, created_by, created_at, moderated_by, moderated_at, motiu";

impl RawModeration {
  /// Read the moderation columns starting at column `at`.
  pub fn from_row(row: &rusqlite::Row<'_>, at: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      state:        row.get(at)?,
      created_by:   row.get(at + 1)?,
      created_at:   row.get(at + 2)?,
      moderated_by: row.get(at + 3)?,
      moderated_at: row.get(at + 4)?,
      motiu:        row.get(at + 5)?,
    })
  }

  pub fn into_moderation(self) -> Result<Moderation> {
    Ok(Moderation {
      state:        decode_enum("moderation state", &self.state)?,
      created_by:   self.created_by,
      created_at:   decode_opt_dt(self.created_at)?,
      moderated_by: self.moderated_by,
      moderated_at: decode_opt_dt(self.moderated_at)?,
      motiu:        self.motiu,
    })
  }
}

pub struct RawUser {
  pub id:             i64,
  pub login:          String,
  pub nom:            Option<String>,
  pub cognoms:        Option<String>,
  pub email:          Option<String>,
  pub locale:         String,
  pub actiu:          bool,
  pub nom_privat:     bool,
  pub ranking_privat: bool,
  pub created_at:     String,
}

pub const USER_COLUMNS: &str =
  "id, login, nom, cognoms, email, locale, actiu, nom_privat, ranking_privat, created_at";

impl RawUser {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      login:          row.get(1)?,
      nom:            row.get(2)?,
      cognoms:        row.get(3)?,
      email:          row.get(4)?,
      locale:         row.get(5)?,
      actiu:          row.get(6)?,
      nom_privat:     row.get(7)?,
      ranking_privat: row.get(8)?,
      created_at:     row.get(9)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      id:             self.id,
      login:          self.login,
      nom:            self.nom,
      cognoms:        self.cognoms,
      email:          self.email,
      locale:         self.locale,
      actiu:          self.actiu,
      nom_privat:     self.nom_privat,
      ranking_privat: self.ranking_privat,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawPolicy {
  pub id:         i64,
  pub nom:        String,
  pub descripcio: Option<String>,
  pub document:   String,
  pub updated_at: String,
}

pub const POLICY_COLUMNS: &str = "id, nom, descripcio, document, updated_at";

impl RawPolicy {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:         row.get(0)?,
      nom:        row.get(1)?,
      descripcio: row.get(2)?,
      document:   row.get(3)?,
      updated_at: row.get(4)?,
    })
  }

  pub fn into_policy(self) -> Result<Policy> {
    Ok(Policy {
      id:         self.id,
      nom:        self.nom,
      descripcio: self.descripcio,
      document:   self.document,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawWikiChange {
  pub id:               i64,
  pub object_type:      String,
  pub object_id:        i64,
  pub change_type:      String,
  pub field_key:        Option<String>,
  pub old_value:        Option<String>,
  pub new_value:        Option<String>,
  pub metadata:         String,
  pub moderation_state: String,
  pub changed_by:       i64,
  pub changed_at:       String,
  pub moderated_by:     Option<i64>,
  pub moderated_at:     Option<String>,
}

pub const WIKI_CHANGE_COLUMNS: &str = "id, object_type, object_id, change_type, field_key, \
                                       old_value, new_value, metadata, moderation_state, \
                                       changed_by, changed_at, moderated_by, moderated_at";

impl RawWikiChange {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      object_type:      row.get(1)?,
      object_id:        row.get(2)?,
      change_type:      row.get(3)?,
      field_key:        row.get(4)?,
      old_value:        row.get(5)?,
      new_value:        row.get(6)?,
      metadata:         row.get(7)?,
      moderation_state: row.get(8)?,
      changed_by:       row.get(9)?,
      changed_at:       row.get(10)?,
      moderated_by:     row.get(11)?,
      moderated_at:     row.get(12)?,
    })
  }

  pub fn into_change(self) -> Result<WikiChange> {
    Ok(WikiChange {
      id:               self.id,
      object_type:      decode_enum("object type", &self.object_type)?,
      object_id:        self.object_id,
      change_type:      decode_enum("change type", &self.change_type)?,
      field_key:        self.field_key,
      old_value:        self.old_value,
      new_value:        self.new_value,
      metadata:         WikiMetadata::from_json(&self.metadata)?,
      moderation_state: decode_enum("moderation state", &self.moderation_state)?,
      changed_by:       self.changed_by,
      changed_at:       decode_dt(&self.changed_at)?,
      moderated_by:     self.moderated_by,
      moderated_at:     decode_opt_dt(self.moderated_at)?,
    })
  }
}

pub struct RawPointsRule {
  pub id:          i64,
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub points:      i64,
  pub active:      bool,
}

pub const POINTS_RULE_COLUMNS: &str = "id, code, name, description, points, active";

impl RawPointsRule {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      code:        row.get(1)?,
      name:        row.get(2)?,
      description: row.get(3)?,
      points:      row.get(4)?,
      active:      row.get(5)?,
    })
  }

  pub fn into_rule(self) -> PointsRule {
    PointsRule {
      id:          self.id,
      code:        self.code,
      name:        self.name,
      description: self.description,
      points:      self.points,
      active:      self.active,
    }
  }
}

pub struct RawActivity {
  pub id:           i64,
  pub user_id:      i64,
  pub rule_id:      Option<i64>,
  pub rule_code:    Option<String>,
  pub action:       String,
  pub object_type:  String,
  pub object_id:    Option<i64>,
  pub points:       i64,
  pub status:       String,
  pub moderated_by: Option<i64>,
  pub details:      String,
  pub created_at:   String,
}

/// Columns of `user_activity a LEFT JOIN points_rules r`.
pub const ACTIVITY_COLUMNS: &str = "a.id, a.user_id, a.rule_id, r.code, a.action, a.object_type, \
                                    a.object_id, a.points, a.status, a.moderated_by, a.details, \
                                    a.created_at";

impl RawActivity {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      user_id:      row.get(1)?,
      rule_id:      row.get(2)?,
      rule_code:    row.get(3)?,
      action:       row.get(4)?,
      object_type:  row.get(5)?,
      object_id:    row.get(6)?,
      points:       row.get(7)?,
      status:       row.get(8)?,
      moderated_by: row.get(9)?,
      details:      row.get(10)?,
      created_at:   row.get(11)?,
    })
  }

  pub fn into_activity(self) -> Result<UserActivity> {
    Ok(UserActivity {
      id:           self.id,
      user_id:      self.user_id,
      rule_id:      self.rule_id,
      rule_code:    self.rule_code,
      action:       self.action,
      object_type:  self.object_type,
      object_id:    self.object_id,
      points:       self.points,
      status:       decode_enum("activity status", &self.status)?,
      moderated_by: self.moderated_by,
      details:      self.details,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawAchievement {
  pub id:          i64,
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub rarity:      String,
  pub visibility:  String,
  pub domain:      String,
  pub enabled:     bool,
  pub repeatable:  bool,
  pub icon:        Option<String>,
  pub rule_json:   String,
}

pub const ACHIEVEMENT_COLUMNS: &str =
  "id, code, name, description, rarity, visibility, domain, enabled, repeatable, icon, rule_json";

impl RawAchievement {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:          row.get(0)?,
      code:        row.get(1)?,
      name:        row.get(2)?,
      description: row.get(3)?,
      rarity:      row.get(4)?,
      visibility:  row.get(5)?,
      domain:      row.get(6)?,
      enabled:     row.get(7)?,
      repeatable:  row.get(8)?,
      icon:        row.get(9)?,
      rule_json:   row.get(10)?,
    })
  }

  pub fn into_achievement(self) -> Result<Achievement> {
    Ok(Achievement {
      id:          self.id,
      code:        self.code,
      name:        self.name,
      description: self.description,
      rarity:      decode_enum("rarity", &self.rarity)?,
      visibility:  decode_enum("visibility", &self.visibility)?,
      domain:      decode_enum("achievement domain", &self.domain)?,
      enabled:     self.enabled,
      repeatable:  self.repeatable,
      icon:        self.icon,
      rule_json:   self.rule_json,
    })
  }
}

pub struct RawUserAchievement {
  pub user_id:        i64,
  pub achievement_id: i64,
  pub instance:       i64,
  pub awarded_at:     String,
}

impl RawUserAchievement {
  pub fn into_user_achievement(self) -> Result<UserAchievement> {
    Ok(UserAchievement {
      user_id:        self.user_id,
      achievement_id: self.achievement_id,
      instance:       self.instance,
      awarded_at:     decode_dt(&self.awarded_at)?,
    })
  }
}

pub struct RawRedirect {
  pub from_id:    i64,
  pub to_id:      i64,
  pub reason:     Option<String>,
  pub created_by: Option<i64>,
  pub created_at: String,
}

pub const REDIRECT_COLUMNS: &str = "from_id, to_id, reason, created_by, created_at";

impl RawRedirect {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      from_id:    row.get(0)?,
      to_id:      row.get(1)?,
      reason:     row.get(2)?,
      created_by: row.get(3)?,
      created_at: row.get(4)?,
    })
  }

  pub fn into_redirect(self) -> Result<CognomRedirect> {
    Ok(CognomRedirect {
      from_id:    self.from_id,
      to_id:      self.to_id,
      reason:     self.reason,
      created_by: self.created_by,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawSuggestion {
  pub id:           i64,
  pub from_id:      i64,
  pub to_id:        i64,
  pub reason:       Option<String>,
  pub state:        String,
  pub created_by:   i64,
  pub created_at:   String,
  pub moderated_by: Option<i64>,
  pub moderated_at: Option<String>,
}

pub const SUGGESTION_COLUMNS: &str = "id, from_id, to_id, reason, moderation_state, created_by, \
                                      created_at, moderated_by, moderated_at";

impl RawSuggestion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      from_id:      row.get(1)?,
      to_id:        row.get(2)?,
      reason:       row.get(3)?,
      state:        row.get(4)?,
      created_by:   row.get(5)?,
      created_at:   row.get(6)?,
      moderated_by: row.get(7)?,
      moderated_at: row.get(8)?,
    })
  }

  pub fn into_suggestion(self) -> Result<CognomRedirectSuggestion> {
    Ok(CognomRedirectSuggestion {
      id:           self.id,
      from_id:      self.from_id,
      to_id:        self.to_id,
      reason:       self.reason,
      state:        decode_enum("suggestion state", &self.state)?,
      created_by:   self.created_by,
      created_at:   decode_dt(&self.created_at)?,
      moderated_by: self.moderated_by,
      moderated_at: decode_opt_dt(self.moderated_at)?,
    })
  }
}

pub struct RawTranscripcioChange {
  pub id:               i64,
  pub transcripcio_id:  i64,
  pub change_type:      String,
  pub change_info:      String,
  pub old_value:        Option<String>,
  pub new_value:        Option<String>,
  pub metadata:         String,
  pub moderation_state: String,
  pub changed_by:       i64,
  pub changed_at:       String,
  pub moderated_by:     Option<i64>,
  pub moderated_at:     Option<String>,
}

pub const TRANSCRIPCIO_CHANGE_COLUMNS: &str = "id, transcripcio_id, change_type, change_info, \
                                               old_value, new_value, metadata, moderation_state, \
                                               changed_by, changed_at, moderated_by, moderated_at";

impl RawTranscripcioChange {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:               row.get(0)?,
      transcripcio_id:  row.get(1)?,
      change_type:      row.get(2)?,
      change_info:      row.get(3)?,
      old_value:        row.get(4)?,
      new_value:        row.get(5)?,
      metadata:         row.get(6)?,
      moderation_state: row.get(7)?,
      changed_by:       row.get(8)?,
      changed_at:       row.get(9)?,
      moderated_by:     row.get(10)?,
      moderated_at:     row.get(11)?,
    })
  }

  pub fn into_change(self) -> Result<TranscripcioChange> {
    let metadata: TranscripcioMetadata = serde_json::from_str(&self.metadata)?;
    Ok(TranscripcioChange {
      id: self.id,
      transcripcio_id: self.transcripcio_id,
      change_type: decode_enum("change type", &self.change_type)?,
      info: serde_json::from_str(&self.change_info)?,
      old_value: self.old_value,
      new_value: self.new_value,
      metadata,
      moderation_state: decode_enum("moderation state", &self.moderation_state)?,
      changed_by: self.changed_by,
      changed_at: decode_dt(&self.changed_at)?,
      moderated_by: self.moderated_by,
      moderated_at: decode_opt_dt(self.moderated_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn field_values_survive_columns() {
    let cases = [
      (FieldKind::Text, JsonValue::from("Puig")),
      (FieldKind::Int, JsonValue::from(1820)),
      (FieldKind::Float, JsonValue::from(41.5)),
      (FieldKind::Text, JsonValue::Null),
    ];
    for (kind, value) in cases {
      assert_eq!(sql_to_json(kind, json_to_sql(kind, Some(&value))), value);
    }
  }

  #[test]
  fn integer_column_read_as_float() {
    assert_eq!(sql_to_json(FieldKind::Float, SqlValue::Integer(2)), JsonValue::from(2.0));
  }

  #[test]
  fn unknown_discriminant_is_an_error() {
    let r: Result<arrels_core::ModerationState> = decode_enum("moderation state", "draft");
    assert!(matches!(r, Err(Error::Discriminant { .. })));
  }
}
