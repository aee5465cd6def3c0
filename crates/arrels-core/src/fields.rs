//! Field tables and snapshots for contributed entities.
//!
//! Every entity kind has a typed field struct (e.g.
//! [`PersonaFields`](crate::persona::PersonaFields)) and a static table of
//! [`FieldSpec`]s naming the same keys in display order. Storage backends read
//! and write entities as [`Snapshot`]s keyed by that table, and the wiki
//! pipeline stores the very same snapshots as `before`/`after` documents, so a
//! live row and a proposal always share one canonical shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
  Error, Result,
  cognom::{COGNOM_FIELDS, CognomFields},
  documental::{ARXIU_FIELDS, ArxiuFields, LLIBRE_FIELDS, LlibreFields},
  event::{EVENT_FIELDS, EventHistoricFields},
  moderation::Moderation,
  persona::{PERSONA_FIELDS, PersonaFields},
  territory::{
    ARQUEBISBAT_FIELDS, ArquebisbatFields, MUNICIPI_FIELDS, MunicipiFields,
    NIVELL_FIELDS, NivellFields, PAIS_FIELDS, PaisFields,
  },
  wiki::ObjectType,
};

// ─── Field tables ────────────────────────────────────────────────────────────

/// Storage and parsing type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  Text,
  Int,
  Float,
  /// A list of foreign ids; stored in a link table.
  IdList,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
  pub key:      &'static str,
  /// Canonical label used to pair fields when comparing versions.
  pub label:    &'static str,
  pub kind:     FieldKind,
  pub required: bool,
}

impl FieldSpec {
  pub const fn required(key: &'static str, label: &'static str, kind: FieldKind) -> Self {
    Self { key, label, kind, required: true }
  }

  pub const fn optional(key: &'static str, label: &'static str, kind: FieldKind) -> Self {
    Self { key, label, kind, required: false }
  }
}

// ─── Entity kinds ────────────────────────────────────────────────────────────

/// Every kind of contributed entity that carries a moderation state.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
  EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Pais,
  Nivell,
  Municipi,
  Arquebisbat,
  Arxiu,
  Llibre,
  Persona,
  Cognom,
  EventHistoric,
}

impl EntityKind {
  pub fn fields(self) -> &'static [FieldSpec] {
    match self {
      Self::Pais => PAIS_FIELDS,
      Self::Nivell => NIVELL_FIELDS,
      Self::Municipi => MUNICIPI_FIELDS,
      Self::Arquebisbat => ARQUEBISBAT_FIELDS,
      Self::Arxiu => ARXIU_FIELDS,
      Self::Llibre => LLIBRE_FIELDS,
      Self::Persona => PERSONA_FIELDS,
      Self::Cognom => COGNOM_FIELDS,
      Self::EventHistoric => EVENT_FIELDS,
    }
  }

  pub fn field(self, key: &str) -> Option<&'static FieldSpec> {
    self.fields().iter().find(|f| f.key == key)
  }

  /// The wiki object type, if edits to this kind go through the wiki.
  pub fn object_type(self) -> Option<ObjectType> { ObjectType::from_kind(self) }

  /// Decode `snapshot` into this kind's field struct and run its checks.
  pub fn validate_snapshot(self, snapshot: &Snapshot) -> Result<()> {
    for spec in self.fields() {
      if spec.required && snapshot.display(spec.key).trim().is_empty() {
        return Err(Error::Validation(format!("{} is required", spec.key)));
      }
    }
    match self {
      Self::Pais => snapshot.to_fields::<PaisFields>()?.validate(),
      Self::Nivell => snapshot.to_fields::<NivellFields>()?.validate(),
      Self::Municipi => snapshot.to_fields::<MunicipiFields>()?.validate(),
      Self::Arquebisbat => snapshot.to_fields::<ArquebisbatFields>()?.validate(),
      Self::Arxiu => snapshot.to_fields::<ArxiuFields>()?.validate(),
      Self::Llibre => snapshot.to_fields::<LlibreFields>()?.validate(),
      Self::Persona => snapshot.to_fields::<PersonaFields>()?.validate(),
      Self::Cognom => snapshot.to_fields::<CognomFields>()?.validate(),
      Self::EventHistoric => snapshot.to_fields::<EventHistoricFields>()?.validate(),
    }
  }
}

/// A typed field struct for one [`EntityKind`].
pub trait EntityFields: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
  const KIND: EntityKind;

  /// Short human-readable title (name, form, book title).
  fn title(&self) -> &str;

  fn validate(&self) -> Result<()> { Ok(()) }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// A map-of-fields view of one entity version.
///
/// Keys are sorted (`serde_json::Map` is a `BTreeMap`), so serialising a
/// snapshot is canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(pub Map<String, Value>);

impl Snapshot {
  pub fn from_fields<F: Serialize>(fields: &F) -> Result<Self> {
    match serde_json::to_value(fields)? {
      Value::Object(map) => Ok(Self(map)),
      other => Err(Error::InvalidSnapshot(format!("expected an object, got {other}"))),
    }
  }

  pub fn to_fields<F: DeserializeOwned>(&self) -> Result<F> {
    serde_json::from_value(Value::Object(self.0.clone()))
      .map_err(|e| Error::Validation(e.to_string()))
  }

  pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

  pub fn set(&mut self, key: &str, value: Value) { self.0.insert(key.to_owned(), value); }

  /// Canonical string form of a field: `null` and missing become `""`,
  /// lists are joined with `", "`.
  pub fn display(&self, key: &str) -> String {
    match self.0.get(key) {
      None | Some(Value::Null) => String::new(),
      Some(Value::String(s)) => s.clone(),
      Some(Value::Array(items)) => items
        .iter()
        .map(|v| match v {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", "),
      Some(other) => other.to_string(),
    }
  }

  /// Keep only the keys of `kind`'s field table, filling absent ones with
  /// their empty value.
  pub fn canonical(&self, kind: EntityKind) -> Snapshot {
    let mut out = Map::new();
    for spec in kind.fields() {
      let value = self.0.get(spec.key).cloned().unwrap_or_else(|| empty_value(spec.kind));
      out.insert(spec.key.to_owned(), value);
    }
    Snapshot(out)
  }

  /// Overlay raw form values onto this snapshot, parsing each according to
  /// its [`FieldKind`]. Keys absent from the field table are ignored.
  pub fn overlay_form(&mut self, kind: EntityKind, form: &HashMap<String, String>) -> Result<()> {
    for spec in kind.fields() {
      if let Some(raw) = form.get(spec.key) {
        let value = parse_form_value(spec, raw)?;
        self.0.insert(spec.key.to_owned(), value);
      }
    }
    Ok(())
  }

  /// Byte length of the canonical JSON encoding.
  pub fn encoded_len(&self) -> Result<usize> { Ok(serde_json::to_vec(&self.0)?.len()) }
}

fn empty_value(kind: FieldKind) -> Value {
  match kind {
    FieldKind::IdList => Value::Array(vec![]),
    _ => Value::Null,
  }
}

/// Parse one raw form value. Blank input is the field's empty value.
pub fn parse_form_value(spec: &FieldSpec, raw: &str) -> Result<Value> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Ok(empty_value(spec.kind));
  }
  match spec.kind {
    FieldKind::Text => Ok(Value::String(raw.to_owned())),
    FieldKind::Int => raw
      .parse::<i64>()
      .map(Value::from)
      .map_err(|_| Error::Validation(format!("{}: not an integer: {raw:?}", spec.key))),
    FieldKind::Float => raw
      .replace(',', ".")
      .parse::<f64>()
      .ok()
      .and_then(serde_json::Number::from_f64)
      .map(Value::Number)
      .ok_or_else(|| Error::Validation(format!("{}: not a number: {raw:?}", spec.key))),
    FieldKind::IdList => Ok(Value::Array(
      parse_id_list(raw).into_iter().map(Value::from).collect(),
    )),
  }
}

/// Split free-form text on commas, semicolons, and whitespace into positive
/// ids. Non-positive, unparsable and duplicate ids are discarded; order is
/// preserved.
pub fn parse_id_list(text: &str) -> Vec<i64> {
  let mut out: Vec<i64> = Vec::new();
  for token in text.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
    let Ok(id) = token.trim().parse::<i64>() else { continue };
    if id > 0 && !out.contains(&id) {
      out.push(id);
    }
  }
  out
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// A typed entity row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity<F> {
  pub id:         i64,
  pub fields:     F,
  pub moderation: Moderation,
}

/// An entity row as the repository returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntity {
  pub kind:       EntityKind,
  pub id:         i64,
  pub snapshot:   Snapshot,
  pub moderation: Moderation,
}

impl StoredEntity {
  pub fn decode<F: EntityFields>(self) -> Result<Entity<F>> {
    if self.kind != F::KIND {
      return Err(Error::InvalidSnapshot(format!(
        "expected a {} row, got {}",
        F::KIND,
        self.kind
      )));
    }
    Ok(Entity { id: self.id, fields: self.snapshot.to_fields()?, moderation: self.moderation })
  }
}
