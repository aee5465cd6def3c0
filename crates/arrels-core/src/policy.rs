//! Policies, permission documents and territorial scopes.
//!
//! A policy carries a JSON permission document mapping permission keys to an
//! effect:
//!
//! ```json
//! {
//!   "documentals.arxius.edit": "allow-scoped",
//!   "documentals.arxius.view": "allow",
//!   "persones.edit": { "effect": "allow-scoped", "targets": { "pais_id": [1] } },
//!   "admin.*": "deny",
//!   "targets": { "municipi_id": [42] }
//! }
//! ```
//!
//! The reserved top-level `targets` object is the default target set of every
//! `allow-scoped` entry that does not carry its own.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, Result, user::{GroupId, UserId}};

pub type PolicyId = i64;

/// Well-known permission keys.
pub mod keys {
  pub const TERRITORI_PAISOS_EDIT: &str = "territori.paisos.edit";
  pub const TERRITORI_NIVELLS_EDIT: &str = "territori.nivells.edit";
  pub const TERRITORI_MUNICIPIS_VIEW: &str = "territori.municipis.view";
  pub const TERRITORI_MUNICIPIS_EDIT: &str = "territori.municipis.edit";
  pub const ECLESIA_ENTITATS_EDIT: &str = "eclesia.entitats.edit";
  pub const ARXIUS_VIEW: &str = "documentals.arxius.view";
  pub const ARXIUS_EDIT: &str = "documentals.arxius.edit";
  pub const LLIBRES_VIEW: &str = "documentals.llibres.view";
  pub const LLIBRES_EDIT: &str = "documentals.llibres.edit";
  pub const TRANSCRIPCIONS_EDIT: &str = "documentals.transcripcions.edit";
  pub const PERSONES_EDIT: &str = "persones.edit";
  pub const COGNOMS_EDIT: &str = "cognoms.edit";
  pub const COGNOMS_MERGE: &str = "cognoms.merge";
  pub const EVENTS_EDIT: &str = "events.edit";
  pub const MODERACIO: &str = "moderacio.moderate";
  pub const ADMIN_POLITIQUES: &str = "admin.politiques";
  pub const ADMIN_ACHIEVEMENTS: &str = "admin.achievements";
  pub const ADMIN_PUNTS: &str = "admin.punts";
  pub const ADMIN_USERS: &str = "admin.users";
}

// ─── Policies ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
  pub id:         PolicyId,
  pub nom:        String,
  pub descripcio: Option<String>,
  /// Raw JSON permission document; parsed by [`PolicyDocument::parse`].
  pub document:   String,
  pub updated_at: DateTime<Utc>,
}

/// Input to [`crate::store::PolicyRepository::save_policy`]. `id: None`
/// creates a policy; `Some` overwrites it.
#[derive(Debug, Clone)]
pub struct NewPolicy {
  pub id:         Option<PolicyId>,
  pub nom:        String,
  pub descripcio: Option<String>,
  pub document:   String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyAssignment {
  pub policy_id: PolicyId,
  pub user_id:   Option<UserId>,
  pub group_id:  Option<GroupId>,
}

// ─── Targets ─────────────────────────────────────────────────────────────────

/// The territorial anchors a scoped permission applies to. Provinces and
/// comarques are administrative-level ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTargets {
  #[serde(default, alias = "arxiu_id", alias = "arxius", deserialize_with = "one_or_many")]
  pub arxiu_ids:     BTreeSet<i64>,
  #[serde(default, alias = "municipi_id", alias = "municipis", deserialize_with = "one_or_many")]
  pub municipi_ids:  BTreeSet<i64>,
  #[serde(default, alias = "provincia_id", alias = "provincies", deserialize_with = "one_or_many")]
  pub provincia_ids: BTreeSet<i64>,
  #[serde(default, alias = "comarca_id", alias = "comarques", deserialize_with = "one_or_many")]
  pub comarca_ids:   BTreeSet<i64>,
  #[serde(default, alias = "pais_id", alias = "paisos", deserialize_with = "one_or_many")]
  pub pais_ids:      BTreeSet<i64>,
  #[serde(
    default,
    alias = "ecles_id",
    alias = "arquebisbat_id",
    alias = "entitat_eclesiastica_id",
    deserialize_with = "one_or_many"
  )]
  pub ecles_ids:     BTreeSet<i64>,
}

impl ScopeTargets {
  pub fn is_empty(&self) -> bool {
    self.arxiu_ids.is_empty()
      && self.municipi_ids.is_empty()
      && self.provincia_ids.is_empty()
      && self.comarca_ids.is_empty()
      && self.pais_ids.is_empty()
      && self.ecles_ids.is_empty()
  }
}

fn one_or_many<'de, D>(de: D) -> std::result::Result<BTreeSet<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(i64),
    Many(Vec<i64>),
  }
  Ok(match OneOrMany::deserialize(de)? {
    OneOrMany::One(id) => BTreeSet::from([id]),
    OneOrMany::Many(ids) => ids.into_iter().collect(),
  })
}

// ─── Permission document ─────────────────────────────────────────────────────

/// The effect a policy assigns to one permission key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
  Deny,
  AllowGlobal,
  AllowScoped(ScopeTargets),
}

/// A parsed permission document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
  entries: BTreeMap<String, Permission>,
}

impl PolicyDocument {
  pub fn parse(json: &str) -> Result<Self> {
    let value: Value = serde_json::from_str(json)
      .map_err(|e| Error::InvalidPolicy(format!("not JSON: {e}")))?;
    let Value::Object(mut map) = value else {
      return Err(Error::InvalidPolicy("document must be a JSON object".into()));
    };

    let default_targets = match map.remove("targets") {
      Some(v) => Some(parse_targets(v)?),
      None => None,
    };

    let mut entries = BTreeMap::new();
    for (key, value) in map {
      if !is_valid_key(&key) {
        return Err(Error::InvalidPolicy(format!("invalid permission key: {key:?}")));
      }
      let permission = match value {
        Value::Bool(true) => Permission::AllowGlobal,
        Value::Bool(false) => Permission::Deny,
        Value::String(effect) => parse_effect(&key, &effect, None, default_targets.as_ref())?,
        Value::Object(mut obj) => {
          let effect = match obj.remove("effect") {
            Some(Value::String(s)) => s,
            _ => return Err(Error::InvalidPolicy(format!("{key}: missing effect"))),
          };
          let own = obj.remove("targets").map(parse_targets).transpose()?;
          parse_effect(&key, &effect, own, default_targets.as_ref())?
        }
        other => {
          return Err(Error::InvalidPolicy(format!("{key}: unsupported value {other}")));
        }
      };
      entries.insert(key, permission);
    }
    Ok(Self { entries })
  }

  /// All entries that apply to `key`: the exact key, then every wildcard
  /// prefix (`a.b.*`, `a.*`, `*`).
  pub fn lookup<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a Permission> + 'a {
    let mut candidates = vec![key.to_owned()];
    let mut rest = key;
    while let Some((head, _)) = rest.rsplit_once('.') {
      candidates.push(format!("{head}.*"));
      rest = head;
    }
    candidates.push("*".to_owned());
    candidates.into_iter().filter_map(move |k| self.entries.get(&k))
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

fn parse_targets(value: Value) -> Result<ScopeTargets> {
  serde_json::from_value(value).map_err(|e| Error::InvalidPolicy(format!("targets: {e}")))
}

fn parse_effect(
  key: &str,
  effect: &str,
  own: Option<ScopeTargets>,
  default: Option<&ScopeTargets>,
) -> Result<Permission> {
  match effect {
    "allow" | "allow-global" | "allow_global" | "global" => Ok(Permission::AllowGlobal),
    "deny" => Ok(Permission::Deny),
    "allow-scoped" | "allow_scoped" | "scoped" => {
      let targets = own.or_else(|| default.cloned()).unwrap_or_default();
      if targets.is_empty() {
        return Err(Error::InvalidPolicy(format!("{key}: allow-scoped without targets")));
      }
      Ok(Permission::AllowScoped(targets))
    }
    other => Err(Error::InvalidPolicy(format!("{key}: unknown effect {other:?}"))),
  }
}

fn is_valid_key(key: &str) -> bool {
  !key.is_empty()
    && key
      .bytes()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b'*'))
}

// ─── Request target and list masks ───────────────────────────────────────────

/// The concrete anchor of a request, computed from the URL-addressed object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTarget {
  pub arxiu_id:       Option<i64>,
  pub llibre_id:      Option<i64>,
  pub municipi_id:    Option<i64>,
  pub pais_id:        Option<i64>,
  pub eclesiastic_id: Option<i64>,
}

impl PermissionTarget {
  /// No anchor: only global grants match.
  pub fn global() -> Self { Self::default() }

  pub fn arxiu(id: i64) -> Self { Self { arxiu_id: Some(id), ..Self::default() } }

  pub fn llibre(id: i64) -> Self { Self { llibre_id: Some(id), ..Self::default() } }

  pub fn municipi(id: i64) -> Self { Self { municipi_id: Some(id), ..Self::default() } }

  pub fn pais(id: i64) -> Self { Self { pais_id: Some(id), ..Self::default() } }

  pub fn eclesiastic(id: i64) -> Self { Self { eclesiastic_id: Some(id), ..Self::default() } }

  pub fn is_global(&self) -> bool { *self == Self::default() }
}

/// Union of every scope a user holds for one permission key, used to filter
/// list queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeMask {
  pub has_global:    bool,
  pub arxiu_ids:     BTreeSet<i64>,
  pub municipi_ids:  BTreeSet<i64>,
  pub provincia_ids: BTreeSet<i64>,
  pub comarca_ids:   BTreeSet<i64>,
  pub pais_ids:      BTreeSet<i64>,
  pub ecles_ids:     BTreeSet<i64>,
}

impl ScopeMask {
  pub fn global() -> Self { Self { has_global: true, ..Self::default() } }

  /// No global grant and no scope: the list is empty without asking the
  /// database.
  pub fn is_empty(&self) -> bool {
    !self.has_global
      && self.arxiu_ids.is_empty()
      && self.municipi_ids.is_empty()
      && self.provincia_ids.is_empty()
      && self.comarca_ids.is_empty()
      && self.pais_ids.is_empty()
      && self.ecles_ids.is_empty()
  }

  pub fn add(&mut self, targets: &ScopeTargets) {
    self.arxiu_ids.extend(&targets.arxiu_ids);
    self.municipi_ids.extend(&targets.municipi_ids);
    self.provincia_ids.extend(&targets.provincia_ids);
    self.comarca_ids.extend(&targets.comarca_ids);
    self.pais_ids.extend(&targets.pais_ids);
    self.ecles_ids.extend(&targets.ecles_ids);
  }

  /// Province and comarca ids together: both are administrative levels.
  pub fn nivell_ids(&self) -> BTreeSet<i64> {
    self.provincia_ids.union(&self.comarca_ids).copied().collect()
  }
}

/// Coarse capabilities used to decide which menus and actions to offer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
  pub admin:               bool,
  pub moderate:            bool,
  pub manage_territory:    bool,
  pub manage_eclesia:      bool,
  pub manage_archives:     bool,
  pub manage_books:        bool,
  pub edit_persons:        bool,
  pub edit_surnames:       bool,
  pub merge_surnames:      bool,
  pub manage_policies:     bool,
  pub manage_achievements: bool,
  pub manage_points:       bool,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn top_level_targets_feed_scoped_entries() {
    let doc = PolicyDocument::parse(
      r#"{"documentals.arxius.edit": "allow-scoped", "targets": {"municipi_id": [42]}}"#,
    )
    .unwrap();
    let got: Vec<_> = doc.lookup("documentals.arxius.edit").collect();
    let Permission::AllowScoped(t) = got[0] else { panic!("expected scoped: {got:?}") };
    assert_eq!(t.municipi_ids, BTreeSet::from([42]));
  }

  #[test]
  fn own_targets_and_single_ids() {
    let doc = PolicyDocument::parse(
      r#"{"persones.edit": {"effect": "allow-scoped", "targets": {"pais_id": 3}}}"#,
    )
    .unwrap();
    let got: Vec<_> = doc.lookup("persones.edit").collect();
    assert_eq!(
      got,
      vec![&Permission::AllowScoped(ScopeTargets {
        pais_ids: BTreeSet::from([3]),
        ..Default::default()
      })]
    );
  }

  #[test]
  fn wildcards_are_looked_up() {
    let doc = PolicyDocument::parse(r#"{"documentals.*": "allow", "admin.politiques": "deny"}"#)
      .unwrap();
    assert_eq!(doc.lookup("documentals.llibres.edit").count(), 1);
    assert_eq!(doc.lookup("admin.politiques").next(), Some(&Permission::Deny));
    assert_eq!(doc.lookup("persones.edit").count(), 0);
  }

  #[test]
  fn malformed_documents_are_rejected() {
    assert!(PolicyDocument::parse("[1,2]").is_err());
    assert!(PolicyDocument::parse(r#"{"x.y": "maybe"}"#).is_err());
    assert!(PolicyDocument::parse(r#"{"x.y": "allow-scoped"}"#).is_err());
    assert!(PolicyDocument::parse(r#"{"X Y": "allow"}"#).is_err());
  }

  #[test]
  fn empty_mask_means_no_access() {
    let mut mask = ScopeMask::default();
    assert!(mask.is_empty());
    mask.add(&ScopeTargets { comarca_ids: BTreeSet::from([9]), ..Default::default() });
    assert!(!mask.is_empty());
    assert_eq!(mask.nivell_ids(), BTreeSet::from([9]));
    assert!(!ScopeMask::global().is_empty());
  }
}
