//! [`EntityRepository`] for [`SqliteStore`].
//!
//! Each [`EntityKind`] has its own table whose columns are the kind's field
//! table minus the `IdList` fields, which live in link tables. Rows are read
//! and written as [`Snapshot`]s, so the SQL here is generated from the field
//! tables instead of being written per kind.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{OptionalExtension as _, types::Value as SqlValue};
use serde_json::{Map, Value as JsonValue};

use arrels_core::{
  EntityKind, FieldKind, FieldSpec, Snapshot, StoredEntity, UserId,
  moderation::{ModerationState, ModerationUpdate},
  policy::ScopeMask,
  store::{EntityFilter, EntityRepository},
  wiki::ObjectType,
};

use crate::{
  Result, SqliteStore,
  encode::{MODERATION_COLUMNS, RawModeration, encode_dt, json_to_sql, sql_to_json},
};

// ─── Table mapping ───────────────────────────────────────────────────────────

pub(crate) fn table(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Pais => "paisos",
    EntityKind::Nivell => "nivells",
    EntityKind::Municipi => "municipis",
    EntityKind::Arquebisbat => "arquebisbats",
    EntityKind::Arxiu => "arxius",
    EntityKind::Llibre => "llibres",
    EntityKind::Persona => "persones",
    EntityKind::Cognom => "cognoms",
    EntityKind::EventHistoric => "events_historics",
  }
}

fn title_column(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Llibre | EntityKind::EventHistoric => "titol",
    EntityKind::Cognom => "forma",
    _ => "nom",
  }
}

/// `(link table, owner column, item column)` of an `IdList` field.
fn link(kind: EntityKind, key: &str) -> Option<(&'static str, &'static str, &'static str)> {
  match (kind, key) {
    (EntityKind::Municipi, "nivells") => Some(("municipi_nivells", "municipi_id", "nivell_id")),
    (EntityKind::Llibre, "arxius") => Some(("llibre_arxius", "llibre_id", "arxiu_id")),
    _ => None,
  }
}

fn columns(kind: EntityKind) -> impl Iterator<Item = &'static FieldSpec> {
  kind.fields().iter().filter(|f| f.kind != FieldKind::IdList)
}

fn id_lists(kind: EntityKind) -> impl Iterator<Item = &'static FieldSpec> {
  kind.fields().iter().filter(|f| f.kind == FieldKind::IdList)
}

fn has_column(kind: EntityKind, name: &str) -> bool { columns(kind).any(|f| f.key == name) }

fn select_sql(kind: EntityKind) -> String {
  let cols: Vec<String> = columns(kind).map(|f| format!("t.{}", f.key)).collect();
  let moderation: Vec<String> =
    MODERATION_COLUMNS.split(", ").map(|c| format!("t.{c}")).collect();
  format!(
    "SELECT t.id, {}, {} FROM {} t",
    cols.join(", "),
    moderation.join(", "),
    table(kind)
  )
}

// ─── Raw rows ────────────────────────────────────────────────────────────────

/// Field values encoded for the columns and link tables of one kind.
pub(crate) struct EncodedFields {
  columns: Vec<SqlValue>,
  links:   Vec<(&'static str, Vec<i64>)>,
}

impl EncodedFields {
  pub(crate) fn new(kind: EntityKind, snapshot: &Snapshot) -> Self {
    let columns = columns(kind).map(|f| json_to_sql(f.kind, snapshot.get(f.key))).collect();
    let links = id_lists(kind)
      .map(|f| {
        let ids = match snapshot.get(f.key) {
          Some(JsonValue::Array(items)) => items.iter().filter_map(JsonValue::as_i64).collect(),
          _ => Vec::new(),
        };
        (f.key, ids)
      })
      .collect();
    Self { columns, links }
  }
}

pub(crate) struct RawEntity {
  id:         i64,
  values:     Vec<SqlValue>,
  moderation: RawModeration,
  links:      Vec<(&'static str, Vec<i64>)>,
}

impl RawEntity {
  fn from_row(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    let n = columns(kind).count();
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
      values.push(row.get::<_, SqlValue>(i + 1)?);
    }
    Ok(Self {
      id: row.get(0)?,
      values,
      moderation: RawModeration::from_row(row, n + 1)?,
      links: Vec::new(),
    })
  }

  pub(crate) fn into_entity(self, kind: EntityKind) -> Result<StoredEntity> {
    let mut map = Map::new();
    for (spec, value) in columns(kind).zip(self.values) {
      map.insert(spec.key.to_owned(), sql_to_json(spec.kind, value));
    }
    for (key, ids) in self.links {
      map.insert(key.to_owned(), JsonValue::Array(ids.into_iter().map(JsonValue::from).collect()));
    }
    Ok(StoredEntity {
      kind,
      id: self.id,
      snapshot: Snapshot(map),
      moderation: self.moderation.into_moderation()?,
    })
  }
}

// ─── Connection-level helpers ────────────────────────────────────────────────

fn load_links(conn: &rusqlite::Connection, kind: EntityKind, raw: &mut RawEntity) -> rusqlite::Result<()> {
  for spec in id_lists(kind) {
    let Some((link_table, owner, item)) = link(kind, spec.key) else { continue };
    let mut stmt =
      conn.prepare(&format!("SELECT {item} FROM {link_table} WHERE {owner} = ?1 ORDER BY pos"))?;
    let ids = stmt
      .query_map(rusqlite::params![raw.id], |row| row.get::<_, i64>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.links.push((spec.key, ids));
  }
  Ok(())
}

fn write_links(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  id: i64,
  links: &[(&'static str, Vec<i64>)],
) -> rusqlite::Result<()> {
  for (key, ids) in links {
    let Some((link_table, owner, item)) = link(kind, key) else { continue };
    conn.execute(&format!("DELETE FROM {link_table} WHERE {owner} = ?1"), rusqlite::params![id])?;
    for (pos, item_id) in ids.iter().enumerate() {
      conn.execute(
        &format!("INSERT OR IGNORE INTO {link_table} ({owner}, {item}, pos) VALUES (?1, ?2, ?3)"),
        rusqlite::params![id, item_id, pos as i64],
      )?;
    }
  }
  Ok(())
}

pub(crate) fn fetch_entity(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  id: i64,
) -> rusqlite::Result<Option<RawEntity>> {
  let sql = format!("{} WHERE t.id = ?1", select_sql(kind));
  let raw = conn
    .query_row(&sql, rusqlite::params![id], |row| RawEntity::from_row(kind, row))
    .optional()?;
  match raw {
    Some(mut raw) => {
      load_links(conn, kind, &mut raw)?;
      Ok(Some(raw))
    }
    None => Ok(None),
  }
}

/// Overwrite the field columns and link tables of one row. `false` if the
/// row does not exist.
pub(crate) fn write_fields(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  id: i64,
  fields: &EncodedFields,
) -> rusqlite::Result<bool> {
  let sets: Vec<String> =
    columns(kind).enumerate().map(|(i, f)| format!("{} = ?{}", f.key, i + 2)).collect();
  let sql = format!("UPDATE {} SET {} WHERE id = ?1", table(kind), sets.join(", "));
  let mut params: Vec<SqlValue> = vec![SqlValue::Integer(id)];
  params.extend(fields.columns.iter().cloned());
  let n = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
  if n == 0 {
    return Ok(false);
  }
  write_links(conn, kind, id, &fields.links)?;
  Ok(true)
}

pub(crate) fn write_moderation(
  conn: &rusqlite::Connection,
  kind: EntityKind,
  id: i64,
  update: &ModerationUpdate,
) -> rusqlite::Result<bool> {
  let n = conn.execute(
    &format!(
      "UPDATE {} SET moderation_state = ?2, moderated_by = ?3, moderated_at = ?4, motiu = ?5
       WHERE id = ?1",
      table(kind)
    ),
    rusqlite::params![
      id,
      update.state.to_string(),
      update.moderated_by,
      encode_dt(update.moderated_at),
      update.motiu,
    ],
  )?;
  Ok(n > 0)
}

// ─── List queries ────────────────────────────────────────────────────────────

fn in_list(ids: &BTreeSet<i64>) -> String {
  ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

/// Conditions matching a municipality-id expression against the mask.
fn municipi_scope(col: &str, mask: &ScopeMask, nivells: bool) -> Vec<String> {
  let mut conds = Vec::new();
  if !mask.municipi_ids.is_empty() {
    conds.push(format!("{col} IN ({})", in_list(&mask.municipi_ids)));
  }
  if nivells {
    conds.push(format!(
      "{col} IN (SELECT municipi_id FROM municipi_nivells WHERE nivell_id IN \
       (SELECT id FROM scope_nivells))"
    ));
  }
  if !mask.pais_ids.is_empty() {
    conds.push(format!(
      "{col} IN (SELECT id FROM municipis WHERE pais_id IN ({}))",
      in_list(&mask.pais_ids)
    ));
  }
  conds
}

/// `(common table expressions, OR-ed condition)` restricting `kind` to the
/// rows whose territorial anchors intersect the mask.
fn scope_sql(kind: EntityKind, mask: &ScopeMask) -> (Vec<String>, String) {
  let mut ctes = Vec::new();
  let nivell_ids = mask.nivell_ids();
  let nivells = !nivell_ids.is_empty();
  let ecles = !mask.ecles_ids.is_empty();
  if nivells {
    ctes.push(format!(
      "scope_nivells(id) AS (SELECT id FROM nivells WHERE id IN ({}) \
       UNION SELECT n.id FROM nivells n JOIN scope_nivells s ON n.parent_id = s.id)",
      in_list(&nivell_ids)
    ));
  }
  if ecles {
    ctes.push(format!(
      "scope_ecles(id) AS (SELECT id FROM arquebisbats WHERE id IN ({}) \
       UNION SELECT a.id FROM arquebisbats a JOIN scope_ecles s ON a.parent_id = s.id)",
      in_list(&mask.ecles_ids)
    ));
  }
  let pais = !mask.pais_ids.is_empty();

  let mut conds = Vec::new();
  match kind {
    EntityKind::Pais => {
      if pais {
        conds.push(format!("t.id IN ({})", in_list(&mask.pais_ids)));
      }
    }
    EntityKind::Nivell => {
      if nivells {
        conds.push("t.id IN (SELECT id FROM scope_nivells)".to_owned());
      }
      if pais {
        conds.push(format!("t.pais_id IN ({})", in_list(&mask.pais_ids)));
      }
    }
    EntityKind::Municipi => conds.extend(municipi_scope("t.id", mask, nivells)),
    EntityKind::Arquebisbat => {
      if ecles {
        conds.push("t.id IN (SELECT id FROM scope_ecles)".to_owned());
      }
      if pais {
        conds.push(format!("t.pais_id IN ({})", in_list(&mask.pais_ids)));
      }
    }
    EntityKind::Arxiu => {
      if !mask.arxiu_ids.is_empty() {
        conds.push(format!("t.id IN ({})", in_list(&mask.arxiu_ids)));
      }
      conds.extend(municipi_scope("t.municipi_id", mask, nivells));
      if ecles {
        conds.push("t.entitat_eclesiastica_id IN (SELECT id FROM scope_ecles)".to_owned());
      }
    }
    EntityKind::Llibre => {
      if !mask.arxiu_ids.is_empty() {
        conds.push(format!(
          "t.id IN (SELECT llibre_id FROM llibre_arxius WHERE arxiu_id IN ({}))",
          in_list(&mask.arxiu_ids)
        ));
      }
      conds.extend(municipi_scope("t.municipi_id", mask, nivells));
      let via_arxiu = municipi_scope("a.municipi_id", mask, nivells);
      if !via_arxiu.is_empty() {
        conds.push(format!(
          "t.id IN (SELECT la.llibre_id FROM llibre_arxius la JOIN arxius a ON a.id = la.arxiu_id \
           WHERE {})",
          via_arxiu.join(" OR ")
        ));
      }
      if ecles {
        conds.push("t.arquebisbat_id IN (SELECT id FROM scope_ecles)".to_owned());
      }
    }
    EntityKind::Persona | EntityKind::EventHistoric => {
      conds.extend(municipi_scope("t.municipi_id", mask, nivells));
    }
    EntityKind::Cognom => {}
  }

  let cond = if conds.is_empty() { "0".to_owned() } else { format!("({})", conds.join(" OR ")) };
  (ctes, cond)
}

/// `(common table expressions, condition)` keeping the `w`-aliased wiki
/// changes whose target object lies inside the mask, or `None` when the mask
/// grants nothing.
pub(crate) fn wiki_scope_sql(mask: &ScopeMask) -> Option<(Vec<String>, String)> {
  if mask.is_empty() {
    return None;
  }
  if mask.has_global {
    return Some((Vec::new(), "1".to_owned()));
  }
  let mut ctes = Vec::new();
  let mut conds = Vec::new();
  for object_type in ObjectType::ALL {
    let kind = object_type.entity_kind();
    let (c, cond) = scope_sql(kind, mask);
    ctes = c;
    if cond != "0" {
      conds.push(format!(
        "(w.object_type = '{object_type}' AND w.object_id IN (SELECT t.id FROM {} t WHERE {cond}))",
        table(kind)
      ));
    }
  }
  let cond = if conds.is_empty() { "0".to_owned() } else { format!("({})", conds.join(" OR ")) };
  Some((ctes, cond))
}

/// Build the list query, or `None` when the mask grants nothing.
fn list_sql(kind: EntityKind, filter: &EntityFilter) -> Option<(String, Vec<SqlValue>)> {
  let mut conds: Vec<String> = Vec::new();
  let mut params: Vec<SqlValue> = Vec::new();
  let mut ctes: Vec<String> = Vec::new();

  let mut push = |conds: &mut Vec<String>, sql: String, value: SqlValue| {
    params.push(value);
    conds.push(sql.replace('?', &format!("?{}", params.len())));
  };

  if let Some(mask) = &filter.scope {
    if mask.is_empty() {
      return None;
    }
    if !mask.has_global {
      let (c, cond) = scope_sql(kind, mask);
      ctes = c;
      conds.push(cond);
    }
  }

  if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
    push(
      &mut conds,
      format!("t.{} LIKE ? ESCAPE '\\'", title_column(kind)),
      SqlValue::Text(format!("%{}%", escape_like(q))),
    );
  }
  if let Some(status) = filter.status {
    push(&mut conds, "t.moderation_state = ?".into(), SqlValue::Text(status.to_string()));
  }
  if let Some(user) = filter.created_by {
    push(&mut conds, "t.created_by = ?".into(), SqlValue::Integer(user));
  }
  if let Some(id) = filter.municipi_id {
    let col = if kind == EntityKind::Municipi { "t.id" } else { "t.municipi_id" };
    if kind == EntityKind::Municipi || has_column(kind, "municipi_id") {
      push(&mut conds, format!("{col} = ?"), SqlValue::Integer(id));
    }
  }
  if let Some(id) = filter.pais_id {
    if kind == EntityKind::Pais {
      push(&mut conds, "t.id = ?".into(), SqlValue::Integer(id));
    } else if has_column(kind, "pais_id") {
      push(&mut conds, "t.pais_id = ?".into(), SqlValue::Integer(id));
    }
  }
  if let Some(id) = filter.arxiu_id {
    match kind {
      EntityKind::Arxiu => push(&mut conds, "t.id = ?".into(), SqlValue::Integer(id)),
      EntityKind::Llibre => push(
        &mut conds,
        "t.id IN (SELECT llibre_id FROM llibre_arxius WHERE arxiu_id = ?)".into(),
        SqlValue::Integer(id),
      ),
      _ => {}
    }
  }
  if let Some(id) = filter.arquebisbat_id {
    let col = match kind {
      EntityKind::Arxiu => Some("t.entitat_eclesiastica_id"),
      EntityKind::Llibre => Some("t.arquebisbat_id"),
      EntityKind::Arquebisbat => Some("t.parent_id"),
      _ => None,
    };
    if let Some(col) = col {
      push(&mut conds, format!("{col} = ?"), SqlValue::Integer(id));
    }
  }
  if let Some(id) = filter.nivell_id {
    match kind {
      EntityKind::Municipi => push(
        &mut conds,
        "t.id IN (SELECT municipi_id FROM municipi_nivells WHERE nivell_id = ?)".into(),
        SqlValue::Integer(id),
      ),
      EntityKind::Nivell => push(&mut conds, "t.parent_id = ?".into(), SqlValue::Integer(id)),
      _ => {}
    }
  }
  if let Some(tipus) = filter.tipus.as_deref().filter(|t| !t.is_empty()) {
    let col = match kind {
      EntityKind::Llibre => Some("tipus_llibre"),
      _ if has_column(kind, "tipus") => Some("tipus"),
      _ => None,
    };
    if let Some(col) = col {
      push(&mut conds, format!("t.{col} = ?"), SqlValue::Text(tipus.to_owned()));
    }
  }
  if let Some(acces) = filter.acces.as_deref().filter(|a| !a.is_empty()) {
    if has_column(kind, "acces") {
      push(&mut conds, "t.acces = ?".into(), SqlValue::Text(acces.to_owned()));
    }
  }

  let with = match ctes.is_empty() {
    true => String::new(),
    false => format!("WITH RECURSIVE {} ", ctes.join(", ")),
  };
  let where_clause = match conds.is_empty() {
    true => String::new(),
    false => format!(" WHERE {}", conds.join(" AND ")),
  };
  params.push(SqlValue::Integer(filter.effective_limit() as i64));
  params.push(SqlValue::Integer(filter.offset as i64));
  let sql = format!(
    "{with}{}{where_clause} ORDER BY t.id LIMIT ?{} OFFSET ?{}",
    select_sql(kind),
    params.len() - 1,
    params.len()
  );
  Some((sql, params))
}

fn escape_like(s: &str) -> String {
  s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

// ─── EntityRepository impl ───────────────────────────────────────────────────

impl EntityRepository for SqliteStore {
  async fn create_entity(
    &self,
    kind: EntityKind,
    snapshot: Snapshot,
    created_by: UserId,
    state: ModerationState,
  ) -> Result<StoredEntity> {
    let fields = EncodedFields::new(kind, &snapshot);
    let at = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let cols: Vec<&str> = columns(kind).map(|f| f.key).collect();
        let n = cols.len();
        let placeholders: Vec<String> = (1..=n + 3).map(|i| format!("?{i}")).collect();
        let sql = format!(
          "INSERT INTO {} ({}, moderation_state, created_by, created_at) VALUES ({})",
          table(kind),
          cols.join(", "),
          placeholders.join(", ")
        );
        let mut params = fields.columns.clone();
        params.push(SqlValue::Text(state.to_string()));
        params.push(SqlValue::Integer(created_by));
        params.push(SqlValue::Text(at));
        tx.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
        let id = tx.last_insert_rowid();
        write_links(&tx, kind, id, &fields.links)?;
        let raw = fetch_entity(&tx, kind, id)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    match raw {
      Some(raw) => raw.into_entity(kind),
      None => Err(crate::Error::NotFound { kind: table(kind), id: 0 }),
    }
  }

  async fn get_entity(&self, kind: EntityKind, id: i64) -> Result<Option<StoredEntity>> {
    let raw = self.conn.call(move |conn| Ok(fetch_entity(conn, kind, id)?)).await?;
    raw.map(|r| r.into_entity(kind)).transpose()
  }

  async fn list_entities(&self, kind: EntityKind, filter: EntityFilter) -> Result<Vec<StoredEntity>> {
    let Some((sql, params)) = list_sql(kind, &filter) else {
      return Ok(Vec::new());
    };

    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| RawEntity::from_row(kind, row))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        for raw in &mut rows {
          load_links(conn, kind, raw)?;
        }
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(|r| r.into_entity(kind)).collect()
  }

  async fn update_entity(
    &self,
    kind: EntityKind,
    id: i64,
    snapshot: Snapshot,
  ) -> Result<Option<StoredEntity>> {
    let fields = EncodedFields::new(kind, &snapshot);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !write_fields(&tx, kind, id, &fields)? {
          return Ok(None);
        }
        let raw = fetch_entity(&tx, kind, id)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(|r| r.into_entity(kind)).transpose()
  }

  async fn set_moderation(&self, kind: EntityKind, id: i64, update: ModerationUpdate) -> Result<bool> {
    Ok(self.conn.call(move |conn| Ok(write_moderation(conn, kind, id, &update)?)).await?)
  }

  async fn delete_entity(&self, kind: EntityKind, id: i64) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table(kind)), rusqlite::params![id])?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn pais_by_iso2(&self, code: String) -> Result<Option<StoredEntity>> {
    let kind = EntityKind::Pais;
    let raw = self
      .conn
      .call(move |conn| {
        let sql = format!("{} WHERE t.codi_iso2 = ?1", select_sql(kind));
        Ok(conn.query_row(&sql, rusqlite::params![code], |row| RawEntity::from_row(kind, row)).optional()?)
      })
      .await?;
    raw.map(|r| r.into_entity(kind)).transpose()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_mask_builds_no_query() {
    let filter = EntityFilter { scope: Some(ScopeMask::default()), ..Default::default() };
    assert!(list_sql(EntityKind::Arxiu, &filter).is_none());
  }

  #[test]
  fn global_mask_adds_no_scope_condition() {
    let filter = EntityFilter { scope: Some(ScopeMask::global()), ..Default::default() };
    let (sql, params) = list_sql(EntityKind::Arxiu, &filter).unwrap();
    assert!(!sql.contains("WITH"));
    assert!(!sql.contains("WHERE"));
    assert_eq!(params.len(), 2);
  }

  #[test]
  fn scoped_mask_uses_recursive_ctes() {
    let mut mask = ScopeMask::default();
    mask.ecles_ids.insert(4);
    mask.comarca_ids.insert(9);
    let filter = EntityFilter { scope: Some(mask), ..Default::default() };
    let (sql, _) = list_sql(EntityKind::Arxiu, &filter).unwrap();
    assert!(sql.starts_with("WITH RECURSIVE scope_nivells"));
    assert!(sql.contains("scope_ecles"));
  }

  #[test]
  fn placeholders_are_numbered_in_order() {
    let filter = EntityFilter {
      q: Some("Sant".into()),
      status: Some(ModerationState::Publicat),
      municipi_id: Some(42),
      ..Default::default()
    };
    let (sql, params) = list_sql(EntityKind::Arxiu, &filter).unwrap();
    assert!(sql.contains("t.nom LIKE ?1"));
    assert!(sql.contains("t.moderation_state = ?2"));
    assert!(sql.contains("t.municipi_id = ?3"));
    assert!(sql.ends_with("LIMIT ?4 OFFSET ?5"));
    assert_eq!(params.len(), 5);
  }
}
