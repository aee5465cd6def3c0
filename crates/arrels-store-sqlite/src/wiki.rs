//! [`WikiRepository`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};

use arrels_core::{
  StoredEntity, UserId,
  moderation::{ModerationState, ModerationUpdate},
  policy::ScopeMask,
  store::WikiRepository,
  wiki::{
    ChangeId, MarkDelta, MarkType, NewWikiChange, ObjectType, PendingCap, PendingCaps, PublicCount,
    WikiChange, WikiMark, mark_deltas,
  },
};

use crate::{
  Error, Result, SqliteStore,
  encode::{RawWikiChange, WIKI_CHANGE_COLUMNS, decode_enum, encode_dt},
  entities::{EncodedFields, fetch_entity, wiki_scope_sql, write_fields, write_moderation},
};

fn apply_deltas(
  conn: &rusqlite::Connection,
  object_type: &str,
  object_id: i64,
  deltas: &[MarkDelta],
) -> rusqlite::Result<()> {
  for d in deltas.iter().filter(|d| d.delta != 0) {
    conn.execute(
      "INSERT INTO wiki_public_counts (object_type, object_id, tipus, n) VALUES (?1, ?2, ?3, MAX(?4, 0))
       ON CONFLICT (object_type, object_id, tipus) DO UPDATE SET n = MAX(n + ?4, 0)",
      rusqlite::params![object_type, object_id, d.tipus.to_string(), d.delta],
    )?;
  }
  Ok(())
}

fn read_mark(
  conn: &rusqlite::Connection,
  object_type: &str,
  object_id: i64,
  user: UserId,
) -> rusqlite::Result<Option<(String, bool)>> {
  conn
    .query_row(
      "SELECT tipus, is_public FROM wiki_marques
       WHERE object_type = ?1 AND object_id = ?2 AND user_id = ?3",
      rusqlite::params![object_type, object_id, user],
      |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn decode_mark(object_type: ObjectType, object_id: i64, user_id: UserId, raw: (String, bool)) -> Result<WikiMark> {
  let (tipus, is_public) = raw;
  Ok(WikiMark { object_type, object_id, user_id, tipus: decode_enum("mark type", &tipus)?, is_public })
}

/// Carry a decoding error out of a `conn.call` closure.
fn boxed(e: Error) -> tokio_rusqlite::Error { tokio_rusqlite::Error::Other(Box::new(e)) }

fn read_counts(
  conn: &rusqlite::Connection,
  object_type: &str,
  object_id: i64,
) -> rusqlite::Result<Vec<(String, i64)>> {
  let mut stmt = conn.prepare(
    "SELECT tipus, n FROM wiki_public_counts WHERE object_type = ?1 AND object_id = ?2 ORDER BY tipus",
  )?;
  let rows = stmt
    .query_map(rusqlite::params![object_type, object_id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

fn decode_counts(rows: Vec<(String, i64)>) -> Result<Vec<PublicCount>> {
  rows
    .into_iter()
    .map(|(tipus, n)| Ok(PublicCount { tipus: decode_enum::<MarkType>("mark type", &tipus)?, n }))
    .collect()
}

impl SqliteStore {
  async fn query_changes(
    &self,
    sql: String,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<WikiChange>> {
    let raws: Vec<RawWikiChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawWikiChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawWikiChange::into_change).collect()
  }
}

impl WikiRepository for SqliteStore {
  async fn create_wiki_change(
    &self,
    change: NewWikiChange,
    caps: PendingCaps,
  ) -> Result<std::result::Result<WikiChange, PendingCap>> {
    let at = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let object_type = change.object_type.to_string();
        let (on_object, by_author): (i64, i64) = tx.query_row(
          "SELECT COUNT(*), COALESCE(SUM(changed_by = ?3), 0) FROM wiki_canvis
           WHERE object_type = ?1 AND object_id = ?2 AND moderation_state = 'pendent'",
          rusqlite::params![object_type, change.object_id, change.changed_by],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if on_object >= caps.per_object {
          return Ok(Err(PendingCap::Object));
        }
        if by_author >= caps.per_author {
          return Ok(Err(PendingCap::Author));
        }
        tx.execute(
          "INSERT INTO wiki_canvis (object_type, object_id, change_type, field_key, old_value,
                                    new_value, metadata, moderation_state, changed_by, changed_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pendent', ?8, ?9)",
          rusqlite::params![
            object_type,
            change.object_id,
            change.change_type.to_string(),
            change.field_key,
            change.old_value,
            change.new_value,
            change.metadata_json,
            change.changed_by,
            at,
          ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(Ok(id))
      })
      .await?;

    match inserted {
      Ok(id) => Ok(Ok(self.get_wiki_change(id).await?.ok_or(Error::NotFound { kind: "wiki change", id })?)),
      Err(cap) => Ok(Err(cap)),
    }
  }

  async fn get_wiki_change(&self, id: ChangeId) -> Result<Option<WikiChange>> {
    let mut changes = self
      .query_changes(
        format!("SELECT {WIKI_CHANGE_COLUMNS} FROM wiki_canvis WHERE id = ?1"),
        vec![id.into()],
      )
      .await?;
    Ok(changes.pop())
  }

  async fn list_wiki_changes(&self, object_type: ObjectType, object_id: i64) -> Result<Vec<WikiChange>> {
    self
      .query_changes(
        format!(
          "SELECT {WIKI_CHANGE_COLUMNS} FROM wiki_canvis
           WHERE object_type = ?1 AND object_id = ?2 ORDER BY id DESC"
        ),
        vec![object_type.to_string().into(), object_id.into()],
      )
      .await
  }

  async fn list_pending_wiki_changes(
    &self,
    scope: Option<ScopeMask>,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<WikiChange>> {
    let (ctes, cond) = match &scope {
      None => (Vec::new(), "1".to_owned()),
      Some(mask) => match wiki_scope_sql(mask) {
        Some(sql) => sql,
        None => return Ok(Vec::new()),
      },
    };
    let with = match ctes.is_empty() {
      true => String::new(),
      false => format!("WITH RECURSIVE {} ", ctes.join(", ")),
    };
    self
      .query_changes(
        format!(
          "{with}SELECT {WIKI_CHANGE_COLUMNS} FROM wiki_canvis w
           WHERE w.moderation_state = 'pendent' AND {cond} ORDER BY w.id LIMIT ?1 OFFSET ?2"
        ),
        vec![(limit as i64).into(), (offset as i64).into()],
      )
      .await
  }

  async fn count_pending_wiki_changes(
    &self,
    object_type: ObjectType,
    object_id: i64,
    author: Option<UserId>,
  ) -> Result<i64> {
    let object_type = object_type.to_string();
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT COUNT(*) FROM wiki_canvis
             WHERE object_type = ?1 AND object_id = ?2 AND moderation_state = 'pendent'
               AND (?3 IS NULL OR changed_by = ?3)",
            rusqlite::params![object_type, object_id, author],
            |row| row.get(0),
          )?)
        })
        .await?,
    )
  }

  async fn apply_wiki_change(
    &self,
    id: ChangeId,
    moderator: UserId,
    at: DateTime<Utc>,
  ) -> Result<Option<StoredEntity>> {
    // The change row is immutable, so decoding it before the transaction is
    // safe; the state check below is repeated inside the transaction.
    let Some(change) = self.get_wiki_change(id).await? else {
      return Ok(None);
    };
    let Some(after) = change.metadata.after.as_ref() else {
      return Ok(None);
    };
    let kind = change.object_type.entity_kind();
    let fields = EncodedFields::new(kind, &after.canonical(kind));
    let object_id = change.object_id;
    let update = ModerationUpdate {
      state:        ModerationState::Publicat,
      moderated_by: moderator,
      moderated_at: at,
      motiu:        None,
    };

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "UPDATE wiki_canvis SET moderation_state = 'publicat', moderated_by = ?2, moderated_at = ?3
           WHERE id = ?1 AND moderation_state = 'pendent'",
          rusqlite::params![id, moderator, encode_dt(at)],
        )?;
        if n == 0 || !write_fields(&tx, kind, object_id, &fields)? {
          // Dropping the transaction rolls it back.
          return Ok(None);
        }
        write_moderation(&tx, kind, object_id, &update)?;
        let raw = fetch_entity(&tx, kind, object_id)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(|r| r.into_entity(kind)).transpose()
  }

  async fn reject_wiki_change(&self, id: ChangeId, moderator: UserId, at: DateTime<Utc>) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE wiki_canvis SET moderation_state = 'rebutjat', moderated_by = ?2, moderated_at = ?3
           WHERE id = ?1 AND moderation_state = 'pendent'",
          rusqlite::params![id, moderator, encode_dt(at)],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn get_wiki_mark(
    &self,
    object_type: ObjectType,
    object_id: i64,
    user: UserId,
  ) -> Result<Option<WikiMark>> {
    let ot = object_type.to_string();
    let raw = self.conn.call(move |conn| Ok(read_mark(conn, &ot, object_id, user)?)).await?;
    raw.map(|raw| decode_mark(object_type, object_id, user, raw)).transpose()
  }

  async fn upsert_wiki_mark(&self, mark: WikiMark) -> Result<Option<WikiMark>> {
    let ot = mark.object_type.to_string();
    let new = mark.clone();
    let previous = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw = read_mark(&tx, &ot, mark.object_id, mark.user_id)?;
        let previous = match raw {
          Some(raw) => Some(decode_mark(mark.object_type, mark.object_id, mark.user_id, raw).map_err(boxed)?),
          None => None,
        };
        tx.execute(
          "INSERT INTO wiki_marques (object_type, object_id, user_id, tipus, is_public)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (object_type, object_id, user_id)
           DO UPDATE SET tipus = excluded.tipus, is_public = excluded.is_public",
          rusqlite::params![ot, new.object_id, new.user_id, new.tipus.to_string(), new.is_public],
        )?;
        apply_deltas(&tx, &ot, new.object_id, &mark_deltas(previous.as_ref(), Some(&new)))?;
        tx.commit()?;
        Ok(previous)
      })
      .await?;
    Ok(previous)
  }

  async fn delete_wiki_mark(
    &self,
    object_type: ObjectType,
    object_id: i64,
    user: UserId,
  ) -> Result<Option<WikiMark>> {
    let ot = object_type.to_string();
    let removed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(raw) = read_mark(&tx, &ot, object_id, user)? else {
          return Ok(None);
        };
        let old = decode_mark(object_type, object_id, user, raw).map_err(boxed)?;
        tx.execute(
          "DELETE FROM wiki_marques WHERE object_type = ?1 AND object_id = ?2 AND user_id = ?3",
          rusqlite::params![ot, object_id, user],
        )?;
        apply_deltas(&tx, &ot, object_id, &mark_deltas(Some(&old), None))?;
        tx.commit()?;
        Ok(Some(old))
      })
      .await?;
    Ok(removed)
  }

  async fn list_wiki_public_counts(
    &self,
    object_type: ObjectType,
    object_id: i64,
  ) -> Result<Vec<PublicCount>> {
    let ot = object_type.to_string();
    let rows = self.conn.call(move |conn| Ok(read_counts(conn, &ot, object_id)?)).await?;
    decode_counts(rows)
  }

  async fn inc_wiki_public_count(
    &self,
    object_type: ObjectType,
    object_id: i64,
    tipus: MarkType,
    delta: i64,
  ) -> Result<()> {
    let ot = object_type.to_string();
    self
      .conn
      .call(move |conn| {
        apply_deltas(conn, &ot, object_id, &[MarkDelta { tipus, delta }])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn reconcile_wiki_public_counts(
    &self,
    object_type: ObjectType,
    object_id: i64,
  ) -> Result<Vec<PublicCount>> {
    let ot = object_type.to_string();
    let rows = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM wiki_public_counts WHERE object_type = ?1 AND object_id = ?2",
          rusqlite::params![ot, object_id],
        )?;
        tx.execute(
          "INSERT INTO wiki_public_counts (object_type, object_id, tipus, n)
           SELECT object_type, object_id, tipus, COUNT(*) FROM wiki_marques
            WHERE object_type = ?1 AND object_id = ?2 AND is_public = 1
            GROUP BY tipus",
          rusqlite::params![ot, object_id],
        )?;
        let rows = read_counts(&tx, &ot, object_id)?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;
    decode_counts(rows)
  }
}
