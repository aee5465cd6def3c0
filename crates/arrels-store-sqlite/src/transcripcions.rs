//! [`TranscripcioRepository`] for [`SqliteStore`].
//!
//! A snapshot spans three tables: the raw row, its persons and its
//! attributes. Writes replace the child rows wholesale.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use arrels_core::{
  UserId,
  moderation::{ModerationState, ModerationUpdate},
  store::TranscripcioRepository,
  transcripcio::{
    NewTranscripcioChange, TranscripcioAtribut, TranscripcioChange, TranscripcioChangeId,
    TranscripcioFields, TranscripcioId, TranscripcioPersona, TranscripcioRaw, TranscripcioSnapshot,
  },
};

use crate::{
  Error, Result, SqliteStore,
  encode::{
    MODERATION_COLUMNS, RawModeration, RawTranscripcioChange, TRANSCRIPCIO_CHANGE_COLUMNS, encode_dt,
  },
};

struct RawTranscripcio {
  id:         i64,
  snapshot:   TranscripcioSnapshot,
  moderation: RawModeration,
}

impl RawTranscripcio {
  fn into_raw(self) -> Result<TranscripcioRaw> {
    Ok(TranscripcioRaw {
      id:         self.id,
      snapshot:   self.snapshot,
      moderation: self.moderation.into_moderation()?,
    })
  }
}

fn read_transcripcio(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawTranscripcio>> {
  let head = conn
    .query_row(
      &format!(
        "SELECT id, llibre_id, pagina, tipus_acte, data_acte, any, literal, notes, {MODERATION_COLUMNS}
           FROM transcripcions_raw WHERE id = ?1"
      ),
      rusqlite::params![id],
      |row| {
        Ok((
          row.get::<_, i64>(0)?,
          TranscripcioFields {
            llibre_id:  row.get(1)?,
            pagina:     row.get(2)?,
            tipus_acte: row.get(3)?,
            data_acte:  row.get(4)?,
            any:        row.get(5)?,
            literal:    row.get(6)?,
            notes:      row.get(7)?,
          },
          RawModeration::from_row(row, 8)?,
        ))
      },
    )
    .optional()?;
  let Some((id, raw, moderation)) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT person_key, role, nom, cognom1, cognom2, sexe, edat, ofici, residencia
       FROM transcripcions_persones WHERE transcripcio_id = ?1 ORDER BY pos",
  )?;
  let persones = stmt
    .query_map(rusqlite::params![id], |row| {
      Ok(TranscripcioPersona {
        key:        row.get(0)?,
        role:       row.get(1)?,
        nom:        row.get(2)?,
        cognom1:    row.get(3)?,
        cognom2:    row.get(4)?,
        sexe:       row.get(5)?,
        edat:       row.get(6)?,
        ofici:      row.get(7)?,
        residencia: row.get(8)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut stmt = conn.prepare(
    "SELECT attr_key, tipus, value FROM transcripcions_atributs
      WHERE transcripcio_id = ?1 ORDER BY pos",
  )?;
  let atributs = stmt
    .query_map(rusqlite::params![id], |row| {
      Ok(TranscripcioAtribut { key: row.get(0)?, tipus: row.get(1)?, value: row.get(2)? })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(RawTranscripcio {
    id,
    snapshot: TranscripcioSnapshot { raw, persones, atributs },
    moderation,
  }))
}

/// Overwrite the raw row and replace its children. `false` if the row does
/// not exist.
fn write_snapshot(
  conn: &rusqlite::Connection,
  id: i64,
  s: &TranscripcioSnapshot,
) -> rusqlite::Result<bool> {
  let r = &s.raw;
  let n = conn.execute(
    "UPDATE transcripcions_raw SET llibre_id = ?2, pagina = ?3, tipus_acte = ?4, data_acte = ?5,
            any = ?6, literal = ?7, notes = ?8
      WHERE id = ?1",
    rusqlite::params![id, r.llibre_id, r.pagina, r.tipus_acte, r.data_acte, r.any, r.literal, r.notes],
  )?;
  if n == 0 {
    return Ok(false);
  }
  write_children(conn, id, s)?;
  Ok(true)
}

fn write_children(conn: &rusqlite::Connection, id: i64, s: &TranscripcioSnapshot) -> rusqlite::Result<()> {
  conn.execute("DELETE FROM transcripcions_persones WHERE transcripcio_id = ?1", rusqlite::params![id])?;
  conn.execute("DELETE FROM transcripcions_atributs WHERE transcripcio_id = ?1", rusqlite::params![id])?;
  for (pos, p) in s.persones.iter().enumerate() {
    conn.execute(
      "INSERT INTO transcripcions_persones (transcripcio_id, pos, person_key, role, nom, cognom1,
                                           cognom2, sexe, edat, ofici, residencia)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
      rusqlite::params![
        id,
        pos as i64,
        p.key,
        p.role,
        p.nom,
        p.cognom1,
        p.cognom2,
        p.sexe,
        p.edat,
        p.ofici,
        p.residencia,
      ],
    )?;
  }
  for (pos, a) in s.atributs.iter().enumerate() {
    conn.execute(
      "INSERT INTO transcripcions_atributs (transcripcio_id, pos, attr_key, tipus, value)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      rusqlite::params![id, pos as i64, a.key, a.tipus, a.value],
    )?;
  }
  Ok(())
}

impl SqliteStore {
  async fn query_transcripcio_changes(
    &self,
    filter: &'static str,
    param: i64,
  ) -> Result<Vec<TranscripcioChange>> {
    let raws: Vec<RawTranscripcioChange> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {TRANSCRIPCIO_CHANGE_COLUMNS} FROM transcripcions_raw_canvis
            WHERE {filter} ORDER BY id DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![param], RawTranscripcioChange::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTranscripcioChange::into_change).collect()
  }
}

impl TranscripcioRepository for SqliteStore {
  async fn create_transcripcio(
    &self,
    snapshot: TranscripcioSnapshot,
    created_by: UserId,
    state: ModerationState,
  ) -> Result<TranscripcioRaw> {
    let at = encode_dt(Utc::now());
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let r = &snapshot.raw;
        tx.execute(
          "INSERT INTO transcripcions_raw (llibre_id, pagina, tipus_acte, data_acte, any, literal,
                                          notes, moderation_state, created_by, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            r.llibre_id,
            r.pagina,
            r.tipus_acte,
            r.data_acte,
            r.any,
            r.literal,
            r.notes,
            state.to_string(),
            created_by,
            at,
          ],
        )?;
        let id = tx.last_insert_rowid();
        write_children(&tx, id, &snapshot)?;
        let raw = read_transcripcio(&tx, id)?;
        tx.commit()?;
        Ok(raw)
      })
      .await?;

    raw.map(RawTranscripcio::into_raw).transpose()?.ok_or(Error::NotFound {
      kind: "transcripcio",
      id:   0,
    })
  }

  async fn get_transcripcio(&self, id: TranscripcioId) -> Result<Option<TranscripcioRaw>> {
    let raw = self.conn.call(move |conn| Ok(read_transcripcio(conn, id)?)).await?;
    raw.map(RawTranscripcio::into_raw).transpose()
  }

  async fn set_transcripcio_moderation(&self, id: TranscripcioId, update: ModerationUpdate) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE transcripcions_raw
              SET moderation_state = ?2, moderated_by = ?3, moderated_at = ?4, motiu = ?5
            WHERE id = ?1",
          rusqlite::params![
            id,
            update.state.to_string(),
            update.moderated_by,
            encode_dt(update.moderated_at),
            update.motiu,
          ],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn save_transcripcio_edit(
    &self,
    id: TranscripcioId,
    snapshot: TranscripcioSnapshot,
    changes: Vec<NewTranscripcioChange>,
  ) -> Result<Option<Vec<TranscripcioChange>>> {
    let at = encode_dt(Utc::now());
    let encoded = changes
      .into_iter()
      .map(|c| Ok((serde_json::to_string(&c.info)?, serde_json::to_string(&c.metadata)?, c)))
      .collect::<Result<Vec<_>>>()?;

    let ids: Option<Vec<i64>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !write_snapshot(&tx, id, &snapshot)? {
          return Ok(None);
        }
        let mut ids = Vec::with_capacity(encoded.len());
        for (info, metadata, c) in &encoded {
          tx.execute(
            "INSERT INTO transcripcions_raw_canvis (transcripcio_id, change_type, change_info,
                                                   old_value, new_value, metadata,
                                                   moderation_state, changed_by, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pendent', ?7, ?8)",
            rusqlite::params![
              id,
              c.change_type.to_string(),
              info,
              c.old_value,
              c.new_value,
              metadata,
              c.changed_by,
              at,
            ],
          )?;
          ids.push(tx.last_insert_rowid());
        }
        tx.commit()?;
        Ok(Some(ids))
      })
      .await?;

    let Some(ids) = ids else {
      return Ok(None);
    };
    let mut out = Vec::with_capacity(ids.len());
    for change_id in ids {
      let change = self
        .get_transcripcio_change(change_id)
        .await?
        .ok_or(Error::NotFound { kind: "transcripcio change", id: change_id })?;
      out.push(change);
    }
    Ok(Some(out))
  }

  async fn list_transcripcio_changes(&self, id: TranscripcioId) -> Result<Vec<TranscripcioChange>> {
    self.query_transcripcio_changes("transcripcio_id = ?1", id).await
  }

  async fn get_transcripcio_change(&self, id: TranscripcioChangeId) -> Result<Option<TranscripcioChange>> {
    Ok(self.query_transcripcio_changes("id = ?1", id).await?.pop())
  }

  async fn set_transcripcio_change_state(
    &self,
    id: TranscripcioChangeId,
    state: ModerationState,
    moderator: UserId,
    at: DateTime<Utc>,
    restore: Option<TranscripcioSnapshot>,
  ) -> Result<bool> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let owner: Option<i64> = tx
            .query_row(
              "SELECT transcripcio_id FROM transcripcions_raw_canvis
                WHERE id = ?1 AND moderation_state = 'pendent'",
              rusqlite::params![id],
              |row| row.get(0),
            )
            .optional()?;
          let Some(owner) = owner else {
            return Ok(false);
          };
          tx.execute(
            "UPDATE transcripcions_raw_canvis
                SET moderation_state = ?2, moderated_by = ?3, moderated_at = ?4
              WHERE id = ?1",
            rusqlite::params![id, state.to_string(), moderator, encode_dt(at)],
          )?;
          if let Some(snapshot) = &restore {
            write_snapshot(&tx, owner, snapshot)?;
          }
          tx.commit()?;
          Ok(true)
        })
        .await?,
    )
  }
}
