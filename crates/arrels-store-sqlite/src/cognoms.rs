//! [`CognomRepository`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use arrels_core::{
  UserId,
  cognom::{
    CognomHit, CognomId, CognomRedirect, CognomRedirectSuggestion, CognomVariant, HeatmapCell,
    NewSuggestion, SuggestionId, SuggestionState,
  },
  store::{CognomRepository, MAX_PAGE},
};

use crate::{
  Error, Result, SqliteStore,
  encode::{REDIRECT_COLUMNS, RawRedirect, RawSuggestion, SUGGESTION_COLUMNS, encode_dt},
};

/// Escape `LIKE` metacharacters so user input matches literally.
fn like_prefix(q: &str) -> String {
  let mut out = String::with_capacity(q.len() + 1);
  for c in q.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('%');
  out
}

impl CognomRepository for SqliteStore {
  async fn get_cognom_redirect(&self, from: CognomId) -> Result<Option<CognomRedirect>> {
    let raw: Option<RawRedirect> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {REDIRECT_COLUMNS} FROM cognom_redirects WHERE from_id = ?1"),
              rusqlite::params![from],
              RawRedirect::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawRedirect::into_redirect).transpose()
  }

  async fn list_cognom_redirects(&self) -> Result<Vec<CognomRedirect>> {
    let raws: Vec<RawRedirect> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {REDIRECT_COLUMNS} FROM cognom_redirects ORDER BY from_id"))?;
        let rows = stmt.query_map([], RawRedirect::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRedirect::into_redirect).collect()
  }

  async fn set_cognom_redirect(&self, r: CognomRedirect) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cognom_redirects (from_id, to_id, reason, created_by, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (from_id) DO UPDATE SET to_id = excluded.to_id, reason = excluded.reason,
             created_by = excluded.created_by, created_at = excluded.created_at",
          rusqlite::params![r.from_id, r.to_id, r.reason, r.created_by, encode_dt(r.created_at)],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn delete_cognom_redirect(&self, from: CognomId) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM cognom_redirects WHERE from_id = ?1", rusqlite::params![from])?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn create_redirect_suggestion(&self, s: NewSuggestion) -> Result<CognomRedirectSuggestion> {
    let at = encode_dt(Utc::now());
    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO cognom_redirect_suggestions (from_id, to_id, reason, moderation_state,
                                                    created_by, created_at)
           VALUES (?1, ?2, ?3, 'pendent', ?4, ?5)",
          rusqlite::params![s.from_id, s.to_id, s.reason, s.created_by, at],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    self.get_redirect_suggestion(id).await?.ok_or(Error::NotFound { kind: "suggestion", id })
  }

  async fn get_redirect_suggestion(&self, id: SuggestionId) -> Result<Option<CognomRedirectSuggestion>> {
    let raw: Option<RawSuggestion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {SUGGESTION_COLUMNS} FROM cognom_redirect_suggestions WHERE id = ?1"),
              rusqlite::params![id],
              RawSuggestion::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawSuggestion::into_suggestion).transpose()
  }

  async fn list_redirect_suggestions(
    &self,
    state: Option<SuggestionState>,
  ) -> Result<Vec<CognomRedirectSuggestion>> {
    let state = state.map(|s| s.to_string());
    let raws: Vec<RawSuggestion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {SUGGESTION_COLUMNS} FROM cognom_redirect_suggestions
           WHERE (?1 IS NULL OR moderation_state = ?1) ORDER BY id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![state], RawSuggestion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawSuggestion::into_suggestion).collect()
  }

  async fn has_pending_suggestion(&self, from: CognomId, to: CognomId) -> Result<bool> {
    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM cognom_redirect_suggestions
                             WHERE from_id = ?1 AND to_id = ?2 AND moderation_state = 'pendent')",
            rusqlite::params![from, to],
            |row| row.get(0),
          )?)
        })
        .await?,
    )
  }

  async fn set_suggestion_state(
    &self,
    id: SuggestionId,
    state: SuggestionState,
    moderator: UserId,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE cognom_redirect_suggestions
              SET moderation_state = ?2, moderated_by = ?3, moderated_at = ?4
            WHERE id = ?1 AND moderation_state = 'pendent'",
          rusqlite::params![id, state.to_string(), moderator, encode_dt(at)],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn add_cognom_variant(&self, cognom: CognomId, variant: String) -> Result<Option<CognomVariant>> {
    let v = variant.clone();
    let id = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT OR IGNORE INTO cognom_variants (cognom_id, variant) VALUES (?1, ?2)",
          rusqlite::params![cognom, v],
        )?;
        Ok((n > 0).then(|| conn.last_insert_rowid()))
      })
      .await?;
    Ok(id.map(|id| CognomVariant { id, cognom_id: cognom, variant }))
  }

  async fn list_cognom_variants(&self, cognom: CognomId) -> Result<Vec<CognomVariant>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT id, cognom_id, variant FROM cognom_variants WHERE cognom_id = ?1 ORDER BY variant",
          )?;
          let rows = stmt
            .query_map(rusqlite::params![cognom], |row| {
              Ok(CognomVariant { id: row.get(0)?, cognom_id: row.get(1)?, variant: row.get(2)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn search_cognoms(&self, q: String, limit: usize) -> Result<Vec<CognomHit>> {
    let pattern = like_prefix(q.trim());
    let limit = limit.clamp(1, MAX_PAGE) as i64;
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT id, forma, NULL FROM cognoms
              WHERE moderation_state = 'publicat' AND forma LIKE ?1 ESCAPE '\\'
             UNION
             SELECT c.id, c.forma, v.variant FROM cognom_variants v
               JOIN cognoms c ON c.id = v.cognom_id
              WHERE c.moderation_state = 'publicat' AND v.variant LIKE ?1 ESCAPE '\\'
             ORDER BY 2, 3
             LIMIT ?2",
          )?;
          let rows = stmt
            .query_map(rusqlite::params![pattern, limit], |row| {
              Ok(CognomHit { cognom_id: row.get(0)?, forma: row.get(1)?, variant: row.get(2)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn cognom_heatmap(
    &self,
    forms: Vec<String>,
    y0: Option<i64>,
    y1: Option<i64>,
  ) -> Result<Vec<HeatmapCell>> {
    if forms.is_empty() {
      return Ok(Vec::new());
    }
    Ok(
      self
        .conn
        .call(move |conn| {
          let holders: Vec<String> = (0..forms.len()).map(|i| format!("?{}", i + 3)).collect();
          let list = holders.join(", ");
          let sql = format!(
            "SELECT m.id, m.nom, m.latitud, m.longitud, COUNT(*) FROM persones p
               JOIN municipis m ON m.id = p.municipi_id
              WHERE p.moderation_state = 'publicat'
                AND (p.cognom1 COLLATE NOCASE IN ({list}) OR p.cognom2 COLLATE NOCASE IN ({list}))
                AND (?1 IS NULL OR p.any_naixement >= ?1)
                AND (?2 IS NULL OR p.any_naixement <= ?2)
              GROUP BY m.id
              ORDER BY COUNT(*) DESC, m.nom"
          );
          let mut params: Vec<rusqlite::types::Value> = vec![y0.into(), y1.into()];
          params.extend(forms.into_iter().map(Into::into));
          let mut stmt = conn.prepare(&sql)?;
          let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
              Ok(HeatmapCell {
                municipi_id: row.get(0)?,
                nom:         row.get(1)?,
                latitud:     row.get(2)?,
                longitud:    row.get(3)?,
                persones:    row.get(4)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }
}
