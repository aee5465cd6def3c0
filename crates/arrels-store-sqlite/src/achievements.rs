//! [`AchievementRepository`] for [`SqliteStore`].

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use arrels_core::{
  UserId,
  achievement::{Achievement, AchievementId, NewAchievement, UserAchievement},
  store::AchievementRepository,
};

use crate::{
  Result, SqliteStore,
  encode::{ACHIEVEMENT_COLUMNS, RawAchievement, RawUserAchievement, encode_dt},
};

impl SqliteStore {
  async fn query_achievements(&self, filter: &'static str) -> Result<Vec<Achievement>> {
    let raws: Vec<RawAchievement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE {filter} ORDER BY code"
        ))?;
        let rows = stmt.query_map([], RawAchievement::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAchievement::into_achievement).collect()
  }
}

impl AchievementRepository for SqliteStore {
  async fn save_achievement(&self, a: NewAchievement) -> Result<Achievement> {
    let raw: RawAchievement = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO achievements (code, name, description, rarity, visibility, domain,
                                     enabled, repeatable, icon, rule_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
           ON CONFLICT (code) DO UPDATE SET name = excluded.name,
             description = excluded.description, rarity = excluded.rarity,
             visibility = excluded.visibility, domain = excluded.domain,
             enabled = excluded.enabled, repeatable = excluded.repeatable,
             icon = excluded.icon, rule_json = excluded.rule_json",
          rusqlite::params![
            a.code,
            a.name,
            a.description,
            a.rarity.to_string(),
            a.visibility.to_string(),
            a.domain.to_string(),
            a.enabled,
            a.repeatable,
            a.icon,
            a.rule_json,
          ],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE code = ?1"),
          rusqlite::params![a.code],
          RawAchievement::from_row,
        )?)
      })
      .await?;
    raw.into_achievement()
  }

  async fn get_achievement(&self, id: AchievementId) -> Result<Option<Achievement>> {
    let raw: Option<RawAchievement> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ACHIEVEMENT_COLUMNS} FROM achievements WHERE id = ?1"),
              rusqlite::params![id],
              RawAchievement::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAchievement::into_achievement).transpose()
  }

  async fn list_achievements(&self) -> Result<Vec<Achievement>> { self.query_achievements("1").await }

  async fn list_enabled_achievements(&self) -> Result<Vec<Achievement>> {
    self.query_achievements("enabled = 1").await
  }

  async fn list_user_achievements(&self, user: UserId) -> Result<Vec<UserAchievement>> {
    let raws: Vec<RawUserAchievement> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, achievement_id, instance, awarded_at FROM user_achievements
           WHERE user_id = ?1 ORDER BY awarded_at, achievement_id, instance",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user], |row| {
            Ok(RawUserAchievement {
              user_id:        row.get(0)?,
              achievement_id: row.get(1)?,
              instance:       row.get(2)?,
              awarded_at:     row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawUserAchievement::into_user_achievement).collect()
  }

  async fn award_achievement(
    &self,
    user: UserId,
    achievement: AchievementId,
    instance: i64,
    at: DateTime<Utc>,
  ) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT OR IGNORE INTO user_achievements (user_id, achievement_id, instance, awarded_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![user, achievement, instance, encode_dt(at)],
        )?)
      })
      .await?;
    Ok(n > 0)
  }
}
