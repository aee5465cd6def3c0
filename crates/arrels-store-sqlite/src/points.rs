//! [`PointsRepository`] for [`SqliteStore`].

use rusqlite::OptionalExtension as _;

use arrels_core::{
  UserId,
  activity::{ActivityId, ActivityStatus, NewActivity, NewPointsRule, PointsRule, UserActivity},
  store::PointsRepository,
};

use crate::{
  Error, Result, SqliteStore,
  encode::{
    ACTIVITY_COLUMNS, POINTS_RULE_COLUMNS, RawActivity, RawPointsRule, decode_enum, encode_dt,
  },
};

const ACTIVITY_FROM: &str = "user_activity a LEFT JOIN points_rules r ON r.id = a.rule_id";

impl SqliteStore {
  async fn query_activities(
    &self,
    filter: &'static str,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Vec<UserActivity>> {
    let raws: Vec<RawActivity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ACTIVITY_COLUMNS} FROM {ACTIVITY_FROM} WHERE {filter} ORDER BY a.id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawActivity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawActivity::into_activity).collect()
  }
}

fn add_points(conn: &rusqlite::Connection, user: UserId, delta: i64) -> rusqlite::Result<()> {
  if delta != 0 {
    conn.execute(
      "INSERT INTO user_points (user_id, total) VALUES (?1, ?2)
       ON CONFLICT (user_id) DO UPDATE SET total = total + excluded.total",
      rusqlite::params![user, delta],
    )?;
  }
  Ok(())
}

impl PointsRepository for SqliteStore {
  async fn save_points_rule(&self, rule: NewPointsRule) -> Result<PointsRule> {
    let raw: RawPointsRule = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO points_rules (code, name, description, points, active)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (code) DO UPDATE SET name = excluded.name,
             description = excluded.description, points = excluded.points,
             active = excluded.active",
          rusqlite::params![rule.code, rule.name, rule.description, rule.points, rule.active],
        )?;
        Ok(conn.query_row(
          &format!("SELECT {POINTS_RULE_COLUMNS} FROM points_rules WHERE code = ?1"),
          rusqlite::params![rule.code],
          RawPointsRule::from_row,
        )?)
      })
      .await?;
    Ok(raw.into_rule())
  }

  async fn get_active_rule_by_code(&self, code: String) -> Result<Option<PointsRule>> {
    let raw: Option<RawPointsRule> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POINTS_RULE_COLUMNS} FROM points_rules WHERE code = ?1 AND active = 1"),
              rusqlite::params![code],
              RawPointsRule::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    Ok(raw.map(RawPointsRule::into_rule))
  }

  async fn list_points_rules(&self) -> Result<Vec<PointsRule>> {
    let raws: Vec<RawPointsRule> = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare(&format!("SELECT {POINTS_RULE_COLUMNS} FROM points_rules ORDER BY code"))?;
        let rows = stmt.query_map([], RawPointsRule::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(raws.into_iter().map(RawPointsRule::into_rule).collect())
  }

  async fn create_activity(&self, activity: NewActivity) -> Result<UserActivity> {
    let id = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO user_activity (user_id, rule_id, action, object_type, object_id, points,
                                      status, moderated_by, details, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            activity.user_id,
            activity.rule_id,
            activity.action,
            activity.object_type,
            activity.object_id,
            activity.points,
            activity.status.to_string(),
            activity.moderated_by,
            activity.details,
            encode_dt(activity.created_at),
          ],
        )?;
        let id = tx.last_insert_rowid();
        if activity.status == ActivityStatus::Validat {
          add_points(&tx, activity.user_id, activity.points)?;
        }
        tx.commit()?;
        Ok(id)
      })
      .await?;

    self.get_activity(id).await?.ok_or(Error::NotFound { kind: "activity", id })
  }

  async fn get_activity(&self, id: ActivityId) -> Result<Option<UserActivity>> {
    Ok(self.query_activities("a.id = ?1", vec![id.into()]).await?.pop())
  }

  async fn set_activity_status(
    &self,
    id: ActivityId,
    status: ActivityStatus,
    moderator: Option<UserId>,
  ) -> Result<Option<ActivityStatus>> {
    let target = status.to_string();
    let previous: Option<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let previous: Option<(String, UserId, i64)> = tx
          .query_row(
            "SELECT status, user_id, points FROM user_activity WHERE id = ?1",
            rusqlite::params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;
        match previous {
          Some((prev, user, points)) if prev != target => {
            tx.execute(
              "UPDATE user_activity SET status = ?2, moderated_by = COALESCE(?3, moderated_by)
               WHERE id = ?1",
              rusqlite::params![id, target, moderator],
            )?;
            let validat = ActivityStatus::Validat.as_ref();
            if target == validat {
              add_points(&tx, user, points)?;
            } else if prev == validat {
              add_points(&tx, user, -points)?;
            }
            tx.commit()?;
            Ok(Some(prev))
          }
          _ => Ok(None),
        }
      })
      .await?;

    previous.map(|p| decode_enum("activity status", &p)).transpose()
  }

  async fn list_activities_for_user(&self, user: UserId) -> Result<Vec<UserActivity>> {
    self.query_activities("a.user_id = ?1", vec![user.into()]).await
  }

  async fn list_activities_for_object(
    &self,
    object_type: String,
    object_id: i64,
  ) -> Result<Vec<UserActivity>> {
    self
      .query_activities("a.object_type = ?1 AND a.object_id = ?2", vec![
        object_type.into(),
        object_id.into(),
      ])
      .await
  }

  async fn add_points_to_user(&self, user: UserId, delta: i64) -> Result<()> {
    self.conn.call(move |conn| Ok(add_points(conn, user, delta)?)).await?;
    Ok(())
  }

  async fn get_user_points(&self, user: UserId) -> Result<i64> {
    let total: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row("SELECT total FROM user_points WHERE user_id = ?1", rusqlite::params![user], |row| {
              row.get(0)
            })
            .optional()?,
        )
      })
      .await?;
    Ok(total.unwrap_or(0))
  }

  async fn recalc_user_points(&self) -> Result<usize> {
    Ok(
      self
        .conn
        .call(|conn| {
          let tx = conn.transaction()?;
          tx.execute("DELETE FROM user_points", [])?;
          let n = tx.execute(
            "INSERT INTO user_points (user_id, total)
             SELECT a.user_id, SUM(a.points) FROM user_activity a
               JOIN points_rules r ON r.id = a.rule_id
              WHERE a.status = 'validat' AND r.active = 1
              GROUP BY a.user_id
             HAVING SUM(a.points) != 0",
            [],
          )?;
          tx.commit()?;
          Ok(n)
        })
        .await?,
    )
  }
}
