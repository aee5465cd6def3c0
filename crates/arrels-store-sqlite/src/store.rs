//! [`SqliteStore`]: the SQLite implementation of the Arrels repositories.
//!
//! This module holds the connection, schema initialisation and the user and
//! policy repositories; the other repositories live in sibling modules.

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use arrels_core::{
  policy::{NewPolicy, Policy, PolicyAssignment, PolicyId},
  store::{PolicyRepository, Repository, UserRepository},
  user::{Group, GroupId, NewUser, User, UserId},
};

use crate::{
  Error, Result,
  encode::{POLICY_COLUMNS, RawPolicy, RawUser, USER_COLUMNS, encode_dt},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// The Arrels repositories backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn fetch_user(&self, id: UserId) -> Result<Option<User>> {
    let raw: Option<RawUser> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
              rusqlite::params![id],
              RawUser::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawUser::into_user).transpose()
  }
}

impl Repository for SqliteStore {
  type Error = Error;
}

// ─── Users and groups ────────────────────────────────────────────────────────

impl UserRepository for SqliteStore {
  async fn create_user(&self, user: NewUser) -> Result<User> {
    let at = encode_dt(Utc::now());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (login, nom, cognoms, email, locale, password_hash,
                              actiu, activation_token, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
          rusqlite::params![
            user.login,
            user.nom,
            user.cognoms,
            user.email,
            user.locale,
            user.password_hash,
            user.activation_token,
            at,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    self.fetch_user(id).await?.ok_or(Error::NotFound { kind: "user", id })
  }

  async fn get_user_by_id(&self, id: UserId) -> Result<Option<User>> { self.fetch_user(id).await }

  async fn get_credentials(&self, login: String) -> Result<Option<(User, String)>> {
    let raw: Option<(RawUser, String)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE login = ?1"),
              rusqlite::params![login],
              |row| Ok((RawUser::from_row(row)?, row.get(10)?)),
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(|(u, hash)| Ok((u.into_user()?, hash))).transpose()
  }

  async fn activate_user(&self, token: String) -> Result<Option<User>> {
    let id: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let id: Option<i64> = tx
          .query_row(
            "SELECT id FROM users WHERE activation_token = ?1",
            rusqlite::params![token],
            |row| row.get(0),
          )
          .optional()?;
        if let Some(id) = id {
          tx.execute(
            "UPDATE users SET actiu = 1, activation_token = NULL WHERE id = ?1",
            rusqlite::params![id],
          )?;
        }
        tx.commit()?;
        Ok(id)
      })
      .await?;

    match id {
      Some(id) => self.fetch_user(id).await,
      None => Ok(None),
    }
  }

  async fn list_user_ids(&self, limit: usize, offset: usize) -> Result<Vec<UserId>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id LIMIT ?1 OFFSET ?2")?;
          let ids = stmt
            .query_map(rusqlite::params![limit as i64, offset as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          Ok(ids)
        })
        .await?,
    )
  }

  async fn create_group(&self, nom: String) -> Result<Group> {
    let name = nom.clone();
    let id = self
      .conn
      .call(move |conn| {
        conn.execute("INSERT INTO groups (nom) VALUES (?1)", rusqlite::params![name])?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(Group { id, nom })
  }

  async fn list_groups(&self) -> Result<Vec<Group>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt = conn.prepare("SELECT id, nom FROM groups ORDER BY nom")?;
          let groups = stmt
            .query_map([], |row| Ok(Group { id: row.get(0)?, nom: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(groups)
        })
        .await?,
    )
  }

  async fn add_user_to_group(&self, user: UserId, group: GroupId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO user_groups (user_id, group_id) VALUES (?1, ?2)",
          rusqlite::params![user, group],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_group_ids_for_user(&self, user: UserId) -> Result<Vec<GroupId>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt =
            conn.prepare("SELECT group_id FROM user_groups WHERE user_id = ?1 ORDER BY group_id")?;
          let ids = stmt
            .query_map(rusqlite::params![user], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          Ok(ids)
        })
        .await?,
    )
  }
}

// ─── Policies ────────────────────────────────────────────────────────────────

impl PolicyRepository for SqliteStore {
  async fn save_policy(&self, policy: NewPolicy) -> Result<Policy> {
    let at = encode_dt(Utc::now());
    let requested = policy.id.unwrap_or(0);

    let raw: Option<RawPolicy> = self
      .conn
      .call(move |conn| {
        let id = match policy.id {
          Some(id) => {
            conn.execute(
              "UPDATE policies SET nom = ?2, descripcio = ?3, document = ?4, updated_at = ?5
               WHERE id = ?1",
              rusqlite::params![id, policy.nom, policy.descripcio, policy.document, at],
            )?;
            id
          }
          None => {
            conn.execute(
              "INSERT INTO policies (nom, descripcio, document, updated_at) VALUES (?1, ?2, ?3, ?4)",
              rusqlite::params![policy.nom, policy.descripcio, policy.document, at],
            )?;
            conn.last_insert_rowid()
          }
        };
        Ok(
          conn
            .query_row(
              &format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?1"),
              rusqlite::params![id],
              RawPolicy::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw
      .map(RawPolicy::into_policy)
      .transpose()?
      .ok_or(Error::NotFound { kind: "policy", id: requested })
  }

  async fn get_policy(&self, id: PolicyId) -> Result<Option<Policy>> {
    let raw: Option<RawPolicy> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?1"),
              rusqlite::params![id],
              RawPolicy::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawPolicy::into_policy).transpose()
  }

  async fn list_policies(&self) -> Result<Vec<Policy>> {
    let raws: Vec<RawPolicy> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT {POLICY_COLUMNS} FROM policies ORDER BY nom"))?;
        let rows = stmt.query_map([], RawPolicy::from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawPolicy::into_policy).collect()
  }

  async fn assign_policy_to_user(&self, policy: PolicyId, user: UserId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO policy_users (policy_id, user_id) VALUES (?1, ?2)",
          rusqlite::params![policy, user],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn unassign_policy_from_user(&self, policy: PolicyId, user: UserId) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM policy_users WHERE policy_id = ?1 AND user_id = ?2",
          rusqlite::params![policy, user],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn assign_policy_to_group(&self, policy: PolicyId, group: GroupId) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO policy_groups (policy_id, group_id) VALUES (?1, ?2)",
          rusqlite::params![policy, group],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn unassign_policy_from_group(&self, policy: PolicyId, group: GroupId) -> Result<bool> {
    let n = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM policy_groups WHERE policy_id = ?1 AND group_id = ?2",
          rusqlite::params![policy, group],
        )?)
      })
      .await?;
    Ok(n > 0)
  }

  async fn list_policy_assignments(&self) -> Result<Vec<PolicyAssignment>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt = conn.prepare(
            "SELECT policy_id, user_id, NULL FROM policy_users
             UNION ALL
             SELECT policy_id, NULL, group_id FROM policy_groups
             ORDER BY 1, 2, 3",
          )?;
          let rows = stmt
            .query_map([], |row| {
              Ok(PolicyAssignment {
                policy_id: row.get(0)?,
                user_id:   row.get(1)?,
                group_id:  row.get(2)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn list_policy_ids_for_user(&self, user: UserId) -> Result<Vec<PolicyId>> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let mut stmt = conn.prepare(
            "SELECT policy_id FROM policy_users WHERE user_id = ?1
             UNION
             SELECT pg.policy_id FROM policy_groups pg
               JOIN user_groups ug ON ug.group_id = pg.group_id
              WHERE ug.user_id = ?1
             ORDER BY 1",
          )?;
          let ids = stmt
            .query_map(rusqlite::params![user], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
          Ok(ids)
        })
        .await?,
    )
  }
}
