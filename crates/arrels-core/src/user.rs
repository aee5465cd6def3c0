//! Users and groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
  pub id:             UserId,
  pub login:          String,
  pub nom:            Option<String>,
  pub cognoms:        Option<String>,
  pub email:          Option<String>,
  /// Preferred locale, e.g. `ca`, `es`, `en`.
  pub locale:         String,
  pub actiu:          bool,
  /// Hide the real name on public pages.
  pub nom_privat:     bool,
  /// Hide the user from public rankings.
  pub ranking_privat: bool,
  pub created_at:     DateTime<Utc>,
}

impl User {
  /// Name shown on public pages, honouring the privacy flag.
  pub fn display_name(&self) -> String {
    if self.nom_privat {
      return self.login.clone();
    }
    match (&self.nom, &self.cognoms) {
      (Some(n), Some(c)) => format!("{n} {c}"),
      (Some(n), None) => n.clone(),
      _ => self.login.clone(),
    }
  }
}

/// Input to [`crate::store::UserRepository::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
  pub login:            String,
  pub nom:              Option<String>,
  pub cognoms:          Option<String>,
  pub email:            Option<String>,
  pub locale:           String,
  /// PHC string produced by argon2.
  pub password_hash:    String,
  /// Users start inactive; the token activates them.
  pub activation_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
  pub id:  GroupId,
  pub nom: String,
}
