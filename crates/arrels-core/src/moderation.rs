//! Moderation state shared by contributed entities and wiki changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::UserId;

/// `pendent → publicat | rebutjat`. `rebutjat` is terminal.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
  Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModerationState {
  #[default]
  Pendent,
  Publicat,
  Rebutjat,
}

impl ModerationState {
  pub fn is_published(self) -> bool { matches!(self, Self::Publicat) }
}

/// The moderation quadruple carried by every contributed row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Moderation {
  pub state:        ModerationState,
  pub created_by:   Option<UserId>,
  pub created_at:   Option<DateTime<Utc>>,
  pub moderated_by: Option<UserId>,
  pub moderated_at: Option<DateTime<Utc>>,
  /// Reason given on rejection; shown to the author.
  pub motiu:        Option<String>,
}

/// Input to [`crate::store::EntityRepository::set_moderation`].
#[derive(Debug, Clone)]
pub struct ModerationUpdate {
  pub state:        ModerationState,
  pub moderated_by: UserId,
  pub moderated_at: DateTime<Utc>,
  pub motiu:        Option<String>,
}
