//! User activity records and points rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::UserId;

pub type ActivityId = i64;
pub type RuleId = i64;

/// Points are credited only when an activity becomes `validat`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
  Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivityStatus {
  Pendent,
  #[default]
  Validat,
  Anulat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRule {
  pub id:          RuleId,
  /// Immutable external key, e.g. `persona_create`.
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub points:      i64,
  pub active:      bool,
}

/// Input to [`crate::store::PointsRepository::save_points_rule`]; upserts
/// by `code`.
#[derive(Debug, Clone)]
pub struct NewPointsRule {
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub points:      i64,
  pub active:      bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivity {
  pub id:           ActivityId,
  pub user_id:      UserId,
  pub rule_id:      Option<RuleId>,
  /// Code of `rule_id`, joined on read.
  pub rule_code:    Option<String>,
  pub action:       String,
  pub object_type:  String,
  pub object_id:    Option<i64>,
  pub points:       i64,
  pub status:       ActivityStatus,
  pub moderated_by: Option<UserId>,
  pub details:      String,
  pub created_at:   DateTime<Utc>,
}

/// Input to [`crate::store::PointsRepository::create_activity`].
#[derive(Debug, Clone)]
pub struct NewActivity {
  pub user_id:      UserId,
  pub rule_id:      Option<RuleId>,
  pub action:       String,
  pub object_type:  String,
  pub object_id:    Option<i64>,
  pub points:       i64,
  pub status:       ActivityStatus,
  pub moderated_by: Option<UserId>,
  pub details:      String,
  pub created_at:   DateTime<Utc>,
}
