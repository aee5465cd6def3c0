//! Achievements and the rule documents that award them.
//!
//! A rule is a small JSON document evaluated over a user's activity history:
//!
//! ```json
//! {"type": "count", "filters": {"action": ["indexar"], "status": ["validat"]}, "threshold": 10}
//! ```
//!
//! * `count` awards when the number of matching activities reaches
//!   `threshold`;
//! * `streak` when the longest run of consecutive calendar days with a
//!   matching activity does;
//! * `threshold` when the sum of matching activities' points does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result, UserId,
  activity::{ActivityStatus, UserActivity},
};

pub type AchievementId = i64;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Rarity {
  #[default]
  Common,
  Rare,
  Epic,
  Legendary,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
  #[default]
  Visible,
  Hidden,
  Seasonal,
}

/// The area of contribution an achievement belongs to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AchievementDomain {
  #[default]
  General,
  Persones,
  Cognoms,
  Documentals,
  Territori,
  Transcripcions,
  Wiki,
  Moderacio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
  pub id:          AchievementId,
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub rarity:      Rarity,
  pub visibility:  Visibility,
  pub domain:      AchievementDomain,
  pub enabled:     bool,
  pub repeatable:  bool,
  pub icon:        Option<String>,
  pub rule_json:   String,
}

impl Achievement {
  pub fn rule(&self) -> Result<AchievementRule> { AchievementRule::parse(&self.rule_json) }
}

/// Input to [`crate::store::AchievementRepository::save_achievement`];
/// upserts by `code`.
#[derive(Debug, Clone)]
pub struct NewAchievement {
  pub code:        String,
  pub name:        String,
  pub description: Option<String>,
  pub rarity:      Rarity,
  pub visibility:  Visibility,
  pub domain:      AchievementDomain,
  pub enabled:     bool,
  pub repeatable:  bool,
  pub icon:        Option<String>,
  pub rule_json:   String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAchievement {
  pub user_id:        UserId,
  pub achievement_id: AchievementId,
  /// 1 for one-shot achievements; counts up for repeatable ones.
  pub instance:       i64,
  pub awarded_at:     DateTime<Utc>,
}

// ─── Rules ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AchievementRule {
  Count {
    #[serde(default)]
    filters:   RuleFilters,
    threshold: i64,
  },
  Streak {
    #[serde(default)]
    filters:   RuleFilters,
    threshold: i64,
  },
  Threshold {
    #[serde(default)]
    filters:   RuleFilters,
    threshold: i64,
  },
}

impl AchievementRule {
  pub fn parse(json: &str) -> Result<Self> {
    let rule: Self = serde_json::from_str(json).map_err(|e| Error::InvalidRule(e.to_string()))?;
    if rule.threshold() <= 0 {
      return Err(Error::InvalidRule(format!("threshold must be positive, got {}", rule.threshold())));
    }
    Ok(rule)
  }

  pub fn filters(&self) -> &RuleFilters {
    match self {
      Self::Count { filters, .. } | Self::Streak { filters, .. } | Self::Threshold { filters, .. } => {
        filters
      }
    }
  }

  pub fn threshold(&self) -> i64 {
    match self {
      Self::Count { threshold, .. }
      | Self::Streak { threshold, .. }
      | Self::Threshold { threshold, .. } => *threshold,
    }
  }
}

/// Activity filters. An empty list matches anything; `status` defaults to
/// `validat` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFilters {
  #[serde(default, deserialize_with = "strings")]
  pub action:      Vec<String>,
  #[serde(default, deserialize_with = "strings")]
  pub object_type: Vec<String>,
  #[serde(default, deserialize_with = "strings")]
  pub rule_code:   Vec<String>,
  #[serde(default = "default_status")]
  pub status:      Vec<ActivityStatus>,
}

impl Default for RuleFilters {
  fn default() -> Self {
    Self {
      action:      Vec::new(),
      object_type: Vec::new(),
      rule_code:   Vec::new(),
      status:      default_status(),
    }
  }
}

fn default_status() -> Vec<ActivityStatus> { vec![ActivityStatus::Validat] }

fn strings<'de, D>(de: D) -> std::result::Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum OneOrMany {
    One(String),
    Many(Vec<String>),
  }
  Ok(match OneOrMany::deserialize(de)? {
    OneOrMany::One(s) => vec![s],
    OneOrMany::Many(v) => v,
  })
}

impl RuleFilters {
  pub fn matches(&self, activity: &UserActivity) -> bool {
    let status = self.status.is_empty() || self.status.contains(&activity.status);
    let action = self.action.is_empty() || self.action.iter().any(|a| *a == activity.action);
    let object_type =
      self.object_type.is_empty() || self.object_type.iter().any(|t| *t == activity.object_type);
    let rule_code = self.rule_code.is_empty()
      || activity.rule_code.as_ref().is_some_and(|c| self.rule_code.contains(c));
    status && action && object_type && rule_code
  }
}
