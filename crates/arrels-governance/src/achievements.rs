//! Achievement evaluation and bulk recompute.

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
};

use chrono::{DateTime, FixedOffset, NaiveDate, Offset as _, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use arrels_core::{
  UserId,
  achievement::{Achievement, AchievementId, AchievementRule, NewAchievement},
  activity::UserActivity,
  policy::{PermissionTarget, keys},
  store::Store,
};

use crate::{Error, Governance, RequestContext, Result};

/// Users evaluated per page of a bulk recompute.
pub const RECOMPUTE_BATCH: usize = 100;

/// One instance a user earned (or would earn, in a dry run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Award {
  pub user_id:        UserId,
  pub achievement_id: AchievementId,
  pub code:           String,
  pub instance:       i64,
}

/// Which users and achievements a recompute covers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecomputeScope {
  /// `None` (or a non-positive id) pages through every user.
  pub user_id:        Option<UserId>,
  pub achievement_id: Option<AchievementId>,
  pub dry_run:        bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeReport {
  pub users:   usize,
  pub awards:  usize,
  pub dry_run: bool,
}

/// The measure a rule compares with its threshold.
pub fn rule_value(rule: &AchievementRule, activities: &[UserActivity], offset_minutes: i32) -> i64 {
  let matching = activities.iter().filter(|a| rule.filters().matches(a));
  match rule {
    AchievementRule::Count { .. } => matching.count() as i64,
    AchievementRule::Threshold { .. } => matching.map(|a| a.points).sum(),
    AchievementRule::Streak { .. } => {
      let tz = FixedOffset::east_opt(offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix());
      let days: BTreeSet<NaiveDate> =
        matching.map(|a| a.created_at.with_timezone(&tz).date_naive()).collect();
      longest_run(&days)
    }
  }
}

/// Longest run of consecutive calendar days.
fn longest_run(days: &BTreeSet<NaiveDate>) -> i64 {
  let mut best = 0;
  let mut run = 0;
  let mut prev: Option<NaiveDate> = None;
  for day in days {
    run = match prev {
      Some(p) if p.succ_opt() == Some(*day) => run + 1,
      _ => 1,
    };
    best = best.max(run);
    prev = Some(*day);
  }
  best
}

/// How many instances the measure earns: one for a one-shot achievement,
/// one per full multiple of the threshold for a repeatable one.
fn earned_instances(achievement: &Achievement, rule: &AchievementRule, value: i64) -> i64 {
  let threshold = rule.threshold();
  if value < threshold {
    0
  } else if achievement.repeatable {
    value / threshold
  } else {
    1
  }
}

impl<S: Store> Governance<S> {
  async fn enabled_achievements(&self) -> Result<Arc<Vec<Achievement>>> {
    let (generation, cached) = self.achievements.get();
    if let Some(list) = cached {
      return Ok(list);
    }
    let list = self.store.list_enabled_achievements().await.map_err(Error::store)?;
    debug!(achievements = list.len(), "achievement cache rebuilt");
    Ok(self.achievements.install(generation, list))
  }

  pub fn invalidate_achievements(&self) { self.achievements.invalidate(); }

  /// Evaluate `candidates` (every enabled achievement when `None`) against
  /// `user`'s history. Awards are stamped `at`; a dry run persists nothing.
  pub async fn evaluate_for_user(
    &self,
    user: UserId,
    at: DateTime<Utc>,
    candidates: Option<&[Achievement]>,
    dry_run: bool,
  ) -> Result<Vec<Award>> {
    let cached;
    let candidates = match candidates {
      Some(list) => list,
      None => {
        cached = self.enabled_achievements().await?;
        cached.as_slice()
      }
    };
    if candidates.is_empty() {
      return Ok(Vec::new());
    }

    let mut held: HashMap<AchievementId, i64> = HashMap::new();
    for ua in self.store.list_user_achievements(user).await.map_err(Error::store)? {
      let n = held.entry(ua.achievement_id).or_default();
      *n = (*n).max(ua.instance);
    }

    let mut activities: Option<Vec<UserActivity>> = None;
    let mut awards = Vec::new();
    for achievement in candidates {
      let have = held.get(&achievement.id).copied().unwrap_or(0);
      if have > 0 && !achievement.repeatable {
        continue;
      }
      let rule = match achievement.rule() {
        Ok(rule) => rule,
        Err(e) => {
          warn!(achievement = %achievement.code, error = %e, "skipping achievement with a bad rule");
          continue;
        }
      };
      if activities.is_none() {
        activities =
          Some(self.store.list_activities_for_user(user).await.map_err(Error::store)?);
      }
      let history = activities.as_deref().unwrap_or_default();
      let value = rule_value(&rule, history, self.config.achievement_streak_offset_minutes);
      let earned = earned_instances(achievement, &rule, value);

      for instance in (have + 1)..=earned {
        let award = Award {
          user_id: user,
          achievement_id: achievement.id,
          code: achievement.code.clone(),
          instance,
        };
        if dry_run {
          awards.push(award);
        } else if self
          .store
          .award_achievement(user, achievement.id, instance, at)
          .await
          .map_err(Error::store)?
        {
          info!(user, achievement = %achievement.code, instance, "achievement awarded");
          awards.push(award);
        }
      }
    }
    Ok(awards)
  }

  /// Re-evaluate one user or every user, a page of
  /// [`RECOMPUTE_BATCH`] at a time. Cancellation is honoured between pages;
  /// awards persisted before it stay.
  pub async fn recompute_achievements(
    &self,
    ctx: &RequestContext,
    scope: RecomputeScope,
  ) -> Result<RecomputeReport> {
    self.require_permission(ctx, keys::ADMIN_ACHIEVEMENTS, PermissionTarget::global()).await?;

    let subset = match scope.achievement_id {
      Some(id) => {
        let achievement = self
          .store
          .get_achievement(id)
          .await
          .map_err(Error::store)?
          .ok_or(Error::NotFound { kind: "achievement", id })?;
        Some(vec![achievement])
      }
      None => None,
    };
    let at = Utc::now();
    let mut report = RecomputeReport { dry_run: scope.dry_run, ..Default::default() };

    if let Some(user) = scope.user_id.filter(|id| *id > 0) {
      ctx.ensure_active()?;
      report.awards = self.evaluate_for_user(user, at, subset.as_deref(), scope.dry_run).await?.len();
      report.users = 1;
      return Ok(report);
    }

    let mut offset = 0;
    loop {
      if let Err(e) = ctx.ensure_active() {
        info!(users = report.users, awards = report.awards, "achievement recompute cancelled");
        return Err(e);
      }
      let ids = self.store.list_user_ids(RECOMPUTE_BATCH, offset).await.map_err(Error::store)?;
      for &user in &ids {
        report.awards += self.evaluate_for_user(user, at, subset.as_deref(), scope.dry_run).await?.len();
        report.users += 1;
      }
      if ids.len() < RECOMPUTE_BATCH {
        break;
      }
      offset += RECOMPUTE_BATCH;
    }
    info!(users = report.users, awards = report.awards, dry_run = scope.dry_run, "achievements recomputed");
    Ok(report)
  }

  pub async fn list_achievements(&self, ctx: &RequestContext) -> Result<Vec<Achievement>> {
    self.require_permission(ctx, keys::ADMIN_ACHIEVEMENTS, PermissionTarget::global()).await?;
    self.store.list_achievements().await.map_err(Error::store)
  }

  /// Create or update an achievement by code. The rule must parse.
  pub async fn save_achievement(
    &self,
    ctx: &RequestContext,
    achievement: NewAchievement,
  ) -> Result<Achievement> {
    self.require_permission(ctx, keys::ADMIN_ACHIEVEMENTS, PermissionTarget::global()).await?;
    if achievement.code.trim().is_empty() {
      return Err(Error::validation("achievement code is required"));
    }
    AchievementRule::parse(&achievement.rule_json)?;
    ctx.ensure_active()?;
    let saved = self.store.save_achievement(achievement).await.map_err(Error::store)?;
    self.invalidate_achievements();
    Ok(saved)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use arrels_core::{
    achievement::{AchievementDomain, AchievementRule, NewAchievement, Rarity, Visibility},
    activity::{ActivityStatus, UserActivity},
    store::{AchievementRepository, PointsRepository},
  };
  use chrono::{NaiveDate, TimeZone, Utc};
  use tokio_util::sync::CancellationToken;

  use super::*;
  use crate::{
    points::ActivityInput,
    testutil::{admin, ctx, engine, user},
  };

  fn achievement(code: &str, rule: &str, repeatable: bool) -> NewAchievement {
    NewAchievement {
      code: code.into(),
      name: code.into(),
      description: None,
      rarity: Rarity::Common,
      visibility: Visibility::Visible,
      domain: AchievementDomain::Documentals,
      enabled: true,
      repeatable,
      icon: None,
      rule_json: rule.into(),
    }
  }

  fn at(day: u32, hour: u32) -> UserActivity {
    UserActivity {
      id: 0,
      user_id: 1,
      rule_id: None,
      rule_code: None,
      action: "indexar".into(),
      object_type: "llibre".into(),
      object_id: None,
      points: 1,
      status: ActivityStatus::Validat,
      moderated_by: None,
      details: String::new(),
      created_at: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
    }
  }

  #[test]
  fn streak_counts_consecutive_days() {
    let rule = AchievementRule::parse(r#"{"type":"streak","threshold":3}"#).unwrap();
    let history = vec![at(1, 10), at(2, 9), at(2, 18), at(3, 23), at(5, 8)];
    assert_eq!(rule_value(&rule, &history, 0), 3);

    // Two hours east, the 23:00 activity falls on the 4th and joins the 5th.
    assert_eq!(rule_value(&rule, &history, 120), 2);
  }

  #[test]
  fn longest_run_handles_gaps() {
    let d = |n| NaiveDate::from_ymd_opt(2024, 1, n).unwrap();
    let days = BTreeSet::from([d(1), d(3), d(4), d(5), d(9)]);
    assert_eq!(longest_run(&days), 3);
    assert_eq!(longest_run(&BTreeSet::new()), 0);
  }

  #[tokio::test]
  async fn count_rule_awards_once_at_threshold() {
    let (gov, store) = engine().await;
    let u4 = user(&store, "u4").await;
    let rule = r#"{"type":"count","filters":{"action":["indexar"],"status":["validat"]},"threshold":10}"#;
    let a = store.save_achievement(achievement("indexador", rule, false)).await.unwrap();

    for _ in 0..9 {
      store
        .create_activity(arrels_core::activity::NewActivity {
          user_id: u4,
          rule_id: None,
          action: "indexar".into(),
          object_type: "llibre".into(),
          object_id: None,
          points: 0,
          status: ActivityStatus::Validat,
          moderated_by: None,
          details: String::new(),
          created_at: Utc::now(),
        })
        .await
        .unwrap();
    }
    for _ in 0..2 {
      gov
        .register_activity(ActivityInput::new(u4, "indexar", "llibre", None).status(ActivityStatus::Anulat))
        .await
        .unwrap();
    }
    assert!(gov.evaluate_for_user(u4, Utc::now(), None, false).await.unwrap().is_empty());

    // Registering the tenth validated activity evaluates immediately.
    gov.register_activity(ActivityInput::new(u4, "indexar", "llibre", None)).await.unwrap();
    let held = store.list_user_achievements(u4).await.unwrap();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].achievement_id, a.id);

    assert!(gov.evaluate_for_user(u4, Utc::now(), None, false).await.unwrap().is_empty());
    assert_eq!(store.list_user_achievements(u4).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn repeatable_awards_each_multiple() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    store
      .save_achievement(achievement("serial", r#"{"type":"count","threshold":2}"#, true))
      .await
      .unwrap();
    for _ in 0..5 {
      gov.register_activity(ActivityInput::new(u, "crear", "persona", None)).await.unwrap();
    }
    let held = store.list_user_achievements(u).await.unwrap();
    let instances: Vec<i64> = held.iter().map(|h| h.instance).collect();
    assert_eq!(instances.len(), 2);
    assert!(instances.contains(&1) && instances.contains(&2));
  }

  #[tokio::test]
  async fn dry_run_recompute_persists_nothing() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let u = user(&store, "u").await;
    for _ in 0..3 {
      gov.register_activity(ActivityInput::new(u, "crear", "persona", None)).await.unwrap();
    }
    // Saved after the activities, so nothing was awarded on the way in.
    gov
      .save_achievement(&ctx(boss), achievement("tres", r#"{"type":"count","threshold":3}"#, false))
      .await
      .unwrap();

    let scope = RecomputeScope { dry_run: true, ..Default::default() };
    let report = gov.recompute_achievements(&ctx(boss), scope).await.unwrap();
    assert_eq!(report.users, 2);
    assert_eq!(report.awards, 1);
    assert!(store.list_user_achievements(u).await.unwrap().is_empty());

    let scope = RecomputeScope { user_id: Some(u), ..Default::default() };
    let report = gov.recompute_achievements(&ctx(boss), scope).await.unwrap();
    assert_eq!((report.users, report.awards), (1, 1));
    assert_eq!(store.list_user_achievements(u).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn cancelled_recompute_stops_before_first_batch() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = ctx(boss).with_cancel(token);
    let err = gov.recompute_achievements(&ctx, RecomputeScope::default()).await.unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
  }

  #[tokio::test]
  async fn bad_rules_are_rejected_on_save() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let err = gov
      .save_achievement(&ctx(boss), achievement("x", r#"{"type":"sum","threshold":1}"#, false))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Validation);
  }
}
