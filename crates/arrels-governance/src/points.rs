//! Activity registration and point totals.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use arrels_core::{
  UserId,
  activity::{ActivityId, ActivityStatus, NewActivity, NewPointsRule, PointsRule, UserActivity},
  policy::{PermissionTarget, keys},
  store::Store,
};

use crate::{Error, Governance, RequestContext, Result};

/// A domain action to record.
#[derive(Debug, Clone)]
pub struct ActivityInput {
  pub user_id:      UserId,
  /// Points rule to resolve; blank means no points.
  pub rule_code:    Option<String>,
  pub action:       String,
  pub object_type:  String,
  pub object_id:    Option<i64>,
  /// Defaults to `validat`.
  pub status:       Option<ActivityStatus>,
  pub moderated_by: Option<UserId>,
  pub details:      String,
}

impl ActivityInput {
  pub fn new(user_id: UserId, action: &str, object_type: &str, object_id: Option<i64>) -> Self {
    Self {
      user_id,
      rule_code: None,
      action: action.to_owned(),
      object_type: object_type.to_owned(),
      object_id,
      status: None,
      moderated_by: None,
      details: String::new(),
    }
  }

  pub fn rule(mut self, code: impl Into<String>) -> Self {
    self.rule_code = Some(code.into());
    self
  }

  pub fn status(mut self, status: ActivityStatus) -> Self {
    self.status = Some(status);
    self
  }

  pub fn details(mut self, details: impl Into<String>) -> Self {
    self.details = details.into();
    self
  }
}

impl<S: Store> Governance<S> {
  /// Record an activity, crediting its rule's points when it is `validat`.
  /// The activity and the credit are stored together or not at all.
  pub async fn register_activity(&self, input: ActivityInput) -> Result<UserActivity> {
    let code = input.rule_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let rule = match code {
      Some(code) => self.store.get_active_rule_by_code(code.to_owned()).await.map_err(Error::store)?,
      None => None,
    };
    let created_at = Utc::now();
    let activity = self
      .store
      .create_activity(NewActivity {
        user_id: input.user_id,
        rule_id: rule.as_ref().map(|r| r.id),
        action: input.action,
        object_type: input.object_type,
        object_id: input.object_id,
        points: rule.as_ref().map_or(0, |r| r.points),
        status: input.status.unwrap_or_default(),
        moderated_by: input.moderated_by,
        details: input.details,
        created_at,
      })
      .await
      .map_err(Error::store)?;

    if activity.status == ActivityStatus::Validat {
      debug!(user = activity.user_id, activity = activity.id, points = activity.points, "activity credited");
      self.evaluate_after_activity(activity.user_id, created_at).await;
    }
    Ok(activity)
  }

  /// `pendent → validat`, crediting the points. Idempotent.
  pub async fn validate_activity(&self, id: ActivityId, moderator: UserId) -> Result<UserActivity> {
    let previous = self
      .store
      .set_activity_status(id, ActivityStatus::Validat, Some(moderator))
      .await
      .map_err(Error::store)?;
    let activity = self.activity(id).await?;
    if previous.is_some() {
      self.evaluate_after_activity(activity.user_id, Utc::now()).await;
    }
    Ok(activity)
  }

  /// Move an activity to `anulat`. Points already credited for it are
  /// withdrawn.
  pub async fn cancel_activity(&self, id: ActivityId, moderator: UserId) -> Result<UserActivity> {
    let previous = self
      .store
      .set_activity_status(id, ActivityStatus::Anulat, Some(moderator))
      .await
      .map_err(Error::store)?;
    let activity = self.activity(id).await?;
    if previous == Some(ActivityStatus::Validat) {
      debug!(user = activity.user_id, activity = activity.id, points = activity.points, "credit withdrawn");
    }
    Ok(activity)
  }

  /// Rebuild every total from validated activities of active rules.
  pub async fn recalc_user_points(&self, ctx: &RequestContext) -> Result<usize> {
    self.require_permission(ctx, keys::ADMIN_PUNTS, PermissionTarget::global()).await?;
    ctx.ensure_active()?;
    let users = self.store.recalc_user_points().await.map_err(Error::store)?;
    info!(users, "user points recalculated");
    Ok(users)
  }

  pub async fn user_points(&self, user: UserId) -> Result<i64> {
    self.store.get_user_points(user).await.map_err(Error::store)
  }

  pub async fn list_points_rules(&self, ctx: &RequestContext) -> Result<Vec<PointsRule>> {
    self.require_permission(ctx, keys::ADMIN_PUNTS, PermissionTarget::global()).await?;
    self.store.list_points_rules().await.map_err(Error::store)
  }

  pub async fn save_points_rule(&self, ctx: &RequestContext, rule: NewPointsRule) -> Result<PointsRule> {
    self.require_permission(ctx, keys::ADMIN_PUNTS, PermissionTarget::global()).await?;
    if rule.code.trim().is_empty() {
      return Err(Error::validation("rule code is required"));
    }
    ctx.ensure_active()?;
    self.store.save_points_rule(rule).await.map_err(Error::store)
  }

  /// Activities of `object_type`/`object_id` still `pendent`, optionally
  /// narrowed to one `details` marker.
  pub(crate) async fn pending_activities(
    &self,
    object_type: &str,
    object_id: i64,
    details: Option<&str>,
  ) -> Result<Vec<UserActivity>> {
    let all = self
      .store
      .list_activities_for_object(object_type.to_owned(), object_id)
      .await
      .map_err(Error::store)?;
    Ok(
      all
        .into_iter()
        .filter(|a| a.status == ActivityStatus::Pendent)
        .filter(|a| details.is_none_or(|d| a.details == d))
        .collect(),
    )
  }

  /// Validate or cancel the pending activities tied to a moderated object.
  /// Failures are logged: the moderation itself already happened.
  pub(crate) async fn settle_activities(
    &self,
    object_type: &str,
    object_id: i64,
    details: Option<&str>,
    moderator: UserId,
    approve: bool,
  ) {
    let pending = match self.pending_activities(object_type, object_id, details).await {
      Ok(pending) => pending,
      Err(e) => {
        warn!(object_type, object_id, error = %e, "could not load pending activities");
        return;
      }
    };
    for activity in pending {
      let result = if approve {
        self.validate_activity(activity.id, moderator).await
      } else {
        self.cancel_activity(activity.id, moderator).await
      };
      if let Err(e) = result {
        warn!(activity = activity.id, error = %e, "could not settle activity");
      }
    }
  }

  async fn activity(&self, id: ActivityId) -> Result<UserActivity> {
    self
      .store
      .get_activity(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "activity", id })
  }

  async fn evaluate_after_activity(&self, user: UserId, at: DateTime<Utc>) {
    if let Err(e) = self.evaluate_for_user(user, at, None, false).await {
      warn!(user, error = %e, "achievement evaluation failed");
    }
  }
}
