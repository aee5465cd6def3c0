//! Administration: achievements, point rules, policies and their
//! assignments.

use std::time::Duration;

use arrels_core::{
  achievement::{Achievement, NewAchievement},
  activity::{NewPointsRule, PointsRule},
  policy::{NewPolicy, Policy, PolicyAssignment},
  store::Store,
};
use arrels_governance::achievements::{RecomputeReport, RecomputeScope};
use axum::{Json, extract::State, response::Redirect};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
  AppState,
  auth::AuthUser,
  csrf::Submission,
  error::{Error, Result},
};

/// Parse an optional enum field, falling back to its default when absent.
fn choice<T: std::str::FromStr + Default>(sub: &Submission, key: &str) -> Result<T> {
  match sub.get(key) {
    None => Ok(T::default()),
    Some(raw) => raw.parse().map_err(|_| Error::BadRequest(format!("invalid {key}: {raw:?}"))),
  }
}

fn required(sub: &Submission, key: &str) -> Result<String> {
  sub.text(key).ok_or_else(|| Error::BadRequest(format!("{key} is required")))
}

// ─── Achievements ────────────────────────────────────────────────────────────

/// `GET /admin/achievements`
pub async fn achievements<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
) -> Result<Json<Vec<Achievement>>> {
  Ok(Json(state.gov.list_achievements(&auth.ctx).await?))
}

/// `POST /admin/achievements`: create or update by `code`.
pub async fn save_achievement<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let achievement = NewAchievement {
    code:        required(&sub, "code")?,
    name:        required(&sub, "name")?,
    description: sub.text("description"),
    rarity:      choice(&sub, "rarity")?,
    visibility:  choice(&sub, "visibility")?,
    domain:      choice(&sub, "domain")?,
    enabled:     sub.flag("enabled"),
    repeatable:  sub.flag("repeatable"),
    icon:        sub.text("icon"),
    rule_json:   required(&sub, "rule_json")?,
  };
  state.gov.save_achievement(&sub.auth.ctx, achievement).await?;
  Ok(Redirect::to("/admin/achievements"))
}

/// `POST /admin/achievements/recompute` with `achievement_id?`, `user_id?`
/// and `dry_run`. Runs inline under the configured timeout; awards made
/// before the timeout stay.
pub async fn recompute<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Json<RecomputeReport>> {
  let scope = RecomputeScope {
    user_id:        sub.id("user_id")?,
    achievement_id: sub.id("achievement_id")?,
    dry_run:        sub.flag("dry_run"),
  };
  let cancel = CancellationToken::new();
  let timeout = Duration::from_secs(state.config.recompute_timeout_secs);
  let timer = tokio::spawn({
    let cancel = cancel.clone();
    async move {
      tokio::time::sleep(timeout).await;
      warn!(?timeout, "achievement recompute timed out");
      cancel.cancel();
    }
  });
  let ctx = sub.auth.ctx.clone().with_cancel(cancel);
  let report = state.gov.recompute_achievements(&ctx, scope).await;
  timer.abort();
  Ok(Json(report?))
}

// ─── Points ──────────────────────────────────────────────────────────────────

/// `GET /admin/punts/regles`
pub async fn points_rules<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
) -> Result<Json<Vec<PointsRule>>> {
  Ok(Json(state.gov.list_points_rules(&auth.ctx).await?))
}

/// `POST /admin/punts/regles`: create or update by `code`.
pub async fn save_points_rule<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let points = sub
    .get("points")
    .unwrap_or("0")
    .parse::<i64>()
    .map_err(|_| Error::BadRequest("points must be an integer".into()))?;
  let rule = NewPointsRule {
    code: required(&sub, "code")?,
    name: required(&sub, "name")?,
    description: sub.text("description"),
    points,
    active: sub.flag("active"),
  };
  state.gov.save_points_rule(&sub.auth.ctx, rule).await?;
  Ok(Redirect::to("/admin/punts/regles"))
}

#[derive(Debug, Serialize)]
pub struct Recalc {
  pub users: usize,
}

/// `POST /admin/punts/regles/recalc`
pub async fn recalc_points<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Json<Recalc>> {
  let users = state.gov.recalc_user_points(&sub.auth.ctx).await?;
  Ok(Json(Recalc { users }))
}

// ─── Policies ────────────────────────────────────────────────────────────────

/// `GET /admin/politiques`
pub async fn policies<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
) -> Result<Json<Vec<Policy>>> {
  Ok(Json(state.gov.list_policies(&auth.ctx).await?))
}

/// `POST /admin/politiques`: create, or overwrite when `id` is given.
pub async fn save_policy<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let policy = NewPolicy {
    id:         sub.id("id")?,
    nom:        required(&sub, "nom")?,
    descripcio: sub.text("descripcio"),
    document:   required(&sub, "document")?,
  };
  state.gov.save_policy(&sub.auth.ctx, policy).await?;
  Ok(Redirect::to("/admin/politiques"))
}

/// `GET /admin/politiques/assignacions`
pub async fn assignments<S: Store + 'static>(
  State(state): State<AppState<S>>,
  auth: AuthUser,
) -> Result<Json<Vec<PolicyAssignment>>> {
  Ok(Json(state.gov.list_policy_assignments(&auth.ctx).await?))
}

/// `accio=treure` removes; anything else assigns.
fn removing(sub: &Submission) -> bool { sub.get("accio") == Some("treure") }

/// `POST /admin/politiques/assignacions/user` with `policy_id`, `user_id`
/// and optional `accio`.
pub async fn assign_user<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let (policy, user) = (sub.require_id("policy_id")?, sub.require_id("user_id")?);
  if removing(&sub) {
    state.gov.unassign_policy_from_user(&sub.auth.ctx, policy, user).await?;
  } else {
    state.gov.assign_policy_to_user(&sub.auth.ctx, policy, user).await?;
  }
  Ok(Redirect::to("/admin/politiques/assignacions"))
}

/// `POST /admin/politiques/assignacions/grup` with `policy_id`, `group_id`
/// and optional `accio`.
pub async fn assign_group<S: Store + 'static>(
  State(state): State<AppState<S>>,
  sub: Submission,
) -> Result<Redirect> {
  let (policy, group) = (sub.require_id("policy_id")?, sub.require_id("group_id")?);
  if removing(&sub) {
    state.gov.unassign_policy_from_group(&sub.auth.ctx, policy, group).await?;
  } else {
    state.gov.assign_policy_to_group(&sub.auth.ctx, policy, group).await?;
  }
  Ok(Redirect::to("/admin/politiques/assignacions"))
}
