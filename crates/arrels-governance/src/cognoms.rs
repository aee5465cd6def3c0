//! Surname canonicalisation, merge suggestions and surname lookups.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use arrels_core::{
  EntityKind, ModerationState,
  activity::ActivityStatus,
  cognom::{
    CognomHit, CognomId, CognomRedirect, CognomRedirectSuggestion, HeatmapCell, MAX_REDIRECT_STEPS,
    NewSuggestion, SuggestionId, SuggestionState,
  },
  fields::parse_id_list,
  policy::{PermissionTarget, keys},
  store::Store,
  wiki::ObjectType,
};

use crate::{Error, Governance, RequestContext, Result, points::ActivityInput};

/// Rule code and object type of the activity a merge suggestion records.
pub const MERGE_ACTIVITY: &str = "cognom_merge";

/// Split a free-form alias list on commas, semicolons and whitespace.
/// Non-positive and repeated ids are dropped; order is kept.
pub fn parse_alias_list(text: &str) -> Vec<CognomId> { parse_id_list(text) }

/// Where a surname id resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolved {
  pub canonical:  CognomId,
  /// The starting id was an alias.
  pub redirected: bool,
}

/// Outcome of [`Governance::surname_heatmap`].
#[derive(Debug, Clone, Serialize)]
pub struct Heatmap {
  pub canonical: CognomId,
  pub forms:     Vec<String>,
  pub cells:     Vec<HeatmapCell>,
}

impl<S: Store> Governance<S> {
  /// Follow redirects from `id` for at most [`MAX_REDIRECT_STEPS`] hops,
  /// stopping at the first id without a redirect or already visited.
  pub async fn resolve_canonical(&self, id: CognomId) -> Result<Resolved> {
    let mut visited = HashSet::from([id]);
    let mut current = id;
    for _ in 0..MAX_REDIRECT_STEPS {
      let Some(redirect) = self.store.get_cognom_redirect(current).await.map_err(Error::store)? else {
        break;
      };
      if !visited.insert(redirect.to_id) {
        debug!(from = id, at = current, "redirect cycle; stopping");
        break;
      }
      current = redirect.to_id;
    }
    Ok(Resolved { canonical: current, redirected: current != id })
  }

  /// `id`, or the canonical surname when it names a merged surname alias.
  /// Other object types pass through.
  pub(crate) async fn canonical_object(&self, object_type: ObjectType, id: i64) -> Result<i64> {
    if object_type != ObjectType::Cognom {
      return Ok(id);
    }
    Ok(self.resolve_canonical(id).await?.canonical)
  }

  async fn forma(&self, id: CognomId) -> Result<String> {
    let entity = self
      .store
      .get_entity(EntityKind::Cognom, id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "cognom", id })?;
    Ok(entity.snapshot.display("forma"))
  }

  /// Record pending suggestions that each id of `aliases` is an alias of
  /// `to`. Returns how many were created.
  pub async fn suggest_merge(
    &self,
    ctx: &RequestContext,
    to: CognomId,
    aliases: &[CognomId],
    reason: Option<String>,
  ) -> Result<usize> {
    let canonical = self.resolve_canonical(to).await?.canonical;
    self.forma(canonical).await?;
    let reason = reason.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty());

    let mut created = 0;
    for &alias in aliases {
      if alias <= 0 || alias == canonical {
        continue;
      }
      if self.store.get_cognom_redirect(alias).await.map_err(Error::store)?.is_some() {
        continue;
      }
      if self.store.has_pending_suggestion(alias, canonical).await.map_err(Error::store)? {
        continue;
      }
      if self.store.get_entity(EntityKind::Cognom, alias).await.map_err(Error::store)?.is_none() {
        debug!(alias, "ignoring unknown surname in merge suggestion");
        continue;
      }
      ctx.ensure_active()?;
      let suggestion = self
        .store
        .create_redirect_suggestion(NewSuggestion {
          from_id:    alias,
          to_id:      canonical,
          reason:     reason.clone(),
          created_by: ctx.user_id,
        })
        .await
        .map_err(Error::store)?;
      let activity = ActivityInput::new(ctx.user_id, "crear", MERGE_ACTIVITY, Some(suggestion.id))
        .rule(MERGE_ACTIVITY)
        .status(ActivityStatus::Pendent);
      if let Err(e) = self.register_activity(activity).await {
        warn!(suggestion = suggestion.id, error = %e, "could not record merge suggestion activity");
      }
      created += 1;
    }
    Ok(created)
  }

  /// Store `alias → canonical` after checking it closes no cycle.
  async fn write_redirect(
    &self,
    ctx: &RequestContext,
    alias: CognomId,
    canonical: CognomId,
    reason: Option<String>,
  ) -> Result<CognomRedirect> {
    if alias <= 0 || canonical <= 0 {
      return Err(Error::validation("surname ids must be positive"));
    }
    if alias == canonical {
      return Err(Error::conflict("a surname cannot redirect to itself"));
    }
    self.forma(alias).await?;
    self.forma(canonical).await?;

    // Walk the chain starting at the new target: reaching the alias, or
    // running past the hop limit, means the redirect would close a cycle.
    let mut current = canonical;
    let mut steps = 0;
    while let Some(next) = self.store.get_cognom_redirect(current).await.map_err(Error::store)? {
      if next.to_id == alias {
        return Err(Error::conflict(format!("redirect {alias} → {canonical} would create a cycle")));
      }
      steps += 1;
      if steps >= MAX_REDIRECT_STEPS {
        return Err(Error::conflict(format!("redirect chain from {canonical} is too long")));
      }
      current = next.to_id;
    }

    ctx.ensure_active()?;
    let redirect = CognomRedirect {
      from_id: alias,
      to_id: canonical,
      reason,
      created_by: Some(ctx.user_id),
      created_at: Utc::now(),
    };
    self.store.set_cognom_redirect(redirect.clone()).await.map_err(Error::store)?;
    info!(alias, canonical, by = ctx.user_id, "surname redirect stored");
    Ok(redirect)
  }

  /// Make `alias` resolve to `canonical` directly.
  pub async fn materialize_merge(
    &self,
    ctx: &RequestContext,
    alias: CognomId,
    canonical: CognomId,
    reason: Option<String>,
  ) -> Result<CognomRedirect> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    self.write_redirect(ctx, alias, canonical, reason).await
  }

  pub async fn list_merge_suggestions(
    &self,
    ctx: &RequestContext,
    state: Option<SuggestionState>,
  ) -> Result<Vec<CognomRedirectSuggestion>> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    self.store.list_redirect_suggestions(state).await.map_err(Error::store)
  }

  pub async fn list_redirects(&self, ctx: &RequestContext) -> Result<Vec<CognomRedirect>> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    self.store.list_cognom_redirects().await.map_err(Error::store)
  }

  /// Materialise a pending suggestion and validate its activity.
  pub async fn accept_suggestion(&self, ctx: &RequestContext, id: SuggestionId) -> Result<CognomRedirect> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    let suggestion = self.pending_suggestion(id).await?;
    let redirect =
      self.write_redirect(ctx, suggestion.from_id, suggestion.to_id, suggestion.reason).await?;
    if !self
      .store
      .set_suggestion_state(id, SuggestionState::Acceptat, ctx.user_id, Utc::now())
      .await
      .map_err(Error::store)?
    {
      return Err(Error::conflict(format!("suggestion {id} is no longer pending")));
    }
    self.settle_activities(MERGE_ACTIVITY, id, None, ctx.user_id, true).await;
    Ok(redirect)
  }

  pub async fn reject_suggestion(&self, ctx: &RequestContext, id: SuggestionId) -> Result<()> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    self.pending_suggestion(id).await?;
    ctx.ensure_active()?;
    if !self
      .store
      .set_suggestion_state(id, SuggestionState::Rebutjat, ctx.user_id, Utc::now())
      .await
      .map_err(Error::store)?
    {
      return Err(Error::conflict(format!("suggestion {id} is no longer pending")));
    }
    self.settle_activities(MERGE_ACTIVITY, id, None, ctx.user_id, false).await;
    info!(suggestion = id, by = ctx.user_id, "merge suggestion rejected");
    Ok(())
  }

  pub async fn delete_redirect(&self, ctx: &RequestContext, alias: CognomId) -> Result<bool> {
    self.require_permission(ctx, keys::COGNOMS_MERGE, PermissionTarget::global()).await?;
    ctx.ensure_active()?;
    self.store.delete_cognom_redirect(alias).await.map_err(Error::store)
  }

  async fn pending_suggestion(&self, id: SuggestionId) -> Result<CognomRedirectSuggestion> {
    let suggestion = self
      .store
      .get_redirect_suggestion(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "suggestion", id })?;
    if suggestion.state != SuggestionState::Pendent {
      return Err(Error::conflict(format!("suggestion {id} is already {}", suggestion.state)));
    }
    Ok(suggestion)
  }

  // ─── Lookups ────────────────────────────────────────────────────────────

  /// Prefix search over forms and variants. Hits on aliases are reported
  /// under their canonical surname, once per canonical id.
  pub async fn search_surnames(&self, q: &str, limit: usize) -> Result<Vec<CognomHit>> {
    let q = q.trim();
    if q.is_empty() {
      return Ok(Vec::new());
    }
    let hits = self.store.search_cognoms(q.to_owned(), limit).await.map_err(Error::store)?;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
      let resolved = self.resolve_canonical(hit.cognom_id).await?;
      if !seen.insert(resolved.canonical) {
        continue;
      }
      if resolved.redirected {
        let matched = hit.variant.unwrap_or(hit.forma);
        out.push(CognomHit {
          cognom_id: resolved.canonical,
          forma:     self.forma(resolved.canonical).await?,
          variant:   Some(matched),
        });
      } else {
        out.push(hit);
      }
    }
    Ok(out)
  }

  /// Published persons per municipality carrying the canonical form of
  /// `id`, or one of its variants, as either surname.
  pub async fn surname_heatmap(&self, id: CognomId, y0: Option<i64>, y1: Option<i64>) -> Result<Heatmap> {
    let canonical = self.resolve_canonical(id).await?.canonical;
    let entity = self
      .store
      .get_entity(EntityKind::Cognom, canonical)
      .await
      .map_err(Error::store)?
      .filter(|e| e.moderation.state == ModerationState::Publicat)
      .ok_or(Error::NotFound { kind: "cognom", id: canonical })?;
    let mut forms = vec![entity.snapshot.display("forma")];
    for v in self.store.list_cognom_variants(canonical).await.map_err(Error::store)? {
      if !forms.iter().any(|f| f.eq_ignore_ascii_case(&v.variant)) {
        forms.push(v.variant);
      }
    }
    let (y0, y1) = match (y0, y1) {
      (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
      other => other,
    };
    let cells = self.store.cognom_heatmap(forms.clone(), y0, y1).await.map_err(Error::store)?;
    Ok(Heatmap { canonical, forms, cells })
  }

  pub async fn add_variant(&self, ctx: &RequestContext, id: CognomId, variant: &str) -> Result<()> {
    self.require_permission(ctx, keys::COGNOMS_EDIT, PermissionTarget::global()).await?;
    let variant = variant.trim();
    if variant.is_empty() {
      return Err(Error::validation("variant is required"));
    }
    let canonical = self.resolve_canonical(id).await?.canonical;
    self.forma(canonical).await?;
    ctx.ensure_active()?;
    match self.store.add_cognom_variant(canonical, variant.to_owned()).await.map_err(Error::store)? {
      Some(_) => Ok(()),
      None => Err(Error::conflict(format!("surname {canonical} already has variant {variant:?}"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use arrels_core::{
    EntityKind,
    activity::{ActivityStatus, NewPointsRule},
    cognom::{CognomRedirect, SuggestionState},
    store::{CognomRepository, PointsRepository},
  };
  use std::sync::Arc;

  use chrono::Utc;
  use serde_json::json;

  use super::*;
  use crate::testutil::{admin, ctx, engine, published, user};

  async fn redirect(store: &arrels_store_sqlite::SqliteStore, from: i64, to: i64) {
    store
      .set_cognom_redirect(CognomRedirect {
        from_id: from,
        to_id: to,
        reason: None,
        created_by: None,
        created_at: Utc::now(),
      })
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn chains_resolve_and_cycles_are_rejected() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let mut ids = Vec::new();
    for forma in ["Puig", "Puch", "Pujol"] {
      ids.push(published(&store, EntityKind::Cognom, json!({"forma": forma})).await);
    }
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    redirect(&store, a, b).await;
    redirect(&store, b, c).await;

    assert_eq!(gov.resolve_canonical(a).await.unwrap(), Resolved { canonical: c, redirected: true });
    assert_eq!(gov.resolve_canonical(c).await.unwrap(), Resolved { canonical: c, redirected: false });

    let err = gov.materialize_merge(&ctx(boss), c, a, None).await.unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    assert!(store.get_cognom_redirect(c).await.unwrap().is_none());

    let err = gov.materialize_merge(&ctx(boss), c, c, None).await.unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn resolution_terminates_on_stored_cycles() {
    let (gov, store) = engine().await;
    redirect(&store, 1, 2).await;
    redirect(&store, 2, 1).await;
    let resolved = gov.resolve_canonical(1).await.unwrap();
    assert_eq!(resolved.canonical, 2);
  }

  #[tokio::test]
  async fn suggestions_skip_canonical_redirected_and_duplicates() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    let boss = admin(&store).await;
    store
      .save_points_rule(NewPointsRule {
        code:        MERGE_ACTIVITY.into(),
        name:        "merge".into(),
        description: None,
        points:      4,
        active:      true,
      })
      .await
      .unwrap();
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Vila"})).await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Villa"})).await;
    let already = published(&store, EntityKind::Cognom, json!({"forma": "Bila"})).await;
    redirect(&store, already, canonical).await;

    let aliases = parse_alias_list(&format!("{canonical}, {alias};{already} {alias} -3"));
    let created = gov.suggest_merge(&ctx(u), canonical, &aliases, Some("grafia".into())).await.unwrap();
    assert_eq!(created, 1);
    let again = gov.suggest_merge(&ctx(u), canonical, &[alias], None).await.unwrap();
    assert_eq!(again, 0);

    let pending = gov.list_merge_suggestions(&ctx(boss), Some(SuggestionState::Pendent)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(gov.user_points(u).await.unwrap(), 0);

    gov.accept_suggestion(&ctx(boss), pending[0].id).await.unwrap();
    assert_eq!(gov.resolve_canonical(alias).await.unwrap().canonical, canonical);
    assert_eq!(gov.user_points(u).await.unwrap(), 4);
    let activities = store.list_activities_for_user(u).await.unwrap();
    assert_eq!(activities[0].status, ActivityStatus::Validat);

    let err = gov.reject_suggestion(&ctx(boss), pending[0].id).await.unwrap_err();
    assert_eq!(err.kind(), crate::ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn search_reports_aliases_under_canonical() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Ferrer"})).await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Ferré"})).await;
    gov.materialize_merge(&ctx(boss), alias, canonical, None).await.unwrap();

    let hits = gov.search_surnames("Ferr", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].cognom_id, canonical);
    assert_eq!(hits[0].forma, "Ferrer");
  }

  #[tokio::test]
  async fn heatmap_counts_variants() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let cognom = published(&store, EntityKind::Cognom, json!({"forma": "Soler"})).await;
    gov.add_variant(&ctx(boss), cognom, "Solé").await.unwrap();
    assert!(gov.add_variant(&ctx(boss), cognom, "Solé").await.is_err());
    let vic = published(&store, EntityKind::Municipi, json!({"nom": "Vic"})).await;
    for (cognom1, any) in [("Soler", 1801), ("Solé", 1850), ("Soler", 1950)] {
      published(
        &store,
        EntityKind::Persona,
        json!({"nom": "Anna", "cognom1": cognom1, "any_naixement": any, "municipi_id": vic}),
      )
      .await;
    }

    let map = gov.surname_heatmap(cognom, Some(1900), Some(1800)).await.unwrap();
    assert_eq!(map.forms, vec!["Soler".to_owned(), "Solé".to_owned()]);
    assert_eq!(map.cells.len(), 1);
    assert_eq!(map.cells[0].persones, 2);
  }

  #[tokio::test]
  async fn suggestion_survives_a_failed_activity_record() {
    let path = std::env::temp_dir().join(format!("arrels-merge-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let store = Arc::new(arrels_store_sqlite::SqliteStore::open(&path).await.unwrap());
    let gov = Governance::new(Arc::clone(&store), crate::GovernanceConfig::default());
    rusqlite::Connection::open(&path)
      .unwrap()
      .execute_batch(
        "CREATE TRIGGER no_activity BEFORE INSERT ON user_activity
           BEGIN SELECT RAISE(ABORT, 'activity log offline'); END;",
      )
      .unwrap();

    let u = user(&store, "u").await;
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Vila"})).await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Villa"})).await;
    let created = gov.suggest_merge(&ctx(u), canonical, &[alias], None).await.unwrap();
    assert_eq!(created, 1);
    assert!(store.has_pending_suggestion(alias, canonical).await.unwrap());
    assert!(store.list_activities_for_user(u).await.unwrap().is_empty());

    drop(gov);
    drop(store);
    let _ = std::fs::remove_file(&path);
  }
}
