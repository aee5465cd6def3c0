//! Entity creation, direct edits and moderation transitions.
//!
//! New rows enter `pendent` and stay editable by their author and by
//! moderators. Once `publicat`, kinds with a wiki object type only change
//! through proposals; the others are edited in place by holders of their
//! edit key. `rebutjat` is terminal.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use arrels_core::{
  EntityKind, ModerationState, Snapshot, StoredEntity,
  activity::ActivityStatus,
  moderation::ModerationUpdate,
  policy::{PermissionTarget, keys},
  store::{EntityFilter, Store},
  territory::check_not_self_parent,
  wiki::{ChangeId, WikiChange},
};

use crate::{
  Error, Governance, RequestContext, Result,
  points::ActivityInput,
  policy::{edit_key, entity_target, merge_masks, view_key},
  wiki::change_marker,
};

/// Rule code, and activity marker, of creating an entity of `kind`.
pub fn create_rule(kind: EntityKind) -> String { format!("{kind}_create") }

/// A loaded entity the caller may see.
pub(crate) struct Access {
  pub entity:    StoredEntity,
  pub target:    PermissionTarget,
  /// Whether the caller holds the moderation key over the entity.
  pub moderator: bool,
}

/// What an edit did.
#[derive(Debug)]
pub enum EditOutcome {
  /// The live row was written.
  Updated(StoredEntity),
  /// A wiki proposal awaits moderation.
  Proposed(WikiChange),
}

impl<S: Store> Governance<S> {
  /// Load an entity and decide visibility. Anything the caller may not see
  /// is reported as missing.
  pub(crate) async fn access(&self, ctx: &RequestContext, kind: EntityKind, id: i64) -> Result<Access> {
    let entity = self
      .store
      .get_entity(kind, id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "entity", id })?;
    let target = entity_target(kind, Some(id), &entity.snapshot);
    let moderator = self.has_permission(ctx.user_id, keys::MODERACIO, target).await?;
    let mut visible = moderator
      || entity.moderation.state.is_published()
      || entity.moderation.created_by == Some(ctx.user_id)
      || self.has_permission(ctx.user_id, edit_key(kind), target).await?;
    if !visible && let Some(key) = view_key(kind) {
      visible = self.has_permission(ctx.user_id, key, target).await?;
    }
    if !visible {
      return Err(Error::NotFound { kind: "entity", id });
    }
    Ok(Access { entity, target, moderator })
  }

  /// Rules that need other rows: a country's ISO code is unique, and a
  /// hierarchy parent is never the row itself.
  pub(crate) async fn check_entity_rules(&self, kind: EntityKind, id: Option<i64>, snapshot: &Snapshot) -> Result<()> {
    match kind {
      EntityKind::Pais => {
        let iso = snapshot.display("codi_iso2").trim().to_owned();
        if let Some(existing) = self.store.pais_by_iso2(iso.clone()).await.map_err(Error::store)?
          && Some(existing.id) != id
        {
          return Err(Error::conflict(format!("country code {iso} is already used by {}", existing.id)));
        }
      }
      EntityKind::Nivell | EntityKind::Arquebisbat => {
        let parent = snapshot.get("parent_id").and_then(serde_json::Value::as_i64);
        check_not_self_parent(id, parent)?;
      }
      _ => {}
    }
    Ok(())
  }

  pub async fn get_entity(&self, ctx: &RequestContext, kind: EntityKind, id: i64) -> Result<StoredEntity> {
    Ok(self.access(ctx, kind, id).await?.entity)
  }

  /// Create a row in `pendent` and record a pending creation activity.
  pub async fn create_entity(&self, ctx: &RequestContext, kind: EntityKind, snapshot: Snapshot) -> Result<StoredEntity> {
    let snapshot = snapshot.canonical(kind);
    kind.validate_snapshot(&snapshot)?;
    self.check_entity_rules(kind, None, &snapshot).await?;
    self.require_permission(ctx, edit_key(kind), entity_target(kind, None, &snapshot)).await?;
    ctx.ensure_active()?;

    let entity = self
      .store
      .create_entity(kind, snapshot, ctx.user_id, ModerationState::Pendent)
      .await
      .map_err(Error::store)?;
    info!(%kind, id = entity.id, by = ctx.user_id, "entity created");

    let rule = create_rule(kind);
    let activity = ActivityInput::new(ctx.user_id, "crear", kind.as_ref(), Some(entity.id))
      .rule(rule.clone())
      .status(ActivityStatus::Pendent)
      .details(rule);
    if let Err(e) = self.register_activity(activity).await {
      warn!(%kind, id = entity.id, error = %e, "could not record creation activity");
    }
    Ok(entity)
  }

  /// [`Self::create_entity`] from raw form values.
  pub async fn create_entity_form(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    form: &HashMap<String, String>,
  ) -> Result<StoredEntity> {
    let mut snapshot = Snapshot::default().canonical(kind);
    snapshot.overlay_form(kind, form)?;
    self.create_entity(ctx, kind, snapshot).await
  }

  /// Apply form values to an entity according to its state.
  pub async fn edit_entity(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    id: i64,
    form: &HashMap<String, String>,
  ) -> Result<EditOutcome> {
    let id = match kind.object_type() {
      Some(object_type) => self.canonical_object(object_type, id).await?,
      None => id,
    };
    let access = self.access(ctx, kind, id).await?;
    match (access.entity.moderation.state, kind.object_type()) {
      (ModerationState::Publicat, Some(object_type)) => {
        let reason = form.get("motiu").or_else(|| form.get("reason")).cloned();
        let change = self.propose_form(ctx, object_type, id, form, reason).await?;
        Ok(EditOutcome::Proposed(change))
      }
      (ModerationState::Publicat, None) => {
        self.require_permission(ctx, edit_key(kind), access.target).await?;
        self.write_entity(ctx, kind, id, access.entity.snapshot, form).await.map(EditOutcome::Updated)
      }
      (ModerationState::Pendent, _) => {
        self.update_pending_entity(ctx, &access, kind, id, form).await.map(EditOutcome::Updated)
      }
      (ModerationState::Rebutjat, _) => Err(Error::validation("a rejected entity cannot be edited")),
    }
  }

  async fn update_pending_entity(
    &self,
    ctx: &RequestContext,
    access: &Access,
    kind: EntityKind,
    id: i64,
    form: &HashMap<String, String>,
  ) -> Result<StoredEntity> {
    let author = access.entity.moderation.created_by == Some(ctx.user_id);
    if !author && !access.moderator {
      return Err(Error::Denied(edit_key(kind).to_owned()));
    }
    self.write_entity(ctx, kind, id, access.entity.snapshot.clone(), form).await
  }

  async fn write_entity(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    id: i64,
    live: Snapshot,
    form: &HashMap<String, String>,
  ) -> Result<StoredEntity> {
    let mut snapshot = live.canonical(kind);
    snapshot.overlay_form(kind, form)?;
    kind.validate_snapshot(&snapshot)?;
    self.check_entity_rules(kind, Some(id), &snapshot).await?;
    ctx.ensure_active()?;
    let updated = self
      .store
      .update_entity(kind, id, snapshot)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "entity", id })?;
    info!(%kind, id, by = ctx.user_id, "entity updated");
    Ok(updated)
  }

  /// The caller must hold the kind's edit key and the moderation key over
  /// the entity.
  async fn require_moderator(&self, ctx: &RequestContext, kind: EntityKind, access: &Access) -> Result<()> {
    self.require_permission(ctx, edit_key(kind), access.target).await?;
    if access.moderator {
      Ok(())
    } else {
      Err(Error::Denied(keys::MODERACIO.to_owned()))
    }
  }

  async fn moderate_entity(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    id: i64,
    approve: bool,
    motiu: Option<String>,
  ) -> Result<()> {
    let access = self.access(ctx, kind, id).await?;
    self.require_moderator(ctx, kind, &access).await?;
    if access.entity.moderation.state != ModerationState::Pendent {
      return Err(Error::conflict(format!("{kind} {id} is not pending")));
    }
    let state = if approve { ModerationState::Publicat } else { ModerationState::Rebutjat };
    ctx.ensure_active()?;
    let update = ModerationUpdate {
      state,
      moderated_by: ctx.user_id,
      moderated_at: Utc::now(),
      motiu: if approve { None } else { motiu.map(|m| m.trim().to_owned()).filter(|m| !m.is_empty()) },
    };
    if !self.store.set_moderation(kind, id, update).await.map_err(Error::store)? {
      return Err(Error::NotFound { kind: "entity", id });
    }
    info!(%kind, id, moderator = ctx.user_id, %state, "entity moderated");
    self
      .settle_activities(kind.as_ref(), id, Some(&create_rule(kind)), ctx.user_id, approve)
      .await;
    Ok(())
  }

  pub async fn approve_entity(&self, ctx: &RequestContext, kind: EntityKind, id: i64) -> Result<()> {
    self.moderate_entity(ctx, kind, id, true, None).await
  }

  pub async fn reject_entity(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    id: i64,
    motiu: Option<String>,
  ) -> Result<()> {
    self.moderate_entity(ctx, kind, id, false, motiu).await
  }

  async fn pending_change(&self, ctx: &RequestContext, id: ChangeId) -> Result<(WikiChange, Access)> {
    let change = self
      .store
      .get_wiki_change(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "wiki change", id })?;
    let kind = change.object_type.entity_kind();
    let access = self.access(ctx, kind, change.object_id).await?;
    self.require_moderator(ctx, kind, &access).await?;
    if change.moderation_state != ModerationState::Pendent {
      return Err(Error::conflict(format!("wiki change {id} is not pending")));
    }
    Ok((change, access))
  }

  /// Publish a proposal: its `after` replaces the live row and both become
  /// `publicat` in one transaction.
  pub async fn approve_change(&self, ctx: &RequestContext, id: ChangeId) -> Result<StoredEntity> {
    let (change, _) = self.pending_change(ctx, id).await?;
    let history = self
      .store
      .list_wiki_changes(change.object_type, change.object_id)
      .await
      .map_err(Error::store)?;
    if let Some(newer) = history.iter().map(|c| c.id).filter(|c| *c > id).max() {
      warn!(change = id, newer, object_type = %change.object_type, object_id = change.object_id,
        "approving a change out of order");
    }
    ctx.ensure_active()?;
    let entity = self
      .store
      .apply_wiki_change(id, ctx.user_id, Utc::now())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::conflict(format!("wiki change {id} could not be applied")))?;
    info!(change = id, object_type = %change.object_type, object_id = change.object_id,
      moderator = ctx.user_id, "wiki change approved");
    self
      .settle_activities(
        change.object_type.as_ref(),
        change.object_id,
        Some(&change_marker(id)),
        ctx.user_id,
        true,
      )
      .await;
    Ok(entity)
  }

  /// Reject a proposal. The live row is untouched.
  pub async fn reject_change(&self, ctx: &RequestContext, id: ChangeId) -> Result<()> {
    let (change, _) = self.pending_change(ctx, id).await?;
    ctx.ensure_active()?;
    if !self.store.reject_wiki_change(id, ctx.user_id, Utc::now()).await.map_err(Error::store)? {
      return Err(Error::conflict(format!("wiki change {id} is not pending")));
    }
    info!(change = id, object_type = %change.object_type, object_id = change.object_id,
      moderator = ctx.user_id, "wiki change rejected");
    self
      .settle_activities(
        change.object_type.as_ref(),
        change.object_id,
        Some(&change_marker(id)),
        ctx.user_id,
        false,
      )
      .await;
    Ok(())
  }

  /// Delete a row: moderators always, authors while it is pending.
  pub async fn delete_entity(&self, ctx: &RequestContext, kind: EntityKind, id: i64) -> Result<bool> {
    let access = self.access(ctx, kind, id).await?;
    self.require_permission(ctx, edit_key(kind), access.target).await?;
    let author = access.entity.moderation.created_by == Some(ctx.user_id);
    let pending = access.entity.moderation.state == ModerationState::Pendent;
    if !access.moderator && !(author && pending) {
      return Err(Error::Denied(keys::MODERACIO.to_owned()));
    }
    ctx.ensure_active()?;
    let deleted = self.store.delete_entity(kind, id).await.map_err(Error::store)?;
    if deleted {
      info!(%kind, id, by = ctx.user_id, "entity deleted");
    }
    Ok(deleted)
  }

  /// List entities. Without a state filter only published rows are listed;
  /// other states are limited to where the caller moderates, edits or views.
  pub async fn list_entities(
    &self,
    ctx: &RequestContext,
    kind: EntityKind,
    mut filter: EntityFilter,
  ) -> Result<Vec<StoredEntity>> {
    let moderation = self.list_scope(ctx.user_id, keys::MODERACIO).await?;
    let mut privileged = merge_masks(moderation, &self.list_scope(ctx.user_id, edit_key(kind)).await?);
    if let Some(key) = view_key(kind) {
      privileged = merge_masks(privileged, &self.list_scope(ctx.user_id, key).await?);
    }

    match filter.status {
      None | Some(ModerationState::Publicat) => {
        filter.status = Some(ModerationState::Publicat);
        filter.scope = None;
      }
      Some(_) if privileged.is_empty() => return Ok(Vec::new()),
      Some(_) => filter.scope = (!privileged.has_global).then_some(privileged),
    }
    self.store.list_entities(kind, filter).await.map_err(Error::store)
  }

  /// Pending rows of `kind` the caller may moderate.
  pub async fn moderation_list(&self, ctx: &RequestContext, kind: EntityKind) -> Result<Vec<StoredEntity>> {
    let mask = self.list_scope(ctx.user_id, keys::MODERACIO).await?;
    if mask.is_empty() {
      return Err(Error::Denied(keys::MODERACIO.to_owned()));
    }
    let filter = EntityFilter {
      status: Some(ModerationState::Pendent),
      scope: (!mask.has_global).then_some(mask),
      ..Default::default()
    };
    self.store.list_entities(kind, filter).await.map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use arrels_core::{
    activity::NewPointsRule,
    store::{EntityRepository, PointsRepository, WikiRepository},
    wiki::ObjectType,
  };
  use serde_json::json;

  use super::*;
  use crate::{
    ErrorKind,
    testutil::{admin, ctx, engine, grant, published, snap, user},
  };

  fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
  }

  #[tokio::test]
  async fn creation_waits_for_moderation() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let author = user(&store, "autor").await;
    let other = user(&store, "altre").await;
    grant(&store, author, r#"{"persones.edit": "allow"}"#).await;
    store
      .save_points_rule(NewPointsRule {
        code:        "persona_create".into(),
        name:        "Alta de persona".into(),
        description: None,
        points:      5,
        active:      true,
      })
      .await
      .unwrap();

    let p = gov.create_entity(&ctx(author), EntityKind::Persona, snap(json!({"nom": "Maria"}))).await.unwrap();
    assert_eq!(p.moderation.state, ModerationState::Pendent);
    assert_eq!(gov.user_points(author).await.unwrap(), 0);
    gov.get_entity(&ctx(author), EntityKind::Persona, p.id).await.unwrap();
    let err = gov.get_entity(&ctx(other), EntityKind::Persona, p.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = gov.approve_entity(&ctx(author), EntityKind::Persona, p.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);
    gov.approve_entity(&ctx(boss), EntityKind::Persona, p.id).await.unwrap();
    assert_eq!(gov.user_points(author).await.unwrap(), 5);
    gov.get_entity(&ctx(other), EntityKind::Persona, p.id).await.unwrap();

    let err = gov.reject_entity(&ctx(boss), EntityKind::Persona, p.id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn rejection_keeps_motive_and_blocks_edits() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let p = gov.create_entity(&ctx(boss), EntityKind::Persona, snap(json!({"nom": "Maria"}))).await.unwrap();
    gov.reject_entity(&ctx(boss), EntityKind::Persona, p.id, Some(" duplicat ".into())).await.unwrap();
    let stored = store.get_entity(EntityKind::Persona, p.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.state, ModerationState::Rebutjat);
    assert_eq!(stored.moderation.motiu.as_deref(), Some("duplicat"));

    let err = gov.edit_entity(&ctx(boss), EntityKind::Persona, p.id, &form(&[("nom", "Marta")])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }

  #[tokio::test]
  async fn edits_follow_the_entity_state() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;

    let pending = gov.create_entity(&ctx(boss), EntityKind::Persona, snap(json!({"nom": "Maria"}))).await.unwrap();
    let out = gov
      .edit_entity(&ctx(boss), EntityKind::Persona, pending.id, &form(&[("ofici", "teixidora")]))
      .await
      .unwrap();
    assert!(matches!(out, EditOutcome::Updated(ref e) if e.snapshot.display("ofici") == "teixidora"));

    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let out = gov
      .edit_entity(&ctx(boss), EntityKind::Persona, p, &form(&[("ofici", "pagès"), ("motiu", "acta")]))
      .await
      .unwrap();
    let EditOutcome::Proposed(change) = out else { panic!("expected a proposal") };
    assert_eq!(change.metadata.reason.as_deref(), Some("acta"));

    let pais = published(&store, EntityKind::Pais, json!({"nom": "Andorra", "codi_iso2": "AD"})).await;
    let out = gov
      .edit_entity(&ctx(boss), EntityKind::Pais, pais, &form(&[("codi_iso3", "AND")]))
      .await
      .unwrap();
    assert!(matches!(out, EditOutcome::Updated(_)));
  }

  #[tokio::test]
  async fn cross_row_rules() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    published(&store, EntityKind::Pais, json!({"nom": "França", "codi_iso2": "FR"})).await;
    let err = gov
      .create_entity(&ctx(boss), EntityKind::Pais, snap(json!({"nom": "Frància", "codi_iso2": "FR"})))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = gov
      .create_entity(&ctx(boss), EntityKind::Nivell, snap(json!({"nom": "Girona", "nivell": 2, "parent_id": 0})))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let n = gov
      .create_entity(&ctx(boss), EntityKind::Nivell, snap(json!({"nom": "Girona", "nivell": 2})))
      .await
      .unwrap();
    let err = gov
      .edit_entity(&ctx(boss), EntityKind::Nivell, n.id, &form(&[("parent_id", &n.id.to_string())]))
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }

  #[tokio::test]
  async fn rejected_change_cancels_its_activity() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let u = user(&store, "u").await;
    grant(&store, u, r#"{"persones.edit": "allow"}"#).await;
    store
      .save_points_rule(NewPointsRule {
        code:        "wiki_change".into(),
        name:        "Proposta".into(),
        description: None,
        points:      2,
        active:      true,
      })
      .await
      .unwrap();
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let change = gov
      .propose_form(&ctx(u), ObjectType::Persona, p, &form(&[("ofici", "moliner")]), None)
      .await
      .unwrap();
    gov.reject_change(&ctx(boss), change.id).await.unwrap();

    let live = store.get_entity(EntityKind::Persona, p).await.unwrap().unwrap();
    assert_eq!(live.snapshot.display("ofici"), "");
    let stored = store.get_wiki_change(change.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation_state, ModerationState::Rebutjat);
    let activities = store.list_activities_for_object("persona".into(), p).await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].status, ActivityStatus::Anulat);
    assert_eq!(gov.user_points(u).await.unwrap(), 0);

    let err = gov.approve_change(&ctx(boss), change.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
  }

  #[tokio::test]
  async fn approved_change_credits_its_author() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let u = user(&store, "u").await;
    grant(&store, u, r#"{"persones.edit": "allow"}"#).await;
    store
      .save_points_rule(NewPointsRule {
        code:        "wiki_change".into(),
        name:        "Proposta".into(),
        description: None,
        points:      2,
        active:      true,
      })
      .await
      .unwrap();
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let a = gov.propose_form(&ctx(u), ObjectType::Persona, p, &form(&[("ofici", "moliner")]), None).await.unwrap();
    let b = gov.propose_form(&ctx(u), ObjectType::Persona, p, &form(&[("notes", "veure acta")]), None).await.unwrap();

    gov.approve_change(&ctx(boss), a.id).await.unwrap();
    assert_eq!(gov.user_points(u).await.unwrap(), 2);
    let still = store.get_wiki_change(b.id).await.unwrap().unwrap();
    assert_eq!(still.moderation_state, ModerationState::Pendent);
  }

  #[tokio::test]
  async fn lists_default_to_published_and_respect_scope() {
    let (gov, store) = engine().await;
    let boss = admin(&store).await;
    let nobody = user(&store, "lector").await;
    let archivist = user(&store, "arxiver").await;
    let here = published(&store, EntityKind::Municipi, json!({"nom": "Olot"})).await;
    let there = published(&store, EntityKind::Municipi, json!({"nom": "Vic"})).await;
    grant(
      &store,
      archivist,
      &json!({"documentals.arxius.edit": {"effect": "allow-scoped", "targets": {"municipi_id": [here]}}}).to_string(),
    )
    .await;

    published(&store, EntityKind::Arxiu, json!({"nom": "Públic", "municipi_id": here})).await;
    let mine = gov
      .create_entity(&ctx(archivist), EntityKind::Arxiu, snap(json!({"nom": "Nou", "municipi_id": here})))
      .await
      .unwrap();
    gov
      .create_entity(&ctx(boss), EntityKind::Arxiu, snap(json!({"nom": "Lluny", "municipi_id": there})))
      .await
      .unwrap();

    let public = gov.list_entities(&ctx(nobody), EntityKind::Arxiu, EntityFilter::default()).await.unwrap();
    assert_eq!(public.len(), 1);
    let pending = EntityFilter { status: Some(ModerationState::Pendent), ..Default::default() };
    assert!(gov.list_entities(&ctx(nobody), EntityKind::Arxiu, pending.clone()).await.unwrap().is_empty());

    let scoped = gov.list_entities(&ctx(archivist), EntityKind::Arxiu, pending.clone()).await.unwrap();
    assert_eq!(scoped.iter().map(|e| e.id).collect::<Vec<_>>(), vec![mine.id]);
    assert_eq!(gov.list_entities(&ctx(boss), EntityKind::Arxiu, pending).await.unwrap().len(), 2);
    assert_eq!(gov.moderation_list(&ctx(boss), EntityKind::Arxiu).await.unwrap().len(), 2);
    let err = gov.moderation_list(&ctx(archivist), EntityKind::Arxiu).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);
  }
}
