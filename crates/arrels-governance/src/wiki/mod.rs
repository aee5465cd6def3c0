//! The wiki pipeline: edits to published entities become pending proposals
//! carrying before/after snapshots, checked against the guardrails first.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use arrels_core::{
  EntityKind, ModerationState, Snapshot, UserId,
  activity::ActivityStatus,
  fields::parse_form_value,
  policy::keys,
  store::Store,
  wiki::{
    ChangeId, ChangeType, DiffRow, FieldValue, NewWikiChange, ObjectType, PendingCap, PendingCaps,
    VersionToken, WikiChange, WikiMetadata,
  },
};

use crate::{
  Error, Governance, Guardrail, RequestContext, Result,
  moderation::Access,
  points::ActivityInput,
  policy::edit_key,
};

pub mod diff;
pub mod marks;
pub mod raw;

pub use diff::{diff_fields, diff_snapshots, has_changes};

/// Rate-limit route of proposals.
pub const CHANGE_ROUTE: &str = "/wiki/change";
/// Rate-limit route of marks.
pub const MARK_ROUTE: &str = "/wiki/mark";
/// Rule code of the activity a proposal records.
pub const CHANGE_ACTIVITY: &str = "wiki_change";

/// `details` of the activity tied to change `id`.
pub(crate) fn change_marker(id: ChangeId) -> String { format!("wiki_change:{id}") }

impl<S: Store> Governance<S> {
  /// Refuse a proposal that trips a guardrail. Checked in order: metadata
  /// size, pending changes on the object, pending changes by the author on
  /// the object, then the author's rate bucket. The pending caps are checked
  /// again when the change is stored.
  pub(crate) async fn check_guardrails(
    &self,
    object_type: ObjectType,
    object_id: i64,
    author: UserId,
    metadata_len: usize,
  ) -> Result<()> {
    let cfg = &self.config;
    let tripped = if metadata_len > cfg.wiki_meta_max_bytes {
      Some(Guardrail::MetadataTooLarge)
    } else if self.pending_count(object_type, object_id, None).await? >= cfg.wiki_pending_per_object {
      Some(Guardrail::PendingObjectLimit)
    } else if self.pending_count(object_type, object_id, Some(author)).await?
      >= cfg.wiki_pending_per_user
    {
      Some(Guardrail::PendingUserLimit)
    } else if !self.change_limiter.check(CHANGE_ROUTE, &author.to_string()) {
      Some(Guardrail::RateLimited)
    } else {
      None
    };
    match tripped {
      Some(g) => {
        debug!(%object_type, object_id, author, guardrail = g.message_key(), "proposal refused");
        Err(Error::Guardrail(g))
      }
      None => Ok(()),
    }
  }

  async fn pending_count(&self, object_type: ObjectType, object_id: i64, author: Option<UserId>) -> Result<i64> {
    self
      .store
      .count_pending_wiki_changes(object_type, object_id, author)
      .await
      .map_err(Error::store)
  }

  /// Load the object, check the caller may edit it, and return it with its
  /// canonical live snapshot.
  async fn editable(&self, ctx: &RequestContext, object_type: ObjectType, id: i64) -> Result<Access> {
    let kind = object_type.entity_kind();
    let access = self.access(ctx, kind, id).await?;
    self.require_permission(ctx, edit_key(kind), access.target).await?;
    Ok(access)
  }

  async fn persist_proposal(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    object_id: i64,
    change_type: ChangeType,
    field: Option<(String, String, String)>,
    metadata: WikiMetadata,
  ) -> Result<WikiChange> {
    let metadata_json = metadata.to_json()?;
    self.check_guardrails(object_type, object_id, ctx.user_id, metadata_json.len()).await?;
    ctx.ensure_active()?;

    let (field_key, old_value, new_value) = match field {
      Some((k, o, n)) => (Some(k), Some(o), Some(n)),
      None => (None, None, None),
    };
    let caps = PendingCaps {
      per_object: self.config.wiki_pending_per_object,
      per_author: self.config.wiki_pending_per_user,
    };
    let stored = self
      .store
      .create_wiki_change(
        NewWikiChange {
          object_type,
          object_id,
          change_type,
          field_key,
          old_value,
          new_value,
          metadata_json,
          changed_by: ctx.user_id,
        },
        caps,
      )
      .await
      .map_err(Error::store)?;
    let change = match stored {
      Ok(change) => change,
      Err(cap) => {
        let g = match cap {
          PendingCap::Object => Guardrail::PendingObjectLimit,
          PendingCap::Author => Guardrail::PendingUserLimit,
        };
        debug!(%object_type, object_id, author = ctx.user_id, guardrail = g.message_key(), "proposal refused on insert");
        return Err(Error::Guardrail(g));
      }
    };
    info!(change = change.id, %object_type, object_id, by = ctx.user_id, %change_type, "wiki change proposed");

    let activity = ActivityInput::new(ctx.user_id, "editar", object_type.as_ref(), Some(object_id))
      .rule(CHANGE_ACTIVITY)
      .status(ActivityStatus::Pendent)
      .details(change_marker(change.id));
    if let Err(e) = self.register_activity(activity).await {
      warn!(change = change.id, error = %e, "could not record proposal activity");
    }
    Ok(change)
  }

  /// Propose replacing the live state of an object with `after`.
  pub async fn propose_update(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    after: Snapshot,
    reason: Option<String>,
  ) -> Result<WikiChange> {
    ctx.ensure_active()?;
    let id = self.canonical_object(object_type, id).await?;
    let kind = object_type.entity_kind();
    let access = self.editable(ctx, object_type, id).await?;
    let before = access.entity.snapshot.canonical(kind);
    let after = after.canonical(kind);
    kind.validate_snapshot(&after)?;
    self.check_entity_rules(kind, Some(id), &after).await?;
    if !has_changes(&diff_snapshots(kind, &before, &after)) {
      return Err(Error::validation("the proposal changes nothing"));
    }
    let metadata = WikiMetadata {
      before: Some(before),
      after: Some(after),
      reason: clean(reason),
      source_change_id: None,
    };
    self.persist_proposal(ctx, object_type, id, ChangeType::Form, None, metadata).await
  }

  /// [`Self::propose_update`] with raw form values overlaid on the live
  /// state. Keys outside the object's field table are ignored.
  pub async fn propose_form(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    form: &HashMap<String, String>,
    reason: Option<String>,
  ) -> Result<WikiChange> {
    let kind = object_type.entity_kind();
    let id = self.canonical_object(object_type, id).await?;
    let live = self.access(ctx, kind, id).await?.entity;
    let mut after = live.snapshot.canonical(kind);
    after.overlay_form(kind, form)?;
    self.propose_update(ctx, object_type, id, after, reason).await
  }

  /// Propose a change to one field.
  pub async fn propose_field(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    field_key: &str,
    value: &str,
  ) -> Result<WikiChange> {
    ctx.ensure_active()?;
    let id = self.canonical_object(object_type, id).await?;
    let kind = object_type.entity_kind();
    let spec = kind
      .field(field_key)
      .ok_or_else(|| Error::validation(format!("{object_type} has no field {field_key:?}")))?;
    let access = self.editable(ctx, object_type, id).await?;
    let before = access.entity.snapshot.canonical(kind);
    let mut after = before.clone();
    after.set(spec.key, parse_form_value(spec, value)?);
    kind.validate_snapshot(&after)?;
    self.check_entity_rules(kind, Some(id), &after).await?;

    let (old, new) = (before.display(spec.key), after.display(spec.key));
    if old.trim() == new.trim() {
      return Err(Error::validation("the proposal changes nothing"));
    }
    let metadata = WikiMetadata { before: Some(before), after: Some(after), ..Default::default() };
    let field = Some((spec.key.to_owned(), old, new));
    self.persist_proposal(ctx, object_type, id, ChangeType::Field, field, metadata).await
  }

  /// Propose restoring the state an earlier change produced.
  pub async fn revert(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    source_change_id: ChangeId,
    reason: Option<String>,
  ) -> Result<WikiChange> {
    ctx.ensure_active()?;
    let id = self.canonical_object(object_type, id).await?;
    let kind = object_type.entity_kind();
    let access = self.editable(ctx, object_type, id).await?;
    let source = self.change_on(object_type, id, source_change_id).await?;
    if !self.change_visible(ctx, &access, &source) {
      return Err(Error::NotFound { kind: "wiki change", id: source_change_id });
    }
    let after = source
      .metadata
      .after
      .as_ref()
      .ok_or_else(|| Error::validation(format!("change {source_change_id} has no after snapshot")))?
      .canonical(kind);
    let before = access.entity.snapshot.canonical(kind);
    let metadata = WikiMetadata {
      before: Some(before),
      after: Some(after),
      reason: clean(reason),
      source_change_id: Some(source_change_id),
    };
    self.persist_proposal(ctx, object_type, id, ChangeType::Revert, None, metadata).await
  }

  async fn change_on(&self, object_type: ObjectType, id: i64, change_id: ChangeId) -> Result<WikiChange> {
    self
      .store
      .get_wiki_change(change_id)
      .await
      .map_err(Error::store)?
      .filter(|c| c.object_type == object_type && c.object_id == id)
      .ok_or(Error::NotFound { kind: "wiki change", id: change_id })
  }

  /// Moderators see every change; others see their own and published ones.
  fn change_visible(&self, ctx: &RequestContext, access: &Access, change: &WikiChange) -> bool {
    access.moderator
      || change.changed_by == ctx.user_id
      || change.moderation_state == ModerationState::Publicat
  }

  /// Changes of one object the caller may see, newest first.
  pub async fn history(&self, ctx: &RequestContext, object_type: ObjectType, id: i64) -> Result<Vec<WikiChange>> {
    let access = self.access(ctx, object_type.entity_kind(), id).await?;
    let changes = self.store.list_wiki_changes(object_type, id).await.map_err(Error::store)?;
    Ok(changes.into_iter().filter(|c| self.change_visible(ctx, &access, c)).collect())
  }

  /// The latest published change, which stands for the published version.
  pub async fn published_version(&self, object_type: ObjectType, id: i64) -> Result<Option<ChangeId>> {
    let changes = self.store.list_wiki_changes(object_type, id).await.map_err(Error::store)?;
    Ok(
      changes
        .iter()
        .filter(|c| c.moderation_state == ModerationState::Publicat)
        .map(|c| c.id)
        .max(),
    )
  }

  async fn version(
    &self,
    ctx: &RequestContext,
    access: &Access,
    object_type: ObjectType,
    id: i64,
    token: VersionToken,
  ) -> Result<Snapshot> {
    let kind = object_type.entity_kind();
    match token {
      VersionToken::Current => Ok(access.entity.snapshot.canonical(kind)),
      VersionToken::Change(change_id) => {
        let change = self.change_on(object_type, id, change_id).await?;
        if !self.change_visible(ctx, access, &change) {
          return Err(Error::NotFound { kind: "wiki change", id: change_id });
        }
        change
          .version_snapshot()
          .map(|s| s.canonical(kind))
          .ok_or_else(|| Error::validation(format!("change {change_id} carries no snapshot")))
      }
    }
  }

  /// One version of an object as a flat field list.
  pub async fn view_version(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    token: VersionToken,
  ) -> Result<Vec<FieldValue>> {
    let access = self.access(ctx, object_type.entity_kind(), id).await?;
    let snapshot = self.version(ctx, &access, object_type, id, token).await?;
    Ok(snapshot.flatten(object_type.entity_kind()))
  }

  /// Compare two versions of an object.
  pub async fn compare(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    id: i64,
    left: VersionToken,
    right: VersionToken,
  ) -> Result<Vec<DiffRow>> {
    let kind = object_type.entity_kind();
    let access = self.access(ctx, kind, id).await?;
    let l = self.version(ctx, &access, object_type, id, left).await?;
    let r = self.version(ctx, &access, object_type, id, right).await?;
    Ok(diff_snapshots(kind, &l, &r))
  }

  /// Pending changes on the objects the caller moderates, oldest first.
  pub async fn moderation_queue(&self, ctx: &RequestContext, limit: usize, offset: usize) -> Result<Vec<WikiChange>> {
    let mask = self.list_scope(ctx.user_id, keys::MODERACIO).await?;
    if mask.is_empty() {
      return Err(Error::Denied(keys::MODERACIO.to_owned()));
    }
    let scope = (!mask.has_global).then_some(mask);
    self.store.list_pending_wiki_changes(scope, limit, offset).await.map_err(Error::store)
  }
}

fn clean(reason: Option<String>) -> Option<String> {
  reason.map(|r| r.trim().to_owned()).filter(|r| !r.is_empty())
}

/// Kinds whose edits go through proposals.
pub fn is_wiki_kind(kind: EntityKind) -> bool { kind.object_type().is_some() }
