//! Raw transcriptions: edited in place, one recorded change per field.
//!
//! Historical versions come from the `before`/`after` documents an edit batch
//! stores on its first and last change; between those, a version is rebuilt
//! by replaying the field descriptors backwards from the live state.

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use arrels_core::{
  EntityKind, ModerationState,
  activity::ActivityStatus,
  moderation::ModerationUpdate,
  policy::{PermissionTarget, keys},
  store::Store,
  transcripcio::{
    ChangeInfo, NewTranscripcioChange, TranscripcioChange, TranscripcioChangeId, TranscripcioId,
    TranscripcioMetadata, TranscripcioRaw, TranscripcioSnapshot,
  },
  wiki::{ChangeType, DiffRow, FieldValue, VersionToken},
};

use super::{CHANGE_ROUTE, diff_fields};
use crate::{Error, Governance, Guardrail, RequestContext, Result, points::ActivityInput};

/// Object type of transcription activities.
pub const OBJECT_TYPE: &str = "transcripcio";

/// One field to write.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscripcioEdit {
  pub info:  ChangeInfo,
  /// `None` or blank clears the field.
  pub value: Option<String>,
}

/// The state right after one change.
#[derive(Debug, Clone)]
pub struct TranscripcioVersion {
  pub change_id: TranscripcioChangeId,
  pub snapshot:  TranscripcioSnapshot,
}

fn normalise(value: Option<&str>) -> Option<String> {
  value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

/// The version following each change, newest first. `changes` must be
/// newest first. A change carrying `after` contributes it as-is; one
/// carrying `before` resets the replay to it.
pub fn replay_versions(live: &TranscripcioSnapshot, changes: &[TranscripcioChange]) -> Vec<TranscripcioVersion> {
  let mut state = live.clone();
  let mut versions = Vec::with_capacity(changes.len());
  for change in changes {
    let after = change.metadata.after.clone().unwrap_or_else(|| state.clone());
    versions.push(TranscripcioVersion { change_id: change.id, snapshot: after });
    state = match &change.metadata.before {
      Some(before) => before.clone(),
      None => {
        let mut previous = state;
        if let Err(e) = previous.set(&change.info, change.old_value.as_deref()) {
          warn!(change = change.id, error = %e, "cannot replay transcription change");
        }
        previous
      }
    };
  }
  versions
}

struct RawAccess {
  raw:       TranscripcioRaw,
  target:    PermissionTarget,
  moderator: bool,
}

impl<S: Store> Governance<S> {
  async fn raw_access(&self, ctx: &RequestContext, id: TranscripcioId) -> Result<RawAccess> {
    let raw = self
      .store
      .get_transcripcio(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "transcripcio", id })?;
    let target = PermissionTarget::llibre(raw.snapshot.raw.llibre_id);
    let moderator = self.has_permission(ctx.user_id, keys::MODERACIO, target).await?;
    let visible = moderator
      || raw.moderation.state.is_published()
      || raw.moderation.created_by == Some(ctx.user_id)
      || self.has_permission(ctx.user_id, keys::TRANSCRIPCIONS_EDIT, target).await?;
    if !visible {
      return Err(Error::NotFound { kind: "transcripcio", id });
    }
    Ok(RawAccess { raw, target, moderator })
  }

  async fn require_llibre(&self, ctx: &RequestContext, llibre_id: i64) -> Result<()> {
    if llibre_id <= 0 || self.store.get_entity(EntityKind::Llibre, llibre_id).await.map_err(Error::store)?.is_none() {
      return Err(Error::validation(format!("unknown llibre {llibre_id}")));
    }
    self
      .require_permission(ctx, keys::TRANSCRIPCIONS_EDIT, PermissionTarget::llibre(llibre_id))
      .await
  }

  /// Record a new transcription in `pendent`.
  pub async fn create_transcripcio(
    &self,
    ctx: &RequestContext,
    snapshot: TranscripcioSnapshot,
  ) -> Result<TranscripcioRaw> {
    self.require_llibre(ctx, snapshot.raw.llibre_id).await?;
    ctx.ensure_active()?;
    let raw = self
      .store
      .create_transcripcio(snapshot, ctx.user_id, ModerationState::Pendent)
      .await
      .map_err(Error::store)?;
    info!(transcripcio = raw.id, by = ctx.user_id, "transcription created");
    let activity = ActivityInput::new(ctx.user_id, "crear", OBJECT_TYPE, Some(raw.id))
      .rule("transcripcio_create")
      .status(ActivityStatus::Pendent);
    if let Err(e) = self.register_activity(activity).await {
      warn!(transcripcio = raw.id, error = %e, "could not record creation activity");
    }
    Ok(raw)
  }

  /// Write `edits` to the live transcription, recording one pending change
  /// per field that actually changes.
  pub async fn edit_transcripcio(
    &self,
    ctx: &RequestContext,
    id: TranscripcioId,
    edits: Vec<TranscripcioEdit>,
  ) -> Result<Vec<TranscripcioChange>> {
    let access = self.raw_access(ctx, id).await?;
    self.require_permission(ctx, keys::TRANSCRIPCIONS_EDIT, access.target).await?;

    let original = access.raw.snapshot;
    let mut current = original.clone();
    let mut changes = Vec::new();
    for edit in edits {
      let old_value = normalise(current.get(&edit.info).as_deref());
      let new_value = normalise(edit.value.as_deref());
      if old_value == new_value {
        continue;
      }
      current.set(&edit.info, new_value.as_deref())?;
      changes.push(NewTranscripcioChange {
        change_type: ChangeType::Field,
        info: edit.info,
        old_value,
        new_value,
        metadata: TranscripcioMetadata::default(),
        changed_by: ctx.user_id,
      });
    }
    if changes.is_empty() {
      return Err(Error::validation("the edit changes nothing"));
    }
    if current.raw.llibre_id != original.raw.llibre_id {
      self.require_llibre(ctx, current.raw.llibre_id).await?;
    }
    if let Some(first) = changes.first_mut() {
      first.metadata.before = Some(original);
    }
    if let Some(last) = changes.last_mut() {
      last.metadata.after = Some(current.clone());
    }
    if !self.change_limiter.check(CHANGE_ROUTE, &ctx.user_id.to_string()) {
      debug!(transcripcio = id, by = ctx.user_id, "transcription edit rate limited");
      return Err(Error::Guardrail(Guardrail::RateLimited));
    }

    ctx.ensure_active()?;
    let saved = self
      .store
      .save_transcripcio_edit(id, current, changes)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "transcripcio", id })?;
    info!(transcripcio = id, by = ctx.user_id, fields = saved.len(), "transcription edited");
    Ok(saved)
  }

  pub async fn get_transcripcio(&self, ctx: &RequestContext, id: TranscripcioId) -> Result<TranscripcioRaw> {
    Ok(self.raw_access(ctx, id).await?.raw)
  }

  /// Changes of a transcription, newest first.
  pub async fn transcripcio_history(
    &self,
    ctx: &RequestContext,
    id: TranscripcioId,
  ) -> Result<Vec<TranscripcioChange>> {
    self.raw_access(ctx, id).await?;
    self.store.list_transcripcio_changes(id).await.map_err(Error::store)
  }

  async fn transcripcio_version(
    &self,
    live: &TranscripcioSnapshot,
    id: TranscripcioId,
    token: VersionToken,
  ) -> Result<TranscripcioSnapshot> {
    match token {
      VersionToken::Current => Ok(live.clone()),
      VersionToken::Change(change_id) => {
        let changes = self.store.list_transcripcio_changes(id).await.map_err(Error::store)?;
        replay_versions(live, &changes)
          .into_iter()
          .find(|v| v.change_id == change_id)
          .map(|v| v.snapshot)
          .ok_or(Error::NotFound { kind: "transcripcio change", id: change_id })
      }
    }
  }

  pub async fn view_transcripcio_version(
    &self,
    ctx: &RequestContext,
    id: TranscripcioId,
    token: VersionToken,
  ) -> Result<Vec<FieldValue>> {
    let access = self.raw_access(ctx, id).await?;
    Ok(self.transcripcio_version(&access.raw.snapshot, id, token).await?.flatten())
  }

  pub async fn compare_transcripcio(
    &self,
    ctx: &RequestContext,
    id: TranscripcioId,
    left: VersionToken,
    right: VersionToken,
  ) -> Result<Vec<DiffRow>> {
    let access = self.raw_access(ctx, id).await?;
    let l = self.transcripcio_version(&access.raw.snapshot, id, left).await?;
    let r = self.transcripcio_version(&access.raw.snapshot, id, right).await?;
    Ok(diff_fields(&l.flatten(), &r.flatten()))
  }

  /// Approve or reject one field change. Rejecting puts the old value back
  /// unless the field has been edited again since.
  pub async fn moderate_transcripcio_change(
    &self,
    ctx: &RequestContext,
    change_id: TranscripcioChangeId,
    approve: bool,
  ) -> Result<()> {
    let change = self
      .store
      .get_transcripcio_change(change_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound { kind: "transcripcio change", id: change_id })?;
    let access = self.raw_access(ctx, change.transcripcio_id).await?;
    if !access.moderator {
      return Err(Error::Denied(keys::MODERACIO.to_owned()));
    }

    let live = access.raw.snapshot;
    let restore = if !approve && normalise(live.get(&change.info).as_deref()) == change.new_value {
      let mut restored = live;
      restored.set(&change.info, change.old_value.as_deref())?;
      Some(restored)
    } else {
      None
    };
    let state = if approve { ModerationState::Publicat } else { ModerationState::Rebutjat };
    ctx.ensure_active()?;
    let moved = self
      .store
      .set_transcripcio_change_state(change_id, state, ctx.user_id, Utc::now(), restore)
      .await
      .map_err(Error::store)?;
    if !moved {
      return Err(Error::conflict(format!("transcription change {change_id} is not pending")));
    }
    info!(change = change_id, moderator = ctx.user_id, %state, "transcription change moderated");
    Ok(())
  }

  /// Approve or reject a pending transcription.
  pub async fn moderate_transcripcio(
    &self,
    ctx: &RequestContext,
    id: TranscripcioId,
    approve: bool,
    motiu: Option<String>,
  ) -> Result<()> {
    let access = self.raw_access(ctx, id).await?;
    if !access.moderator {
      return Err(Error::Denied(keys::MODERACIO.to_owned()));
    }
    if access.raw.moderation.state != ModerationState::Pendent {
      return Err(Error::conflict(format!("transcription {id} is not pending")));
    }
    let state = if approve { ModerationState::Publicat } else { ModerationState::Rebutjat };
    ctx.ensure_active()?;
    let update = ModerationUpdate {
      state,
      moderated_by: ctx.user_id,
      moderated_at: Utc::now(),
      motiu: if approve { None } else { motiu },
    };
    self.store.set_transcripcio_moderation(id, update).await.map_err(Error::store)?;
    info!(transcripcio = id, moderator = ctx.user_id, %state, "transcription moderated");
    self.settle_activities(OBJECT_TYPE, id, None, ctx.user_id, approve).await;
    Ok(())
  }
}
