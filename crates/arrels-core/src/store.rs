//! Repository traits and supporting query types.
//!
//! The traits are implemented by storage backends (e.g.
//! `arrels-store-sqlite`). The governance engines and the web layer depend on
//! these abstractions, never on a concrete backend.
//!
//! Every method returns a `Send` future so the traits can be used from
//! multi-threaded async runtimes (tokio with `axum`). Writes are atomic per
//! call; the few compound writes that must commit together
//! ([`WikiRepository::apply_wiki_change`], [`WikiRepository::upsert_wiki_mark`],
//! [`TranscripcioRepository::save_transcripcio_edit`]) are single methods so
//! the backend can wrap them in one transaction.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  achievement::{Achievement, AchievementId, NewAchievement, UserAchievement},
  activity::{
    ActivityId, ActivityStatus, NewActivity, NewPointsRule, PointsRule, UserActivity,
  },
  cognom::{
    CognomHit, CognomId, CognomRedirect, CognomRedirectSuggestion, CognomVariant, HeatmapCell,
    NewSuggestion, SuggestionId, SuggestionState,
  },
  fields::{EntityKind, Snapshot, StoredEntity},
  moderation::{ModerationState, ModerationUpdate},
  policy::{NewPolicy, Policy, PolicyAssignment, PolicyId, ScopeMask},
  transcripcio::{
    NewTranscripcioChange, TranscripcioChange, TranscripcioChangeId, TranscripcioId,
    TranscripcioRaw, TranscripcioSnapshot,
  },
  user::{Group, GroupId, NewUser, User, UserId},
  wiki::{
    ChangeId, MarkType, NewWikiChange, ObjectType, PendingCap, PendingCaps, PublicCount, WikiChange,
    WikiMark,
  },
};

/// Largest page any list query returns.
pub const MAX_PAGE: usize = 500;

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`EntityRepository::list_entities`]. Filters that do not
/// apply to a kind are ignored.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
  /// Case-insensitive substring over the kind's title field.
  pub q:              Option<String>,
  /// `None` lists every state.
  pub status:         Option<ModerationState>,
  /// Territorial mask; an empty mask yields no rows.
  pub scope:          Option<ScopeMask>,
  pub municipi_id:    Option<i64>,
  pub pais_id:        Option<i64>,
  pub arxiu_id:       Option<i64>,
  pub arquebisbat_id: Option<i64>,
  pub nivell_id:      Option<i64>,
  pub tipus:          Option<String>,
  pub acces:          Option<String>,
  pub created_by:     Option<UserId>,
  /// Clamped to [`MAX_PAGE`]; `0` means the default of 50.
  pub limit:          usize,
  pub offset:         usize,
}

impl EntityFilter {
  pub fn effective_limit(&self) -> usize {
    match self.limit {
      0 => 50,
      n => n.min(MAX_PAGE),
    }
  }
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// The error type shared by every repository trait of one backend.
pub trait Repository: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
}

pub trait UserRepository: Repository {
  /// Persist a new, inactive user.
  fn create_user(&self, user: NewUser) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user_by_id(
    &self,
    id: UserId,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// The user and its PHC password hash, looked up by login.
  fn get_credentials(
    &self,
    login: String,
  ) -> impl Future<Output = Result<Option<(User, String)>, Self::Error>> + Send + '_;

  /// Activate the user holding `token` and consume the token.
  fn activate_user(
    &self,
    token: String,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  /// User ids in ascending order.
  fn list_user_ids(
    &self,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<UserId>, Self::Error>> + Send + '_;

  fn create_group(&self, nom: String) -> impl Future<Output = Result<Group, Self::Error>> + Send + '_;

  fn list_groups(&self) -> impl Future<Output = Result<Vec<Group>, Self::Error>> + Send + '_;

  /// Idempotent.
  fn add_user_to_group(
    &self,
    user: UserId,
    group: GroupId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_group_ids_for_user(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<GroupId>, Self::Error>> + Send + '_;
}

pub trait PolicyRepository: Repository {
  /// Create (`id: None`) or overwrite a policy.
  fn save_policy(
    &self,
    policy: NewPolicy,
  ) -> impl Future<Output = Result<Policy, Self::Error>> + Send + '_;

  fn get_policy(
    &self,
    id: PolicyId,
  ) -> impl Future<Output = Result<Option<Policy>, Self::Error>> + Send + '_;

  fn list_policies(&self) -> impl Future<Output = Result<Vec<Policy>, Self::Error>> + Send + '_;

  fn assign_policy_to_user(
    &self,
    policy: PolicyId,
    user: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn unassign_policy_from_user(
    &self,
    policy: PolicyId,
    user: UserId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn assign_policy_to_group(
    &self,
    policy: PolicyId,
    group: GroupId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn unassign_policy_from_group(
    &self,
    policy: PolicyId,
    group: GroupId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_policy_assignments(
    &self,
  ) -> impl Future<Output = Result<Vec<PolicyAssignment>, Self::Error>> + Send + '_;

  /// Policies attached to the user directly or through any of its groups,
  /// deduplicated, ascending.
  fn list_policy_ids_for_user(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<PolicyId>, Self::Error>> + Send + '_;
}

pub trait EntityRepository: Repository {
  fn create_entity(
    &self,
    kind: EntityKind,
    snapshot: Snapshot,
    created_by: UserId,
    state: ModerationState,
  ) -> impl Future<Output = Result<StoredEntity, Self::Error>> + Send + '_;

  fn get_entity(
    &self,
    kind: EntityKind,
    id: i64,
  ) -> impl Future<Output = Result<Option<StoredEntity>, Self::Error>> + Send + '_;

  fn list_entities(
    &self,
    kind: EntityKind,
    filter: EntityFilter,
  ) -> impl Future<Output = Result<Vec<StoredEntity>, Self::Error>> + Send + '_;

  /// Overwrite the fields of an entity, leaving its moderation untouched.
  /// `None` if the row does not exist.
  fn update_entity(
    &self,
    kind: EntityKind,
    id: i64,
    snapshot: Snapshot,
  ) -> impl Future<Output = Result<Option<StoredEntity>, Self::Error>> + Send + '_;

  fn set_moderation(
    &self,
    kind: EntityKind,
    id: i64,
    update: ModerationUpdate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn delete_entity(
    &self,
    kind: EntityKind,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn pais_by_iso2(
    &self,
    code: String,
  ) -> impl Future<Output = Result<Option<StoredEntity>, Self::Error>> + Send + '_;
}

pub trait WikiRepository: Repository {
  /// Store a pending change unless the object or the author already has
  /// `caps` pending changes; the counts and the insert share a transaction.
  fn create_wiki_change(
    &self,
    change: NewWikiChange,
    caps: PendingCaps,
  ) -> impl Future<Output = Result<Result<WikiChange, PendingCap>, Self::Error>> + Send + '_;

  fn get_wiki_change(
    &self,
    id: ChangeId,
  ) -> impl Future<Output = Result<Option<WikiChange>, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_wiki_changes(
    &self,
    object_type: ObjectType,
    object_id: i64,
  ) -> impl Future<Output = Result<Vec<WikiChange>, Self::Error>> + Send + '_;

  /// Oldest first, across every object. With a `scope`, only changes whose
  /// target object lies inside it.
  fn list_pending_wiki_changes(
    &self,
    scope: Option<ScopeMask>,
    limit: usize,
    offset: usize,
  ) -> impl Future<Output = Result<Vec<WikiChange>, Self::Error>> + Send + '_;

  /// Pending changes on one object, optionally by one author.
  fn count_pending_wiki_changes(
    &self,
    object_type: ObjectType,
    object_id: i64,
    author: Option<UserId>,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// In one transaction: write the change's `after` snapshot over the live
  /// entity, publish the entity and publish the change, all stamped with
  /// `moderator` and `at`. `None` (and nothing written) when the change is
  /// not pending, has no `after`, or its entity does not exist.
  fn apply_wiki_change(
    &self,
    id: ChangeId,
    moderator: UserId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<StoredEntity>, Self::Error>> + Send + '_;

  /// Mark a pending change `rebutjat`; `false` if it was not pending.
  fn reject_wiki_change(
    &self,
    id: ChangeId,
    moderator: UserId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn get_wiki_mark(
    &self,
    object_type: ObjectType,
    object_id: i64,
    user: UserId,
  ) -> impl Future<Output = Result<Option<WikiMark>, Self::Error>> + Send + '_;

  /// Replace the user's mark. The previous mark is read and the public
  /// counts adjusted ([`mark_deltas`](crate::wiki::mark_deltas)) in the
  /// same transaction. Returns the previous mark.
  fn upsert_wiki_mark(
    &self,
    mark: WikiMark,
  ) -> impl Future<Output = Result<Option<WikiMark>, Self::Error>> + Send + '_;

  /// Remove the user's mark and adjust the public counts in the same
  /// transaction. Returns the removed mark.
  fn delete_wiki_mark(
    &self,
    object_type: ObjectType,
    object_id: i64,
    user: UserId,
  ) -> impl Future<Output = Result<Option<WikiMark>, Self::Error>> + Send + '_;

  fn list_wiki_public_counts(
    &self,
    object_type: ObjectType,
    object_id: i64,
  ) -> impl Future<Output = Result<Vec<PublicCount>, Self::Error>> + Send + '_;

  fn inc_wiki_public_count(
    &self,
    object_type: ObjectType,
    object_id: i64,
    tipus: MarkType,
    delta: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Rebuild the object's public counts from its marks.
  fn reconcile_wiki_public_counts(
    &self,
    object_type: ObjectType,
    object_id: i64,
  ) -> impl Future<Output = Result<Vec<PublicCount>, Self::Error>> + Send + '_;
}

pub trait PointsRepository: Repository {
  /// Create or update a rule, keyed by `code`.
  fn save_points_rule(
    &self,
    rule: NewPointsRule,
  ) -> impl Future<Output = Result<PointsRule, Self::Error>> + Send + '_;

  fn get_active_rule_by_code(
    &self,
    code: String,
  ) -> impl Future<Output = Result<Option<PointsRule>, Self::Error>> + Send + '_;

  fn list_points_rules(&self) -> impl Future<Output = Result<Vec<PointsRule>, Self::Error>> + Send + '_;

  /// Insert an activity. A `validat` one credits its points to the user's
  /// total in the same transaction.
  fn create_activity(
    &self,
    activity: NewActivity,
  ) -> impl Future<Output = Result<UserActivity, Self::Error>> + Send + '_;

  fn get_activity(
    &self,
    id: ActivityId,
  ) -> impl Future<Output = Result<Option<UserActivity>, Self::Error>> + Send + '_;

  /// Move an activity to `status`. Returns the previous status, or `None`
  /// when the activity is missing or already in `status`. Entering `validat`
  /// credits the activity's points and leaving it withdraws them, in the same
  /// transaction as the status change.
  fn set_activity_status(
    &self,
    id: ActivityId,
    status: ActivityStatus,
    moderator: Option<UserId>,
  ) -> impl Future<Output = Result<Option<ActivityStatus>, Self::Error>> + Send + '_;

  /// Oldest first.
  fn list_activities_for_user(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<UserActivity>, Self::Error>> + Send + '_;

  fn list_activities_for_object(
    &self,
    object_type: String,
    object_id: i64,
  ) -> impl Future<Output = Result<Vec<UserActivity>, Self::Error>> + Send + '_;

  fn add_points_to_user(
    &self,
    user: UserId,
    delta: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_user_points(&self, user: UserId) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  /// Rebuild every total from `validat` activities referring to active
  /// rules. Returns the number of users with a non-zero total.
  fn recalc_user_points(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

pub trait AchievementRepository: Repository {
  /// Create or update an achievement, keyed by `code`.
  fn save_achievement(
    &self,
    achievement: NewAchievement,
  ) -> impl Future<Output = Result<Achievement, Self::Error>> + Send + '_;

  fn get_achievement(
    &self,
    id: AchievementId,
  ) -> impl Future<Output = Result<Option<Achievement>, Self::Error>> + Send + '_;

  fn list_achievements(&self) -> impl Future<Output = Result<Vec<Achievement>, Self::Error>> + Send + '_;

  fn list_enabled_achievements(
    &self,
  ) -> impl Future<Output = Result<Vec<Achievement>, Self::Error>> + Send + '_;

  fn list_user_achievements(
    &self,
    user: UserId,
  ) -> impl Future<Output = Result<Vec<UserAchievement>, Self::Error>> + Send + '_;

  /// Insert one award instance. `false` if that instance already exists.
  fn award_achievement(
    &self,
    user: UserId,
    achievement: AchievementId,
    instance: i64,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

pub trait CognomRepository: Repository {
  fn get_cognom_redirect(
    &self,
    from: CognomId,
  ) -> impl Future<Output = Result<Option<CognomRedirect>, Self::Error>> + Send + '_;

  fn list_cognom_redirects(
    &self,
  ) -> impl Future<Output = Result<Vec<CognomRedirect>, Self::Error>> + Send + '_;

  /// Insert or overwrite the redirect keyed by `from_id`.
  fn set_cognom_redirect(
    &self,
    redirect: CognomRedirect,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn delete_cognom_redirect(
    &self,
    from: CognomId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn create_redirect_suggestion(
    &self,
    suggestion: NewSuggestion,
  ) -> impl Future<Output = Result<CognomRedirectSuggestion, Self::Error>> + Send + '_;

  fn get_redirect_suggestion(
    &self,
    id: SuggestionId,
  ) -> impl Future<Output = Result<Option<CognomRedirectSuggestion>, Self::Error>> + Send + '_;

  fn list_redirect_suggestions(
    &self,
    state: Option<SuggestionState>,
  ) -> impl Future<Output = Result<Vec<CognomRedirectSuggestion>, Self::Error>> + Send + '_;

  fn has_pending_suggestion(
    &self,
    from: CognomId,
    to: CognomId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Move a pending suggestion to `state`; `false` if it was not pending.
  fn set_suggestion_state(
    &self,
    id: SuggestionId,
    state: SuggestionState,
    moderator: UserId,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// `None` if the surname already carries this variant.
  fn add_cognom_variant(
    &self,
    cognom: CognomId,
    variant: String,
  ) -> impl Future<Output = Result<Option<CognomVariant>, Self::Error>> + Send + '_;

  fn list_cognom_variants(
    &self,
    cognom: CognomId,
  ) -> impl Future<Output = Result<Vec<CognomVariant>, Self::Error>> + Send + '_;

  /// Prefix search over published forms and their variants.
  fn search_cognoms(
    &self,
    q: String,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<CognomHit>, Self::Error>> + Send + '_;

  /// Published persons per municipality whose first or second surname is one
  /// of `forms`, optionally bounded by birth year.
  fn cognom_heatmap(
    &self,
    forms: Vec<String>,
    y0: Option<i64>,
    y1: Option<i64>,
  ) -> impl Future<Output = Result<Vec<HeatmapCell>, Self::Error>> + Send + '_;
}

pub trait TranscripcioRepository: Repository {
  fn create_transcripcio(
    &self,
    snapshot: TranscripcioSnapshot,
    created_by: UserId,
    state: ModerationState,
  ) -> impl Future<Output = Result<TranscripcioRaw, Self::Error>> + Send + '_;

  fn get_transcripcio(
    &self,
    id: TranscripcioId,
  ) -> impl Future<Output = Result<Option<TranscripcioRaw>, Self::Error>> + Send + '_;

  fn set_transcripcio_moderation(
    &self,
    id: TranscripcioId,
    update: ModerationUpdate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Write `snapshot` as the live state and record `changes`, in one
  /// transaction. `None` if the transcription does not exist.
  fn save_transcripcio_edit(
    &self,
    id: TranscripcioId,
    snapshot: TranscripcioSnapshot,
    changes: Vec<NewTranscripcioChange>,
  ) -> impl Future<Output = Result<Option<Vec<TranscripcioChange>>, Self::Error>> + Send + '_;

  /// Newest first.
  fn list_transcripcio_changes(
    &self,
    id: TranscripcioId,
  ) -> impl Future<Output = Result<Vec<TranscripcioChange>, Self::Error>> + Send + '_;

  fn get_transcripcio_change(
    &self,
    id: TranscripcioChangeId,
  ) -> impl Future<Output = Result<Option<TranscripcioChange>, Self::Error>> + Send + '_;

  /// Moderate a pending change; when `restore` is given, write it as the
  /// live state in the same transaction. `false` if the change was not
  /// pending.
  fn set_transcripcio_change_state(
    &self,
    id: TranscripcioChangeId,
    state: ModerationState,
    moderator: UserId,
    at: DateTime<Utc>,
    restore: Option<TranscripcioSnapshot>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

/// Every repository a full backend provides.
pub trait Store:
  UserRepository
  + PolicyRepository
  + EntityRepository
  + WikiRepository
  + PointsRepository
  + AchievementRepository
  + CognomRepository
  + TranscripcioRepository
{
}

impl<T> Store for T where
  T: UserRepository
    + PolicyRepository
    + EntityRepository
    + WikiRepository
    + PointsRepository
    + AchievementRepository
    + CognomRepository
    + TranscripcioRepository
{
}
