//! Integration tests for `SqliteStore` against an in-memory database.

use arrels_core::{
  EntityKind, ModerationState, Snapshot,
  achievement::{AchievementDomain, NewAchievement, Rarity, Visibility},
  activity::{ActivityStatus, NewActivity, NewPointsRule},
  cognom::{CognomRedirect, NewSuggestion, SuggestionState},
  moderation::ModerationUpdate,
  policy::{NewPolicy, ScopeMask},
  store::{
    AchievementRepository, CognomRepository, EntityFilter, EntityRepository, PointsRepository,
    PolicyRepository, TranscripcioRepository, UserRepository, WikiRepository,
  },
  transcripcio::{
    ChangeInfo, NewTranscripcioChange, TranscripcioFields, TranscripcioMetadata, TranscripcioSnapshot,
  },
  user::NewUser,
  wiki::{
    ChangeType, MarkType, NewWikiChange, ObjectType, PendingCap, PendingCaps, WikiMark, WikiMetadata,
  },
};
use chrono::Utc;
use serde_json::json;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn snap(value: serde_json::Value) -> Snapshot {
  Snapshot(value.as_object().expect("object literal").clone())
}

async fn user(s: &SqliteStore, login: &str) -> i64 {
  s.create_user(NewUser {
    login:            login.into(),
    nom:              None,
    cognoms:          None,
    email:            None,
    locale:           "ca".into(),
    password_hash:    "$argon2id$stub".into(),
    activation_token: format!("tok-{login}"),
  })
  .await
  .unwrap()
  .id
}

fn publish(by: i64) -> ModerationUpdate {
  ModerationUpdate {
    state:        ModerationState::Publicat,
    moderated_by: by,
    moderated_at: Utc::now(),
    motiu:        None,
  }
}

// ─── Users and policies ──────────────────────────────────────────────────────

#[tokio::test]
async fn users_start_inactive_and_activate_once() {
  let s = store().await;
  let id = user(&s, "anna").await;
  assert!(!s.get_user_by_id(id).await.unwrap().unwrap().actiu);

  let activated = s.activate_user("tok-anna".into()).await.unwrap().unwrap();
  assert!(activated.actiu);
  assert!(s.activate_user("tok-anna".into()).await.unwrap().is_none());

  let (u, hash) = s.get_credentials("anna".into()).await.unwrap().unwrap();
  assert_eq!(u.id, id);
  assert_eq!(hash, "$argon2id$stub");
}

#[tokio::test]
async fn policies_reach_users_through_groups() {
  let s = store().await;
  let anna = user(&s, "anna").await;
  let group = s.create_group("arxivers".into()).await.unwrap();
  s.add_user_to_group(anna, group.id).await.unwrap();

  let direct = s
    .save_policy(NewPolicy { id: None, nom: "a".into(), descripcio: None, document: "{}".into() })
    .await
    .unwrap();
  let via_group = s
    .save_policy(NewPolicy { id: None, nom: "b".into(), descripcio: None, document: "{}".into() })
    .await
    .unwrap();
  s.assign_policy_to_user(direct.id, anna).await.unwrap();
  s.assign_policy_to_group(via_group.id, group.id).await.unwrap();
  s.assign_policy_to_group(direct.id, group.id).await.unwrap();

  let ids = s.list_policy_ids_for_user(anna).await.unwrap();
  assert_eq!(ids, vec![direct.id, via_group.id]);
  assert_eq!(s.list_policy_assignments().await.unwrap().len(), 3);

  assert!(s.unassign_policy_from_group(via_group.id, group.id).await.unwrap());
  assert_eq!(s.list_policy_ids_for_user(anna).await.unwrap(), vec![direct.id]);
}

#[tokio::test]
async fn saving_policy_with_unknown_id_is_not_found() {
  let s = store().await;
  let r = s
    .save_policy(NewPolicy { id: Some(99), nom: "x".into(), descripcio: None, document: "{}".into() })
    .await;
  assert!(matches!(r, Err(crate::Error::NotFound { kind: "policy", id: 99 })));
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn entity_round_trip_and_moderation() {
  let s = store().await;
  let anna = user(&s, "anna").await;

  let created = s
    .create_entity(
      EntityKind::Persona,
      snap(json!({ "nom": "Joan", "cognom1": "Puig", "any_naixement": 1820 })),
      anna,
      ModerationState::Pendent,
    )
    .await
    .unwrap();
  assert_eq!(created.moderation.state, ModerationState::Pendent);
  assert_eq!(created.snapshot.display("cognom1"), "Puig");
  assert_eq!(created.snapshot.get("any_naixement"), Some(&json!(1820)));

  assert!(s.set_moderation(EntityKind::Persona, created.id, publish(anna)).await.unwrap());
  let published = s.get_entity(EntityKind::Persona, created.id).await.unwrap().unwrap();
  assert_eq!(published.moderation.state, ModerationState::Publicat);
  assert_eq!(published.moderation.moderated_by, Some(anna));
}

#[tokio::test]
async fn empty_scope_lists_nothing() {
  let s = store().await;
  s.create_entity(EntityKind::Arxiu, snap(json!({ "nom": "ACA" })), 1, ModerationState::Publicat)
    .await
    .unwrap();

  let all = s.list_entities(EntityKind::Arxiu, EntityFilter::default()).await.unwrap();
  assert_eq!(all.len(), 1);

  let filter = EntityFilter { scope: Some(ScopeMask::default()), ..Default::default() };
  assert!(s.list_entities(EntityKind::Arxiu, filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_filters_by_status_and_text() {
  let s = store().await;
  for (nom, state) in [
    ("Arxiu de Girona", ModerationState::Publicat),
    ("Arxiu de Vic", ModerationState::Pendent),
    ("Biblioteca", ModerationState::Publicat),
  ] {
    s.create_entity(EntityKind::Arxiu, snap(json!({ "nom": nom })), 1, state).await.unwrap();
  }

  let filter = EntityFilter {
    q: Some("arxiu".into()),
    status: Some(ModerationState::Publicat),
    ..Default::default()
  };
  let hits = s.list_entities(EntityKind::Arxiu, filter).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].snapshot.display("nom"), "Arxiu de Girona");
}

// ─── Wiki ────────────────────────────────────────────────────────────────────

const NO_CAPS: PendingCaps = PendingCaps { per_object: i64::MAX, per_author: i64::MAX };

fn new_change(object_id: i64, after: Snapshot, by: i64) -> NewWikiChange {
  let metadata = WikiMetadata { after: Some(after), ..Default::default() };
  NewWikiChange {
    object_type:   ObjectType::Persona,
    object_id,
    change_type:   ChangeType::Form,
    field_key:     None,
    old_value:     None,
    new_value:     None,
    metadata_json: metadata.to_json().unwrap(),
    changed_by:    by,
  }
}

async fn propose(s: &SqliteStore, object_id: i64, after: Snapshot, by: i64) -> i64 {
  s.create_wiki_change(new_change(object_id, after, by), NO_CAPS).await.unwrap().unwrap().id
}

#[tokio::test]
async fn pending_caps_hold_under_concurrent_inserts() {
  let s = store().await;
  let anna = user(&s, "anna").await;
  let pere = user(&s, "pere").await;
  let caps = PendingCaps { per_object: 2, per_author: 1 };

  let (a, b) = tokio::join!(
    s.create_wiki_change(new_change(1, snap(json!({ "nom": "A" })), anna), caps),
    s.create_wiki_change(new_change(1, snap(json!({ "nom": "B" })), anna), caps),
  );
  let mut outcomes = vec![a.unwrap().map(|c| c.id), b.unwrap().map(|c| c.id)];
  outcomes.sort_by_key(Result::is_err);
  assert!(outcomes[0].is_ok());
  assert_eq!(outcomes[1], Err(PendingCap::Author));

  s.create_wiki_change(new_change(1, snap(json!({ "nom": "C" })), pere), caps).await.unwrap().unwrap();
  let third = user(&s, "marta").await;
  let refused = s.create_wiki_change(new_change(1, snap(json!({ "nom": "D" })), third), caps).await.unwrap();
  assert_eq!(refused.map(|c| c.id), Err(PendingCap::Object));
  assert_eq!(s.count_pending_wiki_changes(ObjectType::Persona, 1, None).await.unwrap(), 2);
}

#[tokio::test]
async fn applying_a_change_writes_and_publishes_once() {
  let s = store().await;
  let anna = user(&s, "anna").await;
  let mod_ = user(&s, "marta").await;
  let p = s
    .create_entity(EntityKind::Persona, snap(json!({ "nom": "Joan" })), anna, ModerationState::Publicat)
    .await
    .unwrap();

  let change = propose(&s, p.id, snap(json!({ "nom": "Joan", "ofici": "pagès" })), anna).await;
  assert_eq!(s.count_pending_wiki_changes(ObjectType::Persona, p.id, Some(anna)).await.unwrap(), 1);
  assert_eq!(s.count_pending_wiki_changes(ObjectType::Persona, p.id, Some(mod_)).await.unwrap(), 0);

  let applied = s.apply_wiki_change(change, mod_, Utc::now()).await.unwrap().unwrap();
  assert_eq!(applied.snapshot.display("ofici"), "pagès");
  assert_eq!(applied.moderation.moderated_by, Some(mod_));

  let stored = s.get_wiki_change(change).await.unwrap().unwrap();
  assert_eq!(stored.moderation_state, ModerationState::Publicat);

  assert!(s.apply_wiki_change(change, mod_, Utc::now()).await.unwrap().is_none());
  assert!(!s.reject_wiki_change(change, mod_, Utc::now()).await.unwrap());
}

#[tokio::test]
async fn change_against_missing_entity_is_not_applied() {
  let s = store().await;
  let anna = user(&s, "anna").await;
  let change = propose(&s, 404, snap(json!({ "nom": "Ningú" })), anna).await;

  assert!(s.apply_wiki_change(change, anna, Utc::now()).await.unwrap().is_none());
  let stored = s.get_wiki_change(change).await.unwrap().unwrap();
  assert_eq!(stored.moderation_state, ModerationState::Pendent);
}

#[tokio::test]
async fn history_is_newest_first_and_queue_oldest_first() {
  let s = store().await;
  let anna = user(&s, "anna").await;
  let first = propose(&s, 1, snap(json!({ "nom": "A" })), anna).await;
  let second = propose(&s, 1, snap(json!({ "nom": "B" })), anna).await;

  let history = s.list_wiki_changes(ObjectType::Persona, 1).await.unwrap();
  assert_eq!(history.iter().map(|c| c.id).collect::<Vec<_>>(), vec![second, first]);

  let queue = s.list_pending_wiki_changes(None, 10, 0).await.unwrap();
  assert_eq!(queue.iter().map(|c| c.id).collect::<Vec<_>>(), vec![first, second]);
}

#[tokio::test]
async fn mark_counts_follow_deltas_and_reconcile() {
  let s = store().await;
  let mark = |user_id, tipus, is_public| WikiMark {
    object_type: ObjectType::Persona,
    object_id: 7,
    user_id,
    tipus,
    is_public,
  };

  assert_eq!(s.upsert_wiki_mark(mark(1, MarkType::Interes, true)).await.unwrap(), None);
  s.upsert_wiki_mark(mark(2, MarkType::Interes, false)).await.unwrap();
  let previous = s.upsert_wiki_mark(mark(1, MarkType::Interes, true)).await.unwrap();
  assert_eq!(previous.map(|m| m.is_public), Some(true));

  let counts = s.list_wiki_public_counts(ObjectType::Persona, 7).await.unwrap();
  assert_eq!(counts.len(), 1);
  assert_eq!(counts[0].n, 1);

  // Drift the counter, then rebuild it from the marks.
  s.inc_wiki_public_count(ObjectType::Persona, 7, MarkType::Interes, 5).await.unwrap();
  let rebuilt = s.reconcile_wiki_public_counts(ObjectType::Persona, 7).await.unwrap();
  assert_eq!(rebuilt.len(), 1);
  assert_eq!(rebuilt[0].n, 1);

  let removed = s.delete_wiki_mark(ObjectType::Persona, 7, 1).await.unwrap();
  assert_eq!(removed.map(|m| m.tipus), Some(MarkType::Interes));
  assert!(s.delete_wiki_mark(ObjectType::Persona, 7, 1).await.unwrap().is_none());
  let counts = s.list_wiki_public_counts(ObjectType::Persona, 7).await.unwrap();
  assert_eq!(counts[0].n, 0);
}

#[tokio::test]
async fn concurrent_identical_marks_count_once() {
  let s = store().await;
  let mark = WikiMark {
    object_type: ObjectType::Persona,
    object_id:   9,
    user_id:     3,
    tipus:       MarkType::Interes,
    is_public:   true,
  };
  let (a, b) = tokio::join!(s.upsert_wiki_mark(mark.clone()), s.upsert_wiki_mark(mark.clone()));
  a.unwrap();
  b.unwrap();
  let counts = s.list_wiki_public_counts(ObjectType::Persona, 9).await.unwrap();
  assert_eq!(counts[0].n, 1);
}

#[tokio::test]
async fn public_count_never_goes_negative() {
  let s = store().await;
  s.inc_wiki_public_count(ObjectType::Cognom, 3, MarkType::Politic, -4).await.unwrap();
  let counts = s.list_wiki_public_counts(ObjectType::Cognom, 3).await.unwrap();
  assert_eq!(counts[0].n, 0);
}

// ─── Points ──────────────────────────────────────────────────────────────────

fn activity(user_id: i64, rule_id: Option<i64>, points: i64, status: ActivityStatus) -> NewActivity {
  NewActivity {
    user_id,
    rule_id,
    action: "crear".into(),
    object_type: "persona".into(),
    object_id: Some(1),
    points,
    status,
    moderated_by: None,
    details: String::new(),
    created_at: Utc::now(),
  }
}

#[tokio::test]
async fn rules_upsert_by_code() {
  let s = store().await;
  let rule = NewPointsRule {
    code:        "persona_create".into(),
    name:        "Persona".into(),
    description: None,
    points:      5,
    active:      true,
  };
  let first = s.save_points_rule(rule.clone()).await.unwrap();
  let second = s.save_points_rule(NewPointsRule { points: 8, ..rule }).await.unwrap();
  assert_eq!(first.id, second.id);
  assert_eq!(second.points, 8);

  s.save_points_rule(NewPointsRule {
    code:        "off".into(),
    name:        "Off".into(),
    description: None,
    points:      1,
    active:      false,
  })
  .await
  .unwrap();
  assert!(s.get_active_rule_by_code("off".into()).await.unwrap().is_none());
  assert_eq!(s.list_points_rules().await.unwrap().len(), 2);
}

#[tokio::test]
async fn status_transition_reports_previous_state() {
  let s = store().await;
  let a = s.create_activity(activity(1, None, 0, ActivityStatus::Pendent)).await.unwrap();

  let prev = s.set_activity_status(a.id, ActivityStatus::Validat, Some(9)).await.unwrap();
  assert_eq!(prev, Some(ActivityStatus::Pendent));
  assert!(s.set_activity_status(a.id, ActivityStatus::Validat, None).await.unwrap().is_none());
  assert!(s.set_activity_status(404, ActivityStatus::Anulat, None).await.unwrap().is_none());

  let stored = s.get_activity(a.id).await.unwrap().unwrap();
  assert_eq!(stored.status, ActivityStatus::Validat);
  assert_eq!(stored.moderated_by, Some(9));
}

#[tokio::test]
async fn activity_and_credit_commit_together() {
  let s = store().await;
  let validated = s.create_activity(activity(1, None, 4, ActivityStatus::Validat)).await.unwrap();
  let pending = s.create_activity(activity(1, None, 3, ActivityStatus::Pendent)).await.unwrap();
  assert_eq!(s.get_user_points(1).await.unwrap(), 4);

  s.set_activity_status(pending.id, ActivityStatus::Validat, Some(9)).await.unwrap();
  assert_eq!(s.get_user_points(1).await.unwrap(), 7);
  s.set_activity_status(validated.id, ActivityStatus::Anulat, Some(9)).await.unwrap();
  assert_eq!(s.get_user_points(1).await.unwrap(), 3);
  s.set_activity_status(validated.id, ActivityStatus::Pendent, Some(9)).await.unwrap();
  assert_eq!(s.get_user_points(1).await.unwrap(), 3);
}

#[tokio::test]
async fn failed_credit_leaves_no_activity() {
  let s = store().await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER frozen_insert BEFORE INSERT ON user_points
           BEGIN SELECT RAISE(ABORT, 'points frozen'); END;
         CREATE TRIGGER frozen_update BEFORE UPDATE ON user_points
           BEGIN SELECT RAISE(ABORT, 'points frozen'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  assert!(s.create_activity(activity(1, None, 5, ActivityStatus::Validat)).await.is_err());
  assert!(s.list_activities_for_user(1).await.unwrap().is_empty());

  let pending = s.create_activity(activity(1, None, 5, ActivityStatus::Pendent)).await.unwrap();
  assert!(s.set_activity_status(pending.id, ActivityStatus::Validat, Some(9)).await.is_err());
  let stored = s.get_activity(pending.id).await.unwrap().unwrap();
  assert_eq!(stored.status, ActivityStatus::Pendent);
  assert_eq!(s.get_user_points(1).await.unwrap(), 0);
}

#[tokio::test]
async fn recalc_counts_only_validated_activity_on_active_rules() {
  let s = store().await;
  let on = s
    .save_points_rule(NewPointsRule {
      code:        "on".into(),
      name:        "On".into(),
      description: None,
      points:      5,
      active:      true,
    })
    .await
    .unwrap();
  let off = s
    .save_points_rule(NewPointsRule {
      code:        "off".into(),
      name:        "Off".into(),
      description: None,
      points:      7,
      active:      false,
    })
    .await
    .unwrap();

  s.create_activity(activity(1, Some(on.id), 5, ActivityStatus::Validat)).await.unwrap();
  s.create_activity(activity(1, Some(on.id), 5, ActivityStatus::Pendent)).await.unwrap();
  s.create_activity(activity(1, Some(off.id), 7, ActivityStatus::Validat)).await.unwrap();
  s.create_activity(activity(2, Some(on.id), 5, ActivityStatus::Anulat)).await.unwrap();
  s.add_points_to_user(2, 100).await.unwrap();

  assert_eq!(s.recalc_user_points().await.unwrap(), 1);
  assert_eq!(s.get_user_points(1).await.unwrap(), 5);
  assert_eq!(s.get_user_points(2).await.unwrap(), 0);

  let joined = s.list_activities_for_user(1).await.unwrap();
  assert_eq!(joined[0].rule_code.as_deref(), Some("on"));
}

// ─── Achievements ────────────────────────────────────────────────────────────

#[tokio::test]
async fn awards_are_unique_per_instance() {
  let s = store().await;
  let a = s
    .save_achievement(NewAchievement {
      code:        "first_person".into(),
      name:        "Primera persona".into(),
      description: None,
      rarity:      Rarity::Common,
      visibility:  Visibility::Visible,
      domain:      AchievementDomain::Persones,
      enabled:     true,
      repeatable:  false,
      icon:        None,
      rule_json:   r#"{"type":"count","threshold":1}"#.into(),
    })
    .await
    .unwrap();

  assert!(s.award_achievement(1, a.id, 1, Utc::now()).await.unwrap());
  assert!(!s.award_achievement(1, a.id, 1, Utc::now()).await.unwrap());
  assert!(s.award_achievement(1, a.id, 2, Utc::now()).await.unwrap());
  assert_eq!(s.list_user_achievements(1).await.unwrap().len(), 2);
  assert_eq!(s.list_enabled_achievements().await.unwrap().len(), 1);
}

// ─── Surnames ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn search_covers_forms_and_variants_of_published_surnames() {
  let s = store().await;
  let puig = s
    .create_entity(EntityKind::Cognom, snap(json!({ "forma": "Puig" })), 1, ModerationState::Publicat)
    .await
    .unwrap();
  s.create_entity(EntityKind::Cognom, snap(json!({ "forma": "Pujol" })), 1, ModerationState::Pendent)
    .await
    .unwrap();

  assert!(s.add_cognom_variant(puig.id, "Puigh".into()).await.unwrap().is_some());
  assert!(s.add_cognom_variant(puig.id, "Puigh".into()).await.unwrap().is_none());

  let hits = s.search_cognoms("pu".into(), 10).await.unwrap();
  assert_eq!(hits.len(), 2);
  assert!(hits.iter().all(|h| h.cognom_id == puig.id));
  assert!(hits.iter().any(|h| h.variant.as_deref() == Some("Puigh")));
}

#[tokio::test]
async fn redirects_upsert_and_suggestions_resolve_once() {
  let s = store().await;
  let r = |to_id| CognomRedirect {
    from_id: 1,
    to_id,
    reason: None,
    created_by: Some(1),
    created_at: Utc::now(),
  };
  s.set_cognom_redirect(r(2)).await.unwrap();
  s.set_cognom_redirect(r(3)).await.unwrap();
  assert_eq!(s.get_cognom_redirect(1).await.unwrap().unwrap().to_id, 3);
  assert_eq!(s.list_cognom_redirects().await.unwrap().len(), 1);

  let sug = s
    .create_redirect_suggestion(NewSuggestion { from_id: 4, to_id: 5, reason: None, created_by: 1 })
    .await
    .unwrap();
  assert!(s.has_pending_suggestion(4, 5).await.unwrap());
  assert!(s.set_suggestion_state(sug.id, SuggestionState::Acceptat, 2, Utc::now()).await.unwrap());
  assert!(!s.set_suggestion_state(sug.id, SuggestionState::Rebutjat, 2, Utc::now()).await.unwrap());
  assert!(!s.has_pending_suggestion(4, 5).await.unwrap());
  assert_eq!(s.list_redirect_suggestions(Some(SuggestionState::Pendent)).await.unwrap().len(), 0);
  assert!(s.delete_cognom_redirect(1).await.unwrap());
}

#[tokio::test]
async fn heatmap_counts_published_persons_by_municipality() {
  let s = store().await;
  let m = s
    .create_entity(EntityKind::Municipi, snap(json!({ "nom": "Olot" })), 1, ModerationState::Publicat)
    .await
    .unwrap();
  for (c1, c2, any, state) in [
    ("Puig", "Vila", 1800, ModerationState::Publicat),
    ("Roca", "puig", 1850, ModerationState::Publicat),
    ("Puig", "Roca", 1950, ModerationState::Publicat),
    ("Puig", "Roca", 1820, ModerationState::Pendent),
  ] {
    s.create_entity(
      EntityKind::Persona,
      snap(json!({ "nom": "X", "cognom1": c1, "cognom2": c2, "any_naixement": any, "municipi_id": m.id })),
      1,
      state,
    )
    .await
    .unwrap();
  }

  let cells = s.cognom_heatmap(vec!["Puig".into()], Some(1700), Some(1900)).await.unwrap();
  assert_eq!(cells.len(), 1);
  assert_eq!(cells[0].municipi_id, m.id);
  assert_eq!(cells[0].persones, 2);
  assert!(s.cognom_heatmap(vec![], None, None).await.unwrap().is_empty());
}

// ─── Transcriptions ──────────────────────────────────────────────────────────

#[tokio::test]
async fn transcription_edit_and_restore() {
  let s = store().await;
  let mut snapshot = TranscripcioSnapshot {
    raw: TranscripcioFields { llibre_id: 1, any: Some(1850), ..Default::default() },
    ..Default::default()
  };
  let created = s.create_transcripcio(snapshot.clone(), 1, ModerationState::Publicat).await.unwrap();
  assert_eq!(created.snapshot, snapshot);

  let before = snapshot.clone();
  let info = ChangeInfo::person("p1", "batejat", "nom");
  snapshot.set(&info, Some("Josep")).unwrap();
  let changes = s
    .save_transcripcio_edit(created.id, snapshot.clone(), vec![NewTranscripcioChange {
      change_type: ChangeType::Field,
      info,
      old_value: None,
      new_value: Some("Josep".into()),
      metadata: TranscripcioMetadata::default(),
      changed_by: 2,
    }])
    .await
    .unwrap()
    .unwrap();
  assert_eq!(changes.len(), 1);
  let live = s.get_transcripcio(created.id).await.unwrap().unwrap();
  assert_eq!(live.snapshot.persones.len(), 1);
  assert_eq!(live.snapshot.persones[0].nom.as_deref(), Some("Josep"));

  let restored = s
    .set_transcripcio_change_state(changes[0].id, ModerationState::Rebutjat, 3, Utc::now(), Some(before.clone()))
    .await
    .unwrap();
  assert!(restored);
  assert_eq!(s.get_transcripcio(created.id).await.unwrap().unwrap().snapshot, before);
  assert!(
    !s.set_transcripcio_change_state(changes[0].id, ModerationState::Publicat, 3, Utc::now(), None)
      .await
      .unwrap()
  );
  assert_eq!(s.list_transcripcio_changes(created.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn editing_missing_transcription_records_nothing() {
  let s = store().await;
  let r = s.save_transcripcio_edit(9, TranscripcioSnapshot::default(), vec![]).await.unwrap();
  assert!(r.is_none());
}
