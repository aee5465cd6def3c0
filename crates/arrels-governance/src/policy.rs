//! Territory-scoped permission evaluation.
//!
//! A user's grants are the union of the policies attached to them directly
//! and through their groups. For one permission key the decision is:
//! any `deny` refuses, otherwise any `allow` grants, otherwise an
//! `allow-scoped` grants when the request target, expanded up the
//! territorial and ecclesiastic hierarchies, meets one of its anchors.

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
};

use serde_json::Value;
use tracing::{debug, warn};

use arrels_core::{
  EntityKind, Snapshot, UserId,
  cognom::MAX_REDIRECT_STEPS,
  policy::{
    Capabilities, NewPolicy, Permission, PermissionTarget, Policy, PolicyAssignment, PolicyDocument,
    PolicyId, ScopeMask, ScopeTargets, keys,
  },
  store::Store,
  user::GroupId,
};

use crate::{Error, Governance, RequestContext, Result};

/// Parsed permission documents by policy id. Malformed documents are absent.
pub(crate) type PolicyMap = HashMap<PolicyId, Arc<PolicyDocument>>;

/// The permission key guarding edits to `kind`.
pub fn edit_key(kind: EntityKind) -> &'static str {
  match kind {
    EntityKind::Pais => keys::TERRITORI_PAISOS_EDIT,
    EntityKind::Nivell => keys::TERRITORI_NIVELLS_EDIT,
    EntityKind::Municipi => keys::TERRITORI_MUNICIPIS_EDIT,
    EntityKind::Arquebisbat => keys::ECLESIA_ENTITATS_EDIT,
    EntityKind::Arxiu => keys::ARXIUS_EDIT,
    EntityKind::Llibre => keys::LLIBRES_EDIT,
    EntityKind::Persona => keys::PERSONES_EDIT,
    EntityKind::Cognom => keys::COGNOMS_EDIT,
    EntityKind::EventHistoric => keys::EVENTS_EDIT,
  }
}

/// The key guarding privileged listings of `kind`, where one exists.
pub fn view_key(kind: EntityKind) -> Option<&'static str> {
  match kind {
    EntityKind::Municipi => Some(keys::TERRITORI_MUNICIPIS_VIEW),
    EntityKind::Arxiu => Some(keys::ARXIUS_VIEW),
    EntityKind::Llibre => Some(keys::LLIBRES_VIEW),
    _ => None,
  }
}

fn int(snapshot: &Snapshot, key: &str) -> Option<i64> {
  snapshot.get(key).and_then(Value::as_i64).filter(|id| *id > 0)
}

fn ids(snapshot: &Snapshot, key: &str) -> Vec<i64> {
  match snapshot.get(key) {
    Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
    _ => Vec::new(),
  }
}

/// The anchor of an entity of `kind`. `id` is `None` for a row that does not
/// exist yet, in which case the anchor comes from its references.
pub fn entity_target(kind: EntityKind, id: Option<i64>, snapshot: &Snapshot) -> PermissionTarget {
  let mut t = PermissionTarget::global();
  match kind {
    EntityKind::Pais => t.pais_id = id,
    EntityKind::Nivell => t.pais_id = int(snapshot, "pais_id"),
    EntityKind::Municipi => {
      t.municipi_id = id;
      t.pais_id = int(snapshot, "pais_id");
    }
    EntityKind::Arquebisbat => {
      t.eclesiastic_id = id.or_else(|| int(snapshot, "parent_id"));
      t.pais_id = int(snapshot, "pais_id");
    }
    EntityKind::Arxiu => {
      t.arxiu_id = id;
      t.municipi_id = int(snapshot, "municipi_id");
      t.eclesiastic_id = int(snapshot, "entitat_eclesiastica_id");
    }
    EntityKind::Llibre => {
      t.llibre_id = id;
      t.arxiu_id = ids(snapshot, "arxius").first().copied();
      t.municipi_id = int(snapshot, "municipi_id");
      t.eclesiastic_id = int(snapshot, "arquebisbat_id");
    }
    EntityKind::Persona | EntityKind::EventHistoric => t.municipi_id = int(snapshot, "municipi_id"),
    EntityKind::Cognom => {}
  }
  t
}

// ─── Anchors ─────────────────────────────────────────────────────────────────

/// A request target expanded along every hierarchy it sits in.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Anchors {
  pub arxius:    BTreeSet<i64>,
  pub municipis: BTreeSet<i64>,
  /// Administrative levels, including every ancestor.
  pub nivells:   BTreeSet<i64>,
  pub paisos:    BTreeSet<i64>,
  /// Ecclesiastic entities, including every ancestor.
  pub ecles:     BTreeSet<i64>,
}

impl Anchors {
  pub fn matches(&self, targets: &ScopeTargets) -> bool {
    let meets = |a: &BTreeSet<i64>, b: &BTreeSet<i64>| !a.is_disjoint(b);
    meets(&self.arxius, &targets.arxiu_ids)
      || meets(&self.municipis, &targets.municipi_ids)
      || meets(&self.nivells, &targets.provincia_ids)
      || meets(&self.nivells, &targets.comarca_ids)
      || meets(&self.paisos, &targets.pais_ids)
      || meets(&self.ecles, &targets.ecles_ids)
  }
}

/// Every grant one user holds for one key.
#[derive(Debug, Default)]
struct Grants {
  denied: bool,
  global: bool,
  scoped: Vec<ScopeTargets>,
}

fn grants(docs: &[Arc<PolicyDocument>], key: &str) -> Grants {
  let mut g = Grants::default();
  for doc in docs {
    for permission in doc.lookup(key) {
      match permission {
        Permission::Deny => g.denied = true,
        Permission::AllowGlobal => g.global = true,
        Permission::AllowScoped(targets) => g.scoped.push(targets.clone()),
      }
    }
  }
  g
}

fn mask_of(g: &Grants) -> ScopeMask {
  if g.denied {
    return ScopeMask::default();
  }
  if g.global {
    return ScopeMask::global();
  }
  let mut mask = ScopeMask::default();
  for targets in &g.scoped {
    mask.add(targets);
  }
  mask
}

/// Union of two masks.
pub fn merge_masks(mut a: ScopeMask, b: &ScopeMask) -> ScopeMask {
  a.has_global |= b.has_global;
  a.arxiu_ids.extend(&b.arxiu_ids);
  a.municipi_ids.extend(&b.municipi_ids);
  a.provincia_ids.extend(&b.provincia_ids);
  a.comarca_ids.extend(&b.comarca_ids);
  a.pais_ids.extend(&b.pais_ids);
  a.ecles_ids.extend(&b.ecles_ids);
  a
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

impl<S: Store> Governance<S> {
  async fn policy_map(&self) -> Result<Arc<PolicyMap>> {
    let (generation, cached) = self.policies.get();
    if let Some(map) = cached {
      return Ok(map);
    }
    let policies = self.store.list_policies().await.map_err(Error::store)?;
    let mut map = PolicyMap::with_capacity(policies.len());
    for policy in policies {
      match PolicyDocument::parse(&policy.document) {
        Ok(doc) => {
          map.insert(policy.id, Arc::new(doc));
        }
        Err(e) => warn!(policy = policy.id, error = %e, "ignoring malformed policy document"),
      }
    }
    debug!(policies = map.len(), "policy cache rebuilt");
    Ok(self.policies.install(generation, map))
  }

  async fn documents_for(&self, user: UserId) -> Result<Vec<Arc<PolicyDocument>>> {
    let ids = self.store.list_policy_ids_for_user(user).await.map_err(Error::store)?;
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let map = self.policy_map().await?;
    Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
  }

  /// Decide whether `user` may perform `key` on `target`.
  pub async fn has_permission(&self, user: UserId, key: &str, target: PermissionTarget) -> Result<bool> {
    let docs = self.documents_for(user).await?;
    let g = grants(&docs, key);
    if g.denied {
      return Ok(false);
    }
    if g.global {
      return Ok(true);
    }
    if g.scoped.is_empty() || target.is_global() {
      return Ok(false);
    }
    let anchors = self.expand_target(target).await?;
    Ok(g.scoped.iter().any(|t| anchors.matches(t)))
  }

  /// [`Self::has_permission`] for the caller, failing with
  /// [`Error::Denied`].
  pub async fn require_permission(
    &self,
    ctx: &RequestContext,
    key: &str,
    target: PermissionTarget,
  ) -> Result<()> {
    if self.has_permission(ctx.user_id, key, target).await? {
      Ok(())
    } else {
      debug!(user = ctx.user_id, key, ?target, "permission denied");
      Err(Error::Denied(key.to_owned()))
    }
  }

  /// The mask list queries apply for `key`. Empty means no access.
  pub async fn list_scope(&self, user: UserId, key: &str) -> Result<ScopeMask> {
    let docs = self.documents_for(user).await?;
    Ok(mask_of(&grants(&docs, key)))
  }

  /// Coarse capabilities: each is "allowed globally or in some scope".
  pub async fn permissions_for_user(&self, user: UserId) -> Result<Capabilities> {
    let docs = self.documents_for(user).await?;
    let any = |key: &str| !mask_of(&grants(&docs, key)).is_empty();
    let manage_policies = any(keys::ADMIN_POLITIQUES);
    Ok(Capabilities {
      admin: manage_policies || any(keys::ADMIN_USERS),
      moderate: any(keys::MODERACIO),
      manage_territory: any(keys::TERRITORI_MUNICIPIS_EDIT)
        || any(keys::TERRITORI_NIVELLS_EDIT)
        || any(keys::TERRITORI_PAISOS_EDIT),
      manage_eclesia: any(keys::ECLESIA_ENTITATS_EDIT),
      manage_archives: any(keys::ARXIUS_EDIT),
      manage_books: any(keys::LLIBRES_EDIT),
      edit_persons: any(keys::PERSONES_EDIT),
      edit_surnames: any(keys::COGNOMS_EDIT),
      merge_surnames: any(keys::COGNOMS_MERGE),
      manage_policies,
      manage_achievements: any(keys::ADMIN_ACHIEVEMENTS),
      manage_points: any(keys::ADMIN_PUNTS),
    })
  }

  /// Drop every cached permission document.
  pub fn invalidate_policies(&self) { self.policies.invalidate(); }

  /// Expand `target` to the archives, municipalities, levels, countries and
  /// ecclesiastic entities it sits under.
  pub async fn expand_target(&self, target: PermissionTarget) -> Result<Anchors> {
    let mut a = Anchors::default();
    a.paisos.extend(target.pais_id);
    a.arxius.extend(target.arxiu_id);
    a.municipis.extend(target.municipi_id);
    let mut ecles_roots: Vec<i64> = target.eclesiastic_id.into_iter().collect();

    if let Some(id) = target.llibre_id
      && let Some(llibre) = self.load(EntityKind::Llibre, id).await?
    {
      a.arxius.extend(ids(&llibre, "arxius"));
      a.municipis.extend(int(&llibre, "municipi_id"));
      ecles_roots.extend(int(&llibre, "arquebisbat_id"));
    }

    for arxiu in a.arxius.clone() {
      if let Some(snap) = self.load(EntityKind::Arxiu, arxiu).await? {
        a.municipis.extend(int(&snap, "municipi_id"));
        ecles_roots.extend(int(&snap, "entitat_eclesiastica_id"));
      }
    }

    let mut nivell_roots = Vec::new();
    for municipi in a.municipis.clone() {
      if let Some(snap) = self.load(EntityKind::Municipi, municipi).await? {
        a.paisos.extend(int(&snap, "pais_id"));
        nivell_roots.extend(ids(&snap, "nivells"));
      }
    }
    for root in nivell_roots {
      self.walk_up(EntityKind::Nivell, root, &mut a.nivells, &mut a.paisos).await?;
    }
    for root in ecles_roots {
      self.walk_up(EntityKind::Arquebisbat, root, &mut a.ecles, &mut a.paisos).await?;
    }
    Ok(a)
  }

  async fn load(&self, kind: EntityKind, id: i64) -> Result<Option<Snapshot>> {
    let entity = self.store.get_entity(kind, id).await.map_err(Error::store)?;
    Ok(entity.map(|e| e.snapshot))
  }

  /// Collect `start` and its `parent_id` ancestors, with their countries.
  async fn walk_up(
    &self,
    kind: EntityKind,
    start: i64,
    into: &mut BTreeSet<i64>,
    paisos: &mut BTreeSet<i64>,
  ) -> Result<()> {
    let mut next = Some(start);
    for _ in 0..MAX_REDIRECT_STEPS {
      let Some(id) = next else { break };
      if !into.insert(id) {
        break;
      }
      let Some(snap) = self.load(kind, id).await? else { break };
      paisos.extend(int(&snap, "pais_id"));
      next = int(&snap, "parent_id");
    }
    Ok(())
  }

  // ─── Policy administration ──────────────────────────────────────────────

  /// Create or overwrite a policy. The document must parse.
  pub async fn save_policy(&self, ctx: &RequestContext, policy: NewPolicy) -> Result<Policy> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    PolicyDocument::parse(&policy.document)?;
    ctx.ensure_active()?;
    let saved = self.store.save_policy(policy).await.map_err(Error::store)?;
    self.invalidate_policies();
    Ok(saved)
  }

  pub async fn list_policies(&self, ctx: &RequestContext) -> Result<Vec<Policy>> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    self.store.list_policies().await.map_err(Error::store)
  }

  pub async fn list_policy_assignments(&self, ctx: &RequestContext) -> Result<Vec<PolicyAssignment>> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    self.store.list_policy_assignments().await.map_err(Error::store)
  }

  pub async fn assign_policy_to_user(
    &self,
    ctx: &RequestContext,
    policy: PolicyId,
    user: UserId,
  ) -> Result<()> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    self.ensure_policy(policy).await?;
    ctx.ensure_active()?;
    self.store.assign_policy_to_user(policy, user).await.map_err(Error::store)
  }

  pub async fn unassign_policy_from_user(
    &self,
    ctx: &RequestContext,
    policy: PolicyId,
    user: UserId,
  ) -> Result<bool> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    ctx.ensure_active()?;
    self.store.unassign_policy_from_user(policy, user).await.map_err(Error::store)
  }

  pub async fn assign_policy_to_group(
    &self,
    ctx: &RequestContext,
    policy: PolicyId,
    group: GroupId,
  ) -> Result<()> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    self.ensure_policy(policy).await?;
    ctx.ensure_active()?;
    self.store.assign_policy_to_group(policy, group).await.map_err(Error::store)
  }

  pub async fn unassign_policy_from_group(
    &self,
    ctx: &RequestContext,
    policy: PolicyId,
    group: GroupId,
  ) -> Result<bool> {
    self.require_permission(ctx, keys::ADMIN_POLITIQUES, PermissionTarget::global()).await?;
    ctx.ensure_active()?;
    self.store.unassign_policy_from_group(policy, group).await.map_err(Error::store)
  }

  async fn ensure_policy(&self, id: PolicyId) -> Result<()> {
    match self.store.get_policy(id).await.map_err(Error::store)? {
      Some(_) => Ok(()),
      None => Err(Error::NotFound { kind: "policy", id }),
    }
  }
}

#[cfg(test)]
mod tests {
  use arrels_core::{
    EntityKind,
    policy::{PermissionTarget, keys},
    store::{PolicyRepository, UserRepository},
  };
  use serde_json::json;

  use crate::testutil::{engine, grant, published, user};

  #[tokio::test]
  async fn scoped_archive_edit_follows_municipality() {
    let (gov, store) = engine().await;
    let u1 = user(&store, "u1").await;
    grant(
      &store,
      u1,
      r#"{"documentals.arxius.edit": "allow-scoped", "targets": {"municipi_id": [42]}}"#,
    )
    .await;
    let a10 = published(&store, EntityKind::Arxiu, json!({"nom": "A10", "municipi_id": 42})).await;
    let a11 = published(&store, EntityKind::Arxiu, json!({"nom": "A11", "municipi_id": 99})).await;

    assert!(gov.has_permission(u1, keys::ARXIUS_EDIT, PermissionTarget::arxiu(a10)).await.unwrap());
    assert!(!gov.has_permission(u1, keys::ARXIUS_EDIT, PermissionTarget::arxiu(a11)).await.unwrap());
    assert!(!gov.has_permission(u1, keys::ARXIUS_EDIT, PermissionTarget::global()).await.unwrap());
  }

  #[tokio::test]
  async fn deny_beats_allow_and_allow_beats_nothing() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    assert!(!gov.has_permission(u, keys::PERSONES_EDIT, PermissionTarget::global()).await.unwrap());

    grant(&store, u, r#"{"persones.edit": "allow"}"#).await;
    gov.invalidate_policies();
    assert!(gov.has_permission(u, keys::PERSONES_EDIT, PermissionTarget::global()).await.unwrap());

    // Adding an unrelated scoped grant never removes access.
    grant(&store, u, r#"{"persones.edit": {"effect": "allow-scoped", "targets": {"pais_id": 1}}}"#)
      .await;
    gov.invalidate_policies();
    assert!(gov.has_permission(u, keys::PERSONES_EDIT, PermissionTarget::global()).await.unwrap());

    grant(&store, u, r#"{"persones.*": "deny"}"#).await;
    gov.invalidate_policies();
    assert!(!gov.has_permission(u, keys::PERSONES_EDIT, PermissionTarget::global()).await.unwrap());
    assert!(gov.list_scope(u, keys::PERSONES_EDIT).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn group_policies_apply_to_members() {
    let (gov, store) = engine().await;
    let u = user(&store, "membre").await;
    let group = store.create_group("moderadors".into()).await.unwrap();
    store.add_user_to_group(u, group.id).await.unwrap();
    let policy = store
      .save_policy(arrels_core::policy::NewPolicy {
        id:         None,
        nom:        "moderacio".into(),
        descripcio: None,
        document:   r#"{"moderacio.moderate": true}"#.into(),
      })
      .await
      .unwrap();
    store.assign_policy_to_group(policy.id, group.id).await.unwrap();

    let caps = gov.permissions_for_user(u).await.unwrap();
    assert!(caps.moderate);
    assert!(!caps.admin);
  }

  #[tokio::test]
  async fn book_inherits_archive_and_ecclesiastic_ancestors() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    let bisbat = published(&store, EntityKind::Arquebisbat, json!({"nom": "Tarragona"})).await;
    let parroquia =
      published(&store, EntityKind::Arquebisbat, json!({"nom": "Sant Pere", "parent_id": bisbat}))
        .await;
    let arxiu = published(
      &store,
      EntityKind::Arxiu,
      json!({"nom": "Parroquial", "entitat_eclesiastica_id": parroquia}),
    )
    .await;
    let llibre =
      published(&store, EntityKind::Llibre, json!({"titol": "Baptismes I", "arxius": [arxiu]})).await;
    grant(
      &store,
      u,
      &format!(r#"{{"documentals.llibres.edit": {{"effect": "allow-scoped", "targets": {{"ecles_id": [{bisbat}]}}}}}}"#),
    )
    .await;

    assert!(gov.has_permission(u, keys::LLIBRES_EDIT, PermissionTarget::llibre(llibre)).await.unwrap());
    let other = published(&store, EntityKind::Llibre, json!({"titol": "Òbits"})).await;
    assert!(!gov.has_permission(u, keys::LLIBRES_EDIT, PermissionTarget::llibre(other)).await.unwrap());
  }

  #[tokio::test]
  async fn municipality_matches_through_levels_and_country() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    let pais = published(&store, EntityKind::Pais, json!({"nom": "Andorra", "codi_iso2": "AD"})).await;
    let provincia = published(&store, EntityKind::Nivell, json!({"nom": "Girona", "nivell": 1})).await;
    let comarca = published(
      &store,
      EntityKind::Nivell,
      json!({"nom": "Garrotxa", "nivell": 2, "parent_id": provincia}),
    )
    .await;
    let olot =
      published(&store, EntityKind::Municipi, json!({"nom": "Olot", "nivells": [comarca]})).await;
    let canillo =
      published(&store, EntityKind::Municipi, json!({"nom": "Canillo", "pais_id": pais})).await;
    grant(
      &store,
      u,
      &format!(
        r#"{{"territori.municipis.edit": "allow-scoped", "targets": {{"provincia_id": [{provincia}], "pais_id": [{pais}]}}}}"#
      ),
    )
    .await;

    let edit = keys::TERRITORI_MUNICIPIS_EDIT;
    assert!(gov.has_permission(u, edit, PermissionTarget::municipi(olot)).await.unwrap());
    assert!(gov.has_permission(u, edit, PermissionTarget::municipi(canillo)).await.unwrap());

    let mask = gov.list_scope(u, edit).await.unwrap();
    assert!(!mask.has_global);
    assert!(mask.provincia_ids.contains(&provincia));
  }

  #[tokio::test]
  async fn malformed_documents_deny() {
    let (gov, store) = engine().await;
    let u = user(&store, "u").await;
    grant(&store, u, r#"{"persones.edit": "sometimes"}"#).await;
    assert!(!gov.has_permission(u, keys::PERSONES_EDIT, PermissionTarget::global()).await.unwrap());
    assert!(gov.list_scope(u, "unknown.key").await.unwrap().is_empty());
  }
}
