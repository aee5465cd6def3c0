//! Kinship and interest marks, and the public counters they feed.

use std::collections::HashSet;

use tracing::{debug, warn};

use arrels_core::{
  store::Store,
  wiki::{MarkType, ObjectType, PublicCount, WikiMark},
};

use super::MARK_ROUTE;
use crate::{Error, Governance, Guardrail, RequestContext, Result};

impl<S: Store> Governance<S> {
  /// Set the caller's mark on an object, replacing any earlier one.
  pub async fn mark(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    object_id: i64,
    tipus: &str,
    is_public: bool,
  ) -> Result<WikiMark> {
    let tipus: MarkType = tipus
      .trim()
      .parse()
      .map_err(|_| Error::validation(format!("unknown mark type {tipus:?}")))?;
    let object_id = self.canonical_object(object_type, object_id).await?;
    self.access(ctx, object_type.entity_kind(), object_id).await?;
    self.check_mark_rate(ctx)?;
    ctx.ensure_active()?;

    let mark = WikiMark { object_type, object_id, user_id: ctx.user_id, tipus, is_public };
    self.store.upsert_wiki_mark(mark.clone()).await.map_err(Error::store)?;
    Ok(mark)
  }

  /// Remove the caller's mark. `false` if there was none.
  pub async fn unmark(&self, ctx: &RequestContext, object_type: ObjectType, object_id: i64) -> Result<bool> {
    let object_id = self.canonical_object(object_type, object_id).await?;
    self.access(ctx, object_type.entity_kind(), object_id).await?;
    self.check_mark_rate(ctx)?;
    ctx.ensure_active()?;

    let removed = self
      .store
      .delete_wiki_mark(object_type, object_id, ctx.user_id)
      .await
      .map_err(Error::store)?;
    Ok(removed.is_some())
  }

  fn check_mark_rate(&self, ctx: &RequestContext) -> Result<()> {
    if self.mark_limiter.check(MARK_ROUTE, &ctx.user_id.to_string()) {
      Ok(())
    } else {
      debug!(user = ctx.user_id, "mark rate limited");
      Err(Error::Guardrail(Guardrail::RateLimited))
    }
  }

  /// Public mark counts of an object, for its statistics page.
  pub async fn public_counts(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    object_id: i64,
  ) -> Result<Vec<PublicCount>> {
    let object_id = self.canonical_object(object_type, object_id).await?;
    self.access(ctx, object_type.entity_kind(), object_id).await?;
    self.store.list_wiki_public_counts(object_type, object_id).await.map_err(Error::store)
  }

  pub async fn user_mark(
    &self,
    ctx: &RequestContext,
    object_type: ObjectType,
    object_id: i64,
  ) -> Result<Option<WikiMark>> {
    let object_id = self.canonical_object(object_type, object_id).await?;
    self
      .store
      .get_wiki_mark(object_type, object_id, ctx.user_id)
      .await
      .map_err(Error::store)
  }

  /// Rebuild an object's public counts from its marks, logging any drift
  /// from the stored counters.
  pub async fn reconcile_wiki_counts(&self, object_type: ObjectType, object_id: i64) -> Result<Vec<PublicCount>> {
    let before = self.store.list_wiki_public_counts(object_type, object_id).await.map_err(Error::store)?;
    let after = self
      .store
      .reconcile_wiki_public_counts(object_type, object_id)
      .await
      .map_err(Error::store)?;
    let n = |counts: &[PublicCount], tipus: MarkType| counts.iter().find(|c| c.tipus == tipus).map_or(0, |c| c.n);
    let tipus: HashSet<MarkType> = before.iter().chain(&after).map(|c| c.tipus).collect();
    for tipus in tipus {
      let (stored, actual) = (n(&before, tipus), n(&after, tipus));
      if stored != actual {
        warn!(%object_type, object_id, %tipus, stored, actual, "public mark count drifted");
      }
    }
    Ok(after)
  }
}

#[cfg(test)]
mod tests {
  use arrels_core::{
    EntityKind,
    cognom::CognomRedirect,
    store::{CognomRepository, WikiRepository},
  };
  use serde_json::json;

  use super::*;
  use crate::{
    ErrorKind, GovernanceConfig,
    testutil::{ctx, engine, engine_with, published, user},
  };

  fn count(counts: &[PublicCount], tipus: MarkType) -> i64 {
    counts.iter().find(|c| c.tipus == tipus).map_or(0, |c| c.n)
  }

  #[tokio::test]
  async fn counts_follow_final_public_marks() {
    let (gov, store) = engine().await;
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let a = user(&store, "a").await;
    let b = user(&store, "b").await;
    let c = user(&store, "c").await;
    let ot = ObjectType::Persona;

    gov.mark(&ctx(a), ot, p, "consanguini", true).await.unwrap();
    gov.mark(&ctx(b), ot, p, "consanguini", true).await.unwrap();
    gov.mark(&ctx(c), ot, p, "interes", false).await.unwrap();
    gov.mark(&ctx(a), ot, p, "politic", true).await.unwrap();
    gov.mark(&ctx(b), ot, p, "consanguini", false).await.unwrap();
    gov.mark(&ctx(c), ot, p, "interes", true).await.unwrap();
    assert!(gov.unmark(&ctx(c), ot, p).await.unwrap());
    assert!(!gov.unmark(&ctx(c), ot, p).await.unwrap());

    let counts = gov.public_counts(&ctx(a), ot, p).await.unwrap();
    assert_eq!(count(&counts, MarkType::Politic), 1);
    assert_eq!(count(&counts, MarkType::Consanguini), 0);
    assert_eq!(count(&counts, MarkType::Interes), 0);
    assert_eq!(gov.user_mark(&ctx(b), ot, p).await.unwrap().map(|m| m.is_public), Some(false));
  }

  #[tokio::test]
  async fn unknown_mark_type_is_rejected() {
    let (gov, store) = engine().await;
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let u = user(&store, "u").await;
    let err = gov.mark(&ctx(u), ObjectType::Persona, p, "amic", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }

  #[tokio::test]
  async fn marks_are_rate_limited() {
    let config = GovernanceConfig { wiki_mark_burst: 2.0, ..Default::default() };
    let (gov, store) = engine_with(config).await;
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let u = user(&store, "u").await;
    gov.mark(&ctx(u), ObjectType::Persona, p, "interes", true).await.unwrap();
    gov.mark(&ctx(u), ObjectType::Persona, p, "politic", true).await.unwrap();
    let err = gov.mark(&ctx(u), ObjectType::Persona, p, "interes", true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Guardrail);
  }

  #[tokio::test]
  async fn reconcile_repairs_drift() {
    let (gov, store) = engine().await;
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let u = user(&store, "u").await;
    gov.mark(&ctx(u), ObjectType::Persona, p, "interes", true).await.unwrap();
    store.inc_wiki_public_count(ObjectType::Persona, p, MarkType::Interes, 5).await.unwrap();

    let counts = gov.reconcile_wiki_counts(ObjectType::Persona, p).await.unwrap();
    assert_eq!(count(&counts, MarkType::Interes), 1);
  }

  #[tokio::test]
  async fn concurrent_identical_marks_count_once() {
    let (gov, store) = engine().await;
    let p = published(&store, EntityKind::Persona, json!({"nom": "Joan"})).await;
    let u = user(&store, "u").await;
    let c = ctx(u);
    let (a, b) = tokio::join!(
      gov.mark(&c, ObjectType::Persona, p, "interes", true),
      gov.mark(&c, ObjectType::Persona, p, "interes", true),
    );
    a.unwrap();
    b.unwrap();
    let counts = gov.public_counts(&c, ObjectType::Persona, p).await.unwrap();
    assert_eq!(count(&counts, MarkType::Interes), 1);
  }

  #[tokio::test]
  async fn marks_on_a_merged_alias_land_on_the_canonical_surname() {
    let (gov, store) = engine().await;
    let canonical = published(&store, EntityKind::Cognom, json!({"forma": "Puig"})).await;
    let alias = published(&store, EntityKind::Cognom, json!({"forma": "Puitg"})).await;
    store
      .set_cognom_redirect(CognomRedirect {
        from_id:    alias,
        to_id:      canonical,
        reason:     None,
        created_by: None,
        created_at: chrono::Utc::now(),
      })
      .await
      .unwrap();
    let u = user(&store, "u").await;
    let c = ctx(u);

    let mark = gov.mark(&c, ObjectType::Cognom, alias, "interes", true).await.unwrap();
    assert_eq!(mark.object_id, canonical);
    let counts = store.list_wiki_public_counts(ObjectType::Cognom, canonical).await.unwrap();
    assert_eq!(count(&counts, MarkType::Interes), 1);
    assert!(store.list_wiki_public_counts(ObjectType::Cognom, alias).await.unwrap().is_empty());
    assert!(store.get_wiki_mark(ObjectType::Cognom, alias, u).await.unwrap().is_none());

    assert!(gov.unmark(&c, ObjectType::Cognom, alias).await.unwrap());
    let counts = store.list_wiki_public_counts(ObjectType::Cognom, canonical).await.unwrap();
    assert_eq!(count(&counts, MarkType::Interes), 0);
  }
}
