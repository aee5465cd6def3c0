//! The contribution governance engines of Arrels.
//!
//! [`Governance`] is the single shared application object: it owns the
//! repository handle, the engine configuration, the policy and achievement
//! caches and the wiki rate limiters. Every engine is an `impl` block on it,
//! split by concern:
//!
//! * [`policy`]: territory-scoped permission evaluation;
//! * [`wiki`]: proposals, guardrails, history, marks, raw transcriptions;
//! * [`points`]: activity registration and point totals;
//! * [`achievements`]: rule evaluation and bulk recompute;
//! * [`cognoms`]: surname canonicalisation and merges;
//! * [`moderation`]: entity creation and moderation transitions.
//!
//! The engines are generic over [`arrels_core::store::Store`] and never see a
//! concrete backend.

use std::sync::Arc;

use arrels_core::{achievement::Achievement, store::Store};

pub mod achievements;
mod cache;
pub mod cognoms;
pub mod config;
pub mod context;
pub mod error;
pub mod moderation;
pub mod points;
pub mod policy;
pub mod ratelimit;
pub mod wiki;

pub use config::GovernanceConfig;
pub use context::RequestContext;
pub use error::{Error, ErrorKind, Guardrail, Result};

use cache::VersionedCache;
use policy::PolicyMap;
use ratelimit::RateLimiter;

pub struct Governance<S> {
  store:          Arc<S>,
  config:         Arc<GovernanceConfig>,
  policies:       VersionedCache<PolicyMap>,
  achievements:   VersionedCache<Vec<Achievement>>,
  change_limiter: RateLimiter,
  mark_limiter:   RateLimiter,
}

impl<S: Store> Governance<S> {
  pub fn new(store: Arc<S>, config: GovernanceConfig) -> Self {
    let change_limiter = RateLimiter::new(
      config.wiki_change_rate,
      config.wiki_change_burst,
      config.rate_limit_max_buckets,
    );
    let mark_limiter =
      RateLimiter::new(config.wiki_mark_rate, config.wiki_mark_burst, config.rate_limit_max_buckets);
    Self {
      store,
      config: Arc::new(config),
      policies: VersionedCache::default(),
      achievements: VersionedCache::default(),
      change_limiter,
      mark_limiter,
    }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn config(&self) -> &GovernanceConfig { &self.config }
}

#[cfg(test)]
pub(crate) mod testutil;
