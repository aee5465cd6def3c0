//! Engine tunables.

use serde::Deserialize;

/// The limits and rates the engines run with. Every field has the default
/// the deployment documentation lists, so a partial table deserialises.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
  /// Largest accepted wiki metadata document, in bytes (inclusive).
  pub wiki_meta_max_bytes:               usize,
  pub wiki_pending_per_user:             i64,
  pub wiki_pending_per_object:           i64,
  /// Tokens per second for wiki proposals.
  pub wiki_change_rate:                  f64,
  pub wiki_change_burst:                 f64,
  pub wiki_mark_rate:                    f64,
  pub wiki_mark_burst:                   f64,
  /// Offset from UTC applied when bucketing activity into streak days.
  pub achievement_streak_offset_minutes: i32,
  /// Buckets kept per limiter before the least recently used is evicted.
  pub rate_limit_max_buckets:            usize,
}

impl Default for GovernanceConfig {
  fn default() -> Self {
    Self {
      wiki_meta_max_bytes:               65_536,
      wiki_pending_per_user:             10,
      wiki_pending_per_object:           200,
      wiki_change_rate:                  0.5,
      wiki_change_burst:                 30.0,
      wiki_mark_rate:                    1.0,
      wiki_mark_burst:                   60.0,
      achievement_streak_offset_minutes: 0,
      rate_limit_max_buckets:            10_000,
    }
  }
}
