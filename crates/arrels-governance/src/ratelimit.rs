//! Token-bucket rate limiting keyed by route and caller.

use std::time::Instant;

use dashmap::DashMap;

struct Bucket {
  tokens: f64,
  /// Last refill; doubles as the recency used for eviction.
  last:   Instant,
}

/// One token bucket per `(route, key)`, refilled at `rate` tokens per second
/// up to `burst`. A fresh bucket starts full.
pub struct RateLimiter {
  rate:        f64,
  burst:       f64,
  max_buckets: usize,
  buckets:     DashMap<String, Bucket>,
}

impl RateLimiter {
  pub fn new(rate: f64, burst: f64, max_buckets: usize) -> Self {
    Self { rate: rate.max(0.0), burst: burst.max(0.0), max_buckets: max_buckets.max(1), buckets: DashMap::new() }
  }

  /// Take one token for `key` on `route`. `false` when the bucket is empty.
  pub fn check(&self, route: &str, key: &str) -> bool { self.check_at(route, key, Instant::now()) }

  /// [`Self::check`] with an explicit clock reading.
  pub fn check_at(&self, route: &str, key: &str, now: Instant) -> bool {
    let id = format!("{route}|{key}");
    if !self.buckets.contains_key(&id) && self.buckets.len() >= self.max_buckets {
      self.evict_oldest();
    }

    let mut bucket = self.buckets.entry(id).or_insert_with(|| Bucket { tokens: self.burst, last: now });
    let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
    bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
    bucket.last = now.max(bucket.last);
    if bucket.tokens >= 1.0 {
      bucket.tokens -= 1.0;
      true
    } else {
      false
    }
  }

  pub fn len(&self) -> usize { self.buckets.len() }

  pub fn is_empty(&self) -> bool { self.buckets.is_empty() }

  fn evict_oldest(&self) {
    let oldest = self.buckets.iter().min_by_key(|e| e.value().last).map(|e| e.key().clone());
    if let Some(id) = oldest {
      self.buckets.remove(&id);
    }
  }
}
