//! Read-mostly caches invalidated by swapping a version pointer.

use std::sync::{Arc, PoisonError, RwLock};

struct Slot<T> {
  generation: u64,
  value:      Option<Arc<T>>,
}

/// A lazily filled value shared by every request.
///
/// Readers clone the `Arc` under a shared lock and never see a half-built
/// value. A rebuild installs its result only if no invalidation happened
/// since it read the generation, so a slow loader cannot resurrect stale
/// data.
pub(crate) struct VersionedCache<T> {
  slot: RwLock<Slot<T>>,
}

impl<T> Default for VersionedCache<T> {
  fn default() -> Self { Self { slot: RwLock::new(Slot { generation: 0, value: None }) } }
}

impl<T> VersionedCache<T> {
  /// The current generation and, when filled, the cached value.
  pub fn get(&self) -> (u64, Option<Arc<T>>) {
    let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
    (slot.generation, slot.value.clone())
  }

  /// Install a value built after observing `generation`.
  pub fn install(&self, generation: u64, value: T) -> Arc<T> {
    let value = Arc::new(value);
    let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
    if slot.generation == generation {
      slot.value = Some(Arc::clone(&value));
    }
    value
  }

  pub fn invalidate(&self) {
    let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
    slot.generation = slot.generation.wrapping_add(1);
    slot.value = None;
  }
}
