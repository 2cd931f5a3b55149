use color_eyre::Result;
use tracing::debug;

use super::storage::CacheStorage;
use super::traits::RequestKey;

/// Bounds the number of entries in a generation, oldest first out.
///
/// Only the entry count is bounded; entry sizes are not weighed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
  max_items: usize,
}

impl EvictionPolicy {
  pub const DEFAULT_MAX_ITEMS: usize = 50;

  pub fn new(max_items: usize) -> Self {
    Self { max_items }
  }

  /// Delete oldest entries until the generation holds at most `max_items`.
  ///
  /// Callers must hold the generation's write lock so the count cannot move underneath.
  pub fn enforce<S: CacheStorage + ?Sized>(
    &self,
    storage: &S,
    generation: &str,
  ) -> Result<Vec<RequestKey>> {
    let mut evicted = Vec::new();

    while storage.count(generation)? > self.max_items {
      match storage.delete_oldest(generation)? {
        Some(key) => {
          debug!(generation, url = %key.url(), "evicted oldest cache entry");
          evicted.push(key);
        }
        None => break,
      }
    }

    Ok(evicted)
  }
}

impl Default for EvictionPolicy {
  fn default() -> Self {
    Self::new(Self::DEFAULT_MAX_ITEMS)
  }
}
