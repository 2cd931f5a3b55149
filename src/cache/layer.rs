//! Handle on the current cache generation with single-writer eviction.

use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::debug;

use super::eviction::EvictionPolicy;
use super::storage::CacheStorage;
use super::traits::{CachedEntry, RequestKey};
use crate::net::Response;

/// The current cache generation.
///
/// Reads go straight to storage. Writes are serialized through one lock per generation
/// and every write runs the eviction policy before releasing it, so concurrent misses
/// cannot push the entry count past the limit.
pub struct CacheGeneration<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
  eviction: EvictionPolicy,
  writer: Arc<Mutex<()>>,
}

impl<S: CacheStorage> CacheGeneration<S> {
  pub fn new(storage: Arc<S>, name: impl Into<String>, eviction: EvictionPolicy) -> Self {
    Self {
      name: name.into(),
      storage,
      eviction,
      writer: Arc::new(Mutex::new(())),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Create the generation in storage if it does not exist yet.
  pub fn open(&self) -> Result<()> {
    self.storage.open_generation(&self.name)
  }

  pub fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.get(&self.name, key)
  }

  #[allow(dead_code)]
  pub fn len(&self) -> Result<usize> {
    self.storage.count(&self.name)
  }

  /// Store a snapshot and trim the generation back to its limit.
  ///
  /// Returns the keys evicted to make room.
  pub async fn store(&self, key: &RequestKey, response: &Response) -> Result<Vec<RequestKey>> {
    let _guard = self.writer.lock().await;

    self.storage.put(&self.name, key, response)?;
    debug!(generation = %self.name, url = %key.url(), "stored response snapshot");

    self.eviction.enforce(self.storage.as_ref(), &self.name)
  }
}

impl<S: CacheStorage> Clone for CacheGeneration<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
      eviction: self.eviction,
      writer: Arc::clone(&self.writer),
    }
  }
}
