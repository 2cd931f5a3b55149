//! Cache-first request handling with network fallback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheSource, CacheStorage, CachedEntry, RequestKey};
use crate::error::{AgentFault, FetchError};
use crate::lifecycle::LifecycleState;
use crate::lifetime::{CompletionToken, Lifetime};
use crate::net::{Destination, Network, Request, Response};

/// Response handed back to the caller, with where it came from.
#[derive(Debug)]
pub struct Intercepted {
  pub response: Response,
  pub source: CacheSource,
  /// When the snapshot was stored, for cache and fallback responses
  pub stored_at: Option<DateTime<Utc>>,
  /// Pending write of this response into the cache, for cacheable misses
  pub write: Option<CompletionToken<()>>,
}

impl Intercepted {
  fn network(response: Response, write: Option<CompletionToken<()>>) -> Self {
    Self {
      response,
      source: CacheSource::Network,
      stored_at: None,
      write,
    }
  }

  fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Passthrough,
      stored_at: None,
      write: None,
    }
  }

  fn stored(entry: CachedEntry, source: CacheSource) -> Self {
    Self {
      response: entry.response,
      source,
      stored_at: Some(entry.stored_at),
      write: None,
    }
  }
}

/// Sits between outgoing requests and the network.
///
/// GET requests are answered from the current generation when possible; misses go to
/// the network and successful (200) responses are written back. Failed document and
/// image requests fall back to the cached root page and placeholder icon. Anything
/// returned is either a live response or a stored snapshot.
pub struct Interceptor<S: CacheStorage, N: Network> {
  generation: CacheGeneration<S>,
  network: Arc<N>,
  lifecycle: watch::Receiver<LifecycleState>,
  lifetime: Lifetime,
  root: Url,
  placeholder_icon: Url,
}

impl<S, N> Interceptor<S, N>
where
  S: CacheStorage + 'static,
  N: Network,
{
  pub fn new(
    generation: CacheGeneration<S>,
    network: Arc<N>,
    lifecycle: watch::Receiver<LifecycleState>,
    lifetime: Lifetime,
    root: Url,
    placeholder_icon: Url,
  ) -> Self {
    Self {
      generation,
      network,
      lifecycle,
      lifetime,
      root,
      placeholder_icon,
    }
  }

  /// Whether activation has finished and the cache may be consulted.
  pub fn is_ready(&self) -> bool {
    *self.lifecycle.borrow() == LifecycleState::Active
  }

  pub async fn handle(&self, request: Request) -> Result<Intercepted, FetchError> {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "not cacheable, forwarding");
      return self.forward(request).await;
    }
    if !self.is_ready() {
      debug!(url = %request.url, "cache not active yet, forwarding");
      return self.forward(request).await;
    }

    let Some(key) = RequestKey::for_request(&request) else {
      return self.forward(request).await;
    };

    if let Some(entry) = self.lookup(&key) {
      debug!(url = %request.url, "cache hit");
      return Ok(Intercepted::stored(entry, CacheSource::Cache));
    }

    debug!(url = %request.url, "cache miss");
    let destination = request.destination;
    match self.network.fetch(request).await {
      Ok(response) if response.status == 200 => {
        let write = self.store_in_background(key, response.clone());
        Ok(Intercepted::network(response, Some(write)))
      }
      Ok(response) => Ok(Intercepted::network(response, None)),
      Err(e) => {
        if let Some(entry) = self.fallback_for(destination) {
          info!(fault = %AgentFault::Network(e), "served cached fallback");
          return Ok(Intercepted::stored(entry, CacheSource::Fallback));
        }
        warn!(url = %key.url(), error = %e, "network failure with no fallback");
        Err(FetchError::Network(e))
      }
    }
  }

  async fn forward(&self, request: Request) -> Result<Intercepted, FetchError> {
    let response = self.network.fetch(request).await?;
    Ok(Intercepted::passthrough(response))
  }

  /// Cache read; a storage failure is treated as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedEntry> {
    match self.generation.lookup(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %key.url(), error = %e, "cache lookup failed, treating as miss");
        None
      }
    }
  }

  fn fallback_for(&self, destination: Destination) -> Option<CachedEntry> {
    let url = match destination {
      Destination::Document => &self.root,
      Destination::Image => &self.placeholder_icon,
      Destination::Other => return None,
    };
    self.lookup(&RequestKey::get(url))
  }

  /// Write the snapshot off the response path.
  fn store_in_background(&self, key: RequestKey, response: Response) -> CompletionToken<()> {
    let generation = self.generation.clone();
    self.lifetime.wait_until("cache write", async move {
      match generation.store(&key, &response).await {
        Ok(evicted) if !evicted.is_empty() => {
          debug!(url = %key.url(), evicted = evicted.len(), "cache write trimmed generation")
        }
        Ok(_) => {}
        Err(e) => warn!(url = %key.url(), error = %e, "cache write failed"),
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{EvictionPolicy, SqliteStorage};
  use crate::net::testing::ScriptedNetwork;

  const ORIGIN: &str = "http://localhost:5000";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  struct Fixture {
    interceptor: Interceptor<SqliteStorage, ScriptedNetwork>,
    generation: CacheGeneration<SqliteStorage>,
    network: ScriptedNetwork,
    lifetime: Lifetime,
    state: watch::Sender<LifecycleState>,
  }

  fn fixture(max_items: usize) -> Fixture {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let generation = CacheGeneration::new(storage, "app-cache-v2", EvictionPolicy::new(max_items));
    let network = ScriptedNetwork::new();
    let lifetime = Lifetime::new();
    let (state, receiver) = watch::channel(LifecycleState::Active);

    let interceptor = Interceptor::new(
      generation.clone(),
      Arc::new(network.clone()),
      receiver,
      lifetime.clone(),
      url("/"),
      url("/icon-192.png"),
    );

    Fixture {
      interceptor,
      generation,
      network,
      lifetime,
      state,
    }
  }

  fn seed(generation: &CacheGeneration<SqliteStorage>, path: &str, body: &str) {
    generation
      .storage()
      .put(
        generation.name(),
        &RequestKey::get(&url(path)),
        &Response::new(url(path), 200, body),
      )
      .unwrap();
  }

  #[tokio::test]
  async fn test_hit_makes_no_network_call() {
    let f = fixture(50);
    seed(&f.generation, "/menu", "cached menu");
    f.network.respond("/menu", 200, "live menu");

    let result = f.interceptor.handle(Request::get(url("/menu"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.response.body, b"cached menu");
    assert!(result.stored_at.is_some());
    assert_eq!(f.network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_miss_populates_cache() {
    let f = fixture(50);
    f.network.respond("/menu", 200, "live menu");

    let result = f.interceptor.handle(Request::get(url("/menu"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.response.body, b"live menu");
    result.write.unwrap().await.unwrap();

    let second = f.interceptor.handle(Request::get(url("/menu"))).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.response, result.response);
    assert_eq!(f.network.call_count(), 1);
  }

  #[tokio::test]
  async fn test_non_200_is_not_cached() {
    let f = fixture(50);
    f.network.respond("/missing", 404, "nope").respond("/created", 201, "ok");

    for path in ["/missing", "/created"] {
      let result = f.interceptor.handle(Request::get(url(path))).await.unwrap();
      assert_eq!(result.source, CacheSource::Network);
      assert!(result.write.is_none());
    }
    f.lifetime.settled().await;
    assert_eq!(f.generation.len().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_non_get_bypasses_cache() {
    let f = fixture(50);
    seed(&f.generation, "/orders", "cached");
    f.network.respond("/orders", 200, "created");

    let request = Request::post_json(url("/orders"), b"{}".to_vec());
    let result = f.interceptor.handle(request).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
    assert_eq!(result.response.body, b"created");
    assert!(result.write.is_none());

    f.lifetime.settled().await;
    let keys = f.generation.storage().keys(f.generation.name()).unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(f.network.calls()[0].0, Method::POST);
  }

  #[tokio::test]
  async fn test_document_falls_back_to_root() {
    let f = fixture(50);
    seed(&f.generation, "/", "home page");
    f.network.fail("/cocina");

    let result = f.interceptor.handle(Request::navigate(url("/cocina"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.response.body, b"home page");
  }

  #[tokio::test]
  async fn test_image_falls_back_to_placeholder() {
    let f = fixture(50);
    seed(&f.generation, "/icon-192.png", "icon");
    f.network.fail("/photos/pizza.png");

    let result = f
      .interceptor
      .handle(Request::image(url("/photos/pizza.png")))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Fallback);
    assert_eq!(result.response.body, b"icon");
  }

  #[tokio::test]
  async fn test_other_failure_propagates() {
    let f = fixture(50);
    seed(&f.generation, "/", "home page");
    seed(&f.generation, "/icon-192.png", "icon");
    f.network.fail("/app.js");

    let err = f.interceptor.handle(Request::get(url("/app.js"))).await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn test_fallback_missing_propagates() {
    let f = fixture(50);
    f.network.fail("/cocina");

    let result = f.interceptor.handle(Request::navigate(url("/cocina"))).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_not_ready_forwards_without_caching() {
    let f = fixture(50);
    f.state.send_replace(LifecycleState::Activating);
    seed(&f.generation, "/menu", "cached menu");
    f.network.respond("/menu", 200, "live menu");

    let result = f.interceptor.handle(Request::get(url("/menu"))).await.unwrap();
    assert_eq!(result.source, CacheSource::Passthrough);
    assert_eq!(result.response.body, b"live menu");
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_misses_respect_limit() {
    let f = Arc::new(fixture(5));
    for i in 0..20 {
      f.network.respond(&format!("/item/{}", i), 200, "x");
    }

    let mut handles = Vec::new();
    for i in 0..20 {
      let f = Arc::clone(&f);
      handles.push(tokio::spawn(async move {
        f.interceptor
          .handle(Request::get(url(&format!("/item/{}", i))))
          .await
          .unwrap();
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    f.lifetime.settled().await;
    assert_eq!(f.generation.len().unwrap(), 5);
  }
}
