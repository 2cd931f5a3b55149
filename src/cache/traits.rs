//! Core types for the response cache.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Identity of a cacheable request.
///
/// Only GET requests have an identity, so an entry keyed by any other method cannot be
/// constructed. The fragment is not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  url: Url,
}

impl RequestKey {
  /// Identity of a GET for `url`.
  pub fn get(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self { url }
  }

  /// Identity of `request`, or `None` when its method is not GET.
  pub fn for_request(request: &Request) -> Option<Self> {
    if request.method == Method::GET {
      Some(Self::get(&request.url))
    } else {
      None
    }
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the snapshot was written
  pub stored_at: DateTime<Utc>,
}

/// Indicates where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response for a cache miss
  Network,
  /// Stored snapshot for this exact request
  Cache,
  /// Stored snapshot of a fallback entry after a network failure
  Fallback,
  /// Forwarded unmodified, cache not consulted
  Passthrough,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_non_get_has_no_identity() {
    let post = Request::post_json(url("http://localhost/orders"), b"{}".to_vec());
    assert!(RequestKey::for_request(&post).is_none());

    let head = Request::get(url("http://localhost/")).with_method(Method::HEAD);
    assert!(RequestKey::for_request(&head).is_none());
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::get(&url("http://localhost/menu#drinks"));
    let b = RequestKey::get(&url("http://localhost/menu"));
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_query_string_is_part_of_identity() {
    let a = RequestKey::get(&url("http://localhost/menu?page=1"));
    let b = RequestKey::get(&url("http://localhost/menu?page=2"));
    assert_ne!(a.cache_hash(), b.cache_hash());
  }
}
