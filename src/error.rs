//! Typed failures that cross component boundaries.
//!
//! Storage and configuration errors flow through `color_eyre::Result`. The enums here
//! cover what a caller has to branch on: a live fetch that failed, an intercepted request
//! that could not be answered, and the faults the agent absorbs and only logs.

/// A live network fetch failed before a response was available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
  /// The request did not complete in time.
  #[error("request to {url} timed out")]
  Timeout { url: String },

  /// Connection refused, DNS failure, TLS failure and similar transport errors.
  #[error("request to {url} failed: {reason}")]
  Unreachable { url: String, reason: String },

  /// Headers arrived but reading the body failed.
  #[error("failed to read response body from {url}: {reason}")]
  Body { url: String, reason: String },
}

/// The only failure an intercepted request surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  /// The network failed and no cached fallback applies to the request.
  #[error("network failure with no cached fallback: {0}")]
  Network(#[from] NetworkError),
}

/// Faults the agent recovers from locally. They are logged, never shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentFault {
  /// One or more manifest fetches failed while populating a new generation.
  #[error("install of {generation} left {} manifest path(s) uncached", failed.len())]
  InstallPopulation {
    generation: String,
    failed: Vec<String>,
  },

  /// A live fetch failed and was answered from a fallback entry.
  #[error("network failure recovered from cache: {0}")]
  Network(NetworkError),

  /// A push payload was absent or not a JSON object.
  #[error("push payload could not be decoded: {reason}")]
  PayloadDecode { reason: String },

  /// A status poll failed or returned data that was not a count.
  #[error("order status poll failed: {reason}")]
  Poll { reason: String },

  /// A generation other than the current one was found during activation.
  #[error("stale cache generation {name} present at activation")]
  StaleGeneration { name: String },
}
