//! Completion tokens that keep the agent alive until side effects finish.
//!
//! Every asynchronous operation with visible side effects (populating the cache at
//! install, deleting stale generations, writing a snapshot, displaying a notification)
//! is spawned through [`Lifetime::wait_until`]. The host awaits [`Lifetime::settled`]
//! before tearing the agent down.
//!
//! # Example
//!
//! ```ignore
//! let lifetime = Lifetime::new();
//! let token = lifetime.wait_until("cache write", async move {
//!     generation.store(&key, &response).await
//! });
//!
//! // Either await this one operation...
//! token.await?;
//! // ...or wait for everything still in flight before shutdown.
//! lifetime.settled().await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use color_eyre::{eyre::eyre, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Inner {
  pending: AtomicUsize,
  idle: Notify,
}

/// Tracks spawned side effects the host must not abandon.
#[derive(Clone, Default)]
pub struct Lifetime {
  inner: Arc<Inner>,
}

impl Lifetime {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `future` and hold the agent open until it finishes.
  ///
  /// Dropping the returned token does not cancel the work.
  pub fn wait_until<F>(&self, label: &'static str, future: F) -> CompletionToken<F::Output>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    self.inner.pending.fetch_add(1, Ordering::SeqCst);
    let guard = PendingGuard {
      inner: Arc::clone(&self.inner),
    };

    let handle = tokio::spawn(async move {
      let _guard = guard;
      future.await
    });

    CompletionToken { label, handle }
  }

  /// Number of tokens whose work has not finished.
  pub fn pending(&self) -> usize {
    self.inner.pending.load(Ordering::SeqCst)
  }

  /// Wait until no tracked work remains.
  pub async fn settled(&self) {
    loop {
      let notified = self.inner.idle.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }
}

/// Decrements the pending count when the tracked task ends, including on panic.
struct PendingGuard {
  inner: Arc<Inner>,
}

impl Drop for PendingGuard {
  fn drop(&mut self) {
    if self.inner.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.inner.idle.notify_waiters();
    }
  }
}

/// Handle on one tracked operation. Await it for the operation's output.
pub struct CompletionToken<T> {
  label: &'static str,
  handle: JoinHandle<T>,
}

impl<T> Future for CompletionToken<T> {
  type Output = Result<T>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let label = self.label;
    Pin::new(&mut self.handle)
      .poll(cx)
      .map(|result| result.map_err(|e| eyre!("{} task did not complete: {}", label, e)))
  }
}

impl<T> std::fmt::Debug for CompletionToken<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CompletionToken")
      .field("label", &self.label)
      .field("finished", &self.handle.is_finished())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;
  use std::time::Duration;

  #[tokio::test]
  async fn test_token_yields_output() {
    let lifetime = Lifetime::new();
    let token = lifetime.wait_until("answer", async { 42 });
    assert_eq!(token.await.unwrap(), 42);
    assert_eq!(lifetime.pending(), 0);
  }

  #[tokio::test]
  async fn test_settled_waits_for_dropped_tokens() {
    let lifetime = Lifetime::new();
    let done = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&done);
    drop(lifetime.wait_until("slow", async move {
      tokio::time::sleep(Duration::from_millis(30)).await;
      flag.store(true, Ordering::SeqCst);
    }));
    assert_eq!(lifetime.pending(), 1);

    lifetime.settled().await;
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(lifetime.pending(), 0);
  }

  #[tokio::test]
  async fn test_settled_returns_immediately_when_idle() {
    let lifetime = Lifetime::new();
    tokio::time::timeout(Duration::from_millis(100), lifetime.settled())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_panicking_task_still_releases() {
    let lifetime = Lifetime::new();
    let token = lifetime.wait_until("boom", async {
      panic!("boom");
    });

    let err = token.await.unwrap_err();
    assert!(err.to_string().starts_with("boom task did not complete"));
    lifetime.settled().await;
    assert_eq!(lifetime.pending(), 0);
  }
}
