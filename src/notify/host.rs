//! The hosting environment: client windows and the system notification tray.

use std::future::Future;
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

/// A notification as handed to the host for display. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Records sharing a tag coalesce; the newest replaces the prior one
  pub tag: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub vibrate: Vec<u32>,
}

/// Result of a display call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Displayed {
  /// No notification with this tag was showing
  Shown,
  /// A notification with the same tag was replaced
  Replaced,
}

/// An open client window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientWindow {
  pub id: u64,
  pub url: String,
  /// Whether this agent controls the window's requests
  pub controlled: bool,
  pub focused: bool,
}

/// Operations the agent needs from its host.
pub trait ClientHost: Send + Sync + 'static {
  /// Display `record`, replacing any showing notification with the same tag.
  fn show_notification(
    &self,
    record: NotificationRecord,
  ) -> impl Future<Output = Result<Displayed>> + Send;

  /// Dismiss the notification with `tag`, if showing.
  fn close_notification(&self, tag: String) -> impl Future<Output = Result<()>> + Send;

  /// Enumerate open windows, optionally including ones this agent does not control.
  fn match_all(
    &self,
    include_uncontrolled: bool,
  ) -> impl Future<Output = Result<Vec<ClientWindow>>> + Send;

  /// Bring window `id` to the foreground.
  fn focus(&self, id: u64) -> impl Future<Output = Result<()>> + Send;

  /// Open a new window at `url`, returning its id.
  fn open_window(&self, url: String) -> impl Future<Output = Result<u64>> + Send;

  /// Take control of every open window. Returns how many were newly claimed.
  fn claim(&self) -> impl Future<Output = Result<usize>> + Send;

  /// Resolve once no window is controlled by a previous agent.
  fn wait_for_detach(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Default)]
struct HostState {
  windows: Vec<ClientWindow>,
  tray: Vec<NotificationRecord>,
  next_id: u64,
}

/// In-process host. Notifications are written to the log and kept in a tray.
#[derive(Default)]
pub struct LocalHost {
  state: Mutex<HostState>,
  detached: Notify,
}

impl LocalHost {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HostState>> {
    self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Register an already-open window, as the host would on page load.
  #[allow(dead_code)]
  pub fn attach_window(&self, url: &str, controlled: bool) -> Result<u64> {
    let mut state = self.lock()?;
    state.next_id += 1;
    let id = state.next_id;
    state.windows.push(ClientWindow {
      id,
      url: url.to_string(),
      controlled,
      focused: false,
    });
    Ok(id)
  }

  /// Close a window.
  #[allow(dead_code)]
  pub fn detach_window(&self, id: u64) -> Result<()> {
    let mut state = self.lock()?;
    state.windows.retain(|w| w.id != id);
    drop(state);
    self.detached.notify_waiters();
    Ok(())
  }

  #[allow(dead_code)]
  pub fn windows(&self) -> Result<Vec<ClientWindow>> {
    Ok(self.lock()?.windows.clone())
  }

  /// Notifications currently showing, oldest first.
  pub fn notifications(&self) -> Result<Vec<NotificationRecord>> {
    Ok(self.lock()?.tray.clone())
  }
}

impl ClientHost for LocalHost {
  async fn show_notification(&self, record: NotificationRecord) -> Result<Displayed> {
    info!(title = %record.title, body = %record.body, tag = %record.tag, "notification");

    let mut state = self.lock()?;
    match state.tray.iter_mut().find(|r| r.tag == record.tag) {
      Some(existing) => {
        *existing = record;
        Ok(Displayed::Replaced)
      }
      None => {
        state.tray.push(record);
        Ok(Displayed::Shown)
      }
    }
  }

  async fn close_notification(&self, tag: String) -> Result<()> {
    self.lock()?.tray.retain(|r| r.tag != tag);
    Ok(())
  }

  async fn match_all(&self, include_uncontrolled: bool) -> Result<Vec<ClientWindow>> {
    Ok(
      self
        .lock()?
        .windows
        .iter()
        .filter(|w| include_uncontrolled || w.controlled)
        .cloned()
        .collect(),
    )
  }

  async fn focus(&self, id: u64) -> Result<()> {
    let mut state = self.lock()?;
    if !state.windows.iter().any(|w| w.id == id) {
      return Err(eyre!("No open window with id {}", id));
    }
    for window in state.windows.iter_mut() {
      window.focused = window.id == id;
    }
    debug!(id, "focused window");
    Ok(())
  }

  async fn open_window(&self, url: String) -> Result<u64> {
    let mut state = self.lock()?;
    state.next_id += 1;
    let id = state.next_id;
    for window in state.windows.iter_mut() {
      window.focused = false;
    }
    state.windows.push(ClientWindow {
      id,
      url: url.clone(),
      controlled: true,
      focused: true,
    });
    info!(id, %url, "opened window");
    Ok(id)
  }

  async fn claim(&self) -> Result<usize> {
    let mut state = self.lock()?;
    let mut claimed = 0;
    for window in state.windows.iter_mut().filter(|w| !w.controlled) {
      window.controlled = true;
      claimed += 1;
    }
    Ok(claimed)
  }

  async fn wait_for_detach(&self) {
    loop {
      let notified = self.detached.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      let busy = self
        .state
        .lock()
        .map(|s| s.windows.iter().any(|w| w.controlled))
        .unwrap_or(false);
      if !busy {
        return;
      }
      notified.await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  fn record(tag: &str, body: &str) -> NotificationRecord {
    NotificationRecord {
      title: "app".to_string(),
      body: body.to_string(),
      icon: "/icon-192.png".to_string(),
      badge: "/icon-192.png".to_string(),
      tag: tag.to_string(),
      vibrate: Vec::new(),
    }
  }

  #[tokio::test]
  async fn test_same_tag_replaces() {
    let host = LocalHost::new();
    assert_eq!(
      host.show_notification(record("new-order", "one")).await.unwrap(),
      Displayed::Shown
    );
    assert_eq!(
      host.show_notification(record("new-order", "two")).await.unwrap(),
      Displayed::Replaced
    );
    assert_eq!(
      host.show_notification(record("other", "three")).await.unwrap(),
      Displayed::Shown
    );

    let tray = host.notifications().unwrap();
    assert_eq!(tray.len(), 2);
    assert_eq!(tray[0].body, "two");

    host.close_notification("new-order".to_string()).await.unwrap();
    assert_eq!(host.notifications().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_match_all_filters_uncontrolled() {
    let host = LocalHost::new();
    host.attach_window("http://localhost/", false).unwrap();
    host.attach_window("http://localhost/menu", true).unwrap();

    assert_eq!(host.match_all(false).await.unwrap().len(), 1);
    assert_eq!(host.match_all(true).await.unwrap().len(), 2);

    assert_eq!(host.claim().await.unwrap(), 1);
    assert_eq!(host.match_all(false).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_focus_unknown_window_fails() {
    let host = LocalHost::new();
    assert!(host.focus(7).await.is_err());
  }

  #[tokio::test]
  async fn test_wait_for_detach() {
    let host = Arc::new(LocalHost::new());
    let id = host.attach_window("http://localhost/", true).unwrap();

    let waiter = {
      let host = Arc::clone(&host);
      tokio::spawn(async move { host.wait_for_detach().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    host.detach_window(id).unwrap();
    tokio::time::timeout(Duration::from_millis(200), waiter)
      .await
      .unwrap()
      .unwrap();
  }
}
