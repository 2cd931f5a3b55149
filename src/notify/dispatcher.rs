use std::sync::Arc;

use color_eyre::Result;
use tracing::{debug, info, warn};
use url::Url;

use super::host::{ClientHost, ClientWindow, Displayed, NotificationRecord};
use super::payload::{self, Decoded, DecodeFallback};
use crate::config::NotificationSettings;
use crate::error::AgentFault;
use crate::lifetime::{CompletionToken, Lifetime};

/// Vibration pattern for order alerts.
const ORDER_VIBRATION: [u32; 3] = [200, 100, 200];

/// What a notification click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An existing window at the root route was brought forward
  Focused(u64),
  /// No such window existed, so one was opened
  Opened(u64),
}

/// Turns push events and local alerts into system notifications.
pub struct NotificationDispatcher<H: ClientHost> {
  host: Arc<H>,
  lifetime: Lifetime,
  settings: NotificationSettings,
  root: Url,
}

impl<H: ClientHost> NotificationDispatcher<H> {
  pub fn new(host: Arc<H>, lifetime: Lifetime, settings: NotificationSettings, root: Url) -> Self {
    Self {
      host,
      lifetime,
      settings,
      root,
    }
  }

  /// Build the record shown for decoded push data.
  pub fn record_for(&self, decoded: &Decoded) -> NotificationRecord {
    NotificationRecord {
      title: decoded
        .title()
        .unwrap_or(&self.settings.default_title)
        .to_string(),
      body: decoded
        .body()
        .unwrap_or(&self.settings.default_body)
        .to_string(),
      icon: self.settings.icon.clone(),
      badge: self.settings.badge.clone(),
      tag: self.settings.tag.clone(),
      vibrate: Vec::new(),
    }
  }

  /// Record announcing that the number of active orders rose to `count`.
  pub fn order_alert(&self, count: u64) -> NotificationRecord {
    NotificationRecord {
      title: "New order".to_string(),
      body: format!("{} active orders", count),
      icon: self.settings.icon.clone(),
      badge: self.settings.badge.clone(),
      tag: self.settings.tag.clone(),
      vibrate: ORDER_VIBRATION.to_vec(),
    }
  }

  /// Handle an inbound push event.
  pub fn on_push(&self, data: Option<Vec<u8>>) -> CompletionToken<Result<Displayed>> {
    let decoded = payload::decode(data.as_deref());
    match &decoded {
      Decoded::Payload(_) => debug!("decoded push payload"),
      Decoded::Default(DecodeFallback::Absent) => debug!("push event without data"),
      Decoded::Default(DecodeFallback::Malformed(reason)) => {
        let fault = AgentFault::PayloadDecode {
          reason: reason.clone(),
        };
        warn!(%fault, "showing default notification")
      }
    }

    self.display(self.record_for(&decoded))
  }

  /// Display `record` under a completion token.
  pub fn display(&self, record: NotificationRecord) -> CompletionToken<Result<Displayed>> {
    let host = Arc::clone(&self.host);
    self.lifetime.wait_until("notification display", async move {
      let tag = record.tag.clone();
      let displayed = host.show_notification(record).await?;
      if displayed == Displayed::Replaced {
        debug!(%tag, "replaced notification with same tag");
      }
      Ok::<_, color_eyre::Report>(displayed)
    })
  }

  /// Handle a click on `record`: focus a window at the root route, or open one.
  pub fn on_click(&self, record: &NotificationRecord) -> CompletionToken<Result<ClickOutcome>> {
    let host = Arc::clone(&self.host);
    let root = self.root.clone();
    let tag = record.tag.clone();

    self.lifetime.wait_until("notification click", async move {
      host.close_notification(tag).await?;

      let windows = host.match_all(true).await?;
      if let Some(window) = windows.iter().find(|w| shows_route(w, &root)) {
        host.focus(window.id).await?;
        info!(id = window.id, "focused existing window");
        return Ok(ClickOutcome::Focused(window.id));
      }

      let id = host.open_window(root.to_string()).await?;
      Ok::<_, color_eyre::Report>(ClickOutcome::Opened(id))
    })
  }
}

/// Whether `window` is showing `route`. Query strings and fragments are ignored.
fn shows_route(window: &ClientWindow, route: &Url) -> bool {
  match Url::parse(&window.url) {
    Ok(url) => url.origin() == route.origin() && url.path() == route.path(),
    // Relative urls name a path on our own origin
    Err(_) => window.url == route.path(),
  }
}
