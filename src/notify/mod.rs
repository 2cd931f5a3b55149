//! Push events, local alerts and notification clicks.

mod dispatcher;
mod host;
mod payload;

pub use dispatcher::{ClickOutcome, NotificationDispatcher};
pub use host::{ClientHost, Displayed, LocalHost, NotificationRecord};
