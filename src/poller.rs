//! Polls the active-order endpoint and raises an alert when the count rises.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::AgentFault;
use crate::net::{Network, Request};
use crate::notify::{ClientHost, NotificationDispatcher};

/// Body of the status endpoint: either `{"count": n}` or the list of active orders.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusBody {
  Count { count: u64 },
  Orders(Vec<serde_json::Value>),
}

impl StatusBody {
  fn count(&self) -> u64 {
    match self {
      StatusBody::Count { count } => *count,
      StatusBody::Orders(orders) => orders.len() as u64,
    }
  }
}

/// Tracks the last observed order count. State lives in memory only.
pub struct OrderPoller {
  endpoint: Url,
  interval: Duration,
  last_count: u64,
}

impl OrderPoller {
  pub fn new(endpoint: Url, interval: Duration) -> Self {
    Self {
      endpoint,
      interval,
      last_count: 0,
    }
  }

  pub fn last_count(&self) -> u64 {
    self.last_count
  }

  /// Record an observed count. Returns the count to announce, if any.
  ///
  /// Only a rise over a previous non-zero observation is announced.
  pub fn observe(&mut self, count: u64) -> Option<u64> {
    let announce = count > self.last_count && self.last_count > 0;
    self.last_count = count;
    announce.then_some(count)
  }

  /// Fetch the status once and record it. A failed poll leaves the count unchanged.
  pub async fn poll_once<N: Network>(&mut self, network: &N) -> Result<Option<u64>, AgentFault> {
    let response = network
      .fetch(Request::get(self.endpoint.clone()))
      .await
      .map_err(|e| AgentFault::Poll {
        reason: e.to_string(),
      })?;

    if !response.is_success() {
      return Err(AgentFault::Poll {
        reason: format!("status endpoint returned {}", response.status),
      });
    }

    let body: StatusBody =
      serde_json::from_slice(&response.body).map_err(|e| AgentFault::Poll {
        reason: format!("malformed status body: {}", e),
      })?;

    Ok(self.observe(body.count()))
  }

  /// Poll on a fixed interval until `shutdown` turns true.
  pub async fn run<N, H>(
    mut self,
    network: Arc<N>,
    dispatcher: Arc<NotificationDispatcher<H>>,
    mut shutdown: watch::Receiver<bool>,
  ) where
    N: Network,
    H: ClientHost,
  {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(endpoint = %self.endpoint, interval_ms = self.interval.as_millis() as u64, "order poller started");

    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
          continue;
        }
      }

      match self.poll_once(network.as_ref()).await {
        Ok(Some(count)) => {
          info!(count, "active orders increased");
          drop(dispatcher.display(dispatcher.order_alert(count)));
        }
        Ok(None) => debug!(count = self.last_count(), "no new orders"),
        Err(fault) => warn!(%fault, "poll skipped"),
      }
    }

    info!("order poller stopped");
  }
}
