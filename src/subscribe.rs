//! Registration of the client's push subscription with the backend.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::net::{Network, Request};

/// Keys the push service issued for this subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
  pub p256dh: String,
  pub auth: String,
}

/// A push subscription as the backend expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
  pub endpoint: String,
  pub expiration_time: Option<i64>,
  pub keys: SubscriptionKeys,
}

/// POST `subscription` as JSON to `url`. Returns the response status.
pub async fn register_subscription<N: Network>(
  network: &N,
  url: Url,
  subscription: &PushSubscription,
) -> Result<u16> {
  let body = serde_json::to_vec(subscription)
    .map_err(|e| eyre!("Failed to serialize push subscription: {}", e))?;

  let response = network
    .fetch(Request::post_json(url.clone(), body))
    .await
    .map_err(|e| eyre!("Failed to register push subscription: {}", e))?;

  if !response.is_success() {
    return Err(eyre!(
      "Push subscription rejected by {} with status {}",
      url,
      response.status
    ));
  }

  info!(endpoint = %subscription.endpoint, "push subscription registered");
  Ok(response.status)
}
