use std::future::Future;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;
use url::Url;

use super::types::{Request, Response};
use crate::error::NetworkError;

/// Anything that can carry a request to the live network.
///
/// The agent only ever talks to the network through this trait, so tests can script
/// responses and failures without a server.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: Request) -> impl Future<Output = Result<Response, NetworkError>> + Send;
}

/// Network access backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("offline-agent/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpClient {
  async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
    let url = request.url.to_string();
    let mut builder = self
      .client
      .request(request.method, request.url)
      .headers(header_map(&request.headers));
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        NetworkError::Timeout { url: url.clone() }
      } else {
        NetworkError::Unreachable {
          url: url.clone(),
          reason: e.to_string(),
        }
      }
    })?;

    let final_url = response.url().clone();
    let status = response.status().as_u16();
    let headers = response.headers().clone();

    let body = response.bytes().await.map_err(|e| {
      if e.is_timeout() {
        NetworkError::Timeout { url: url.clone() }
      } else {
        NetworkError::Body {
          url: url.clone(),
          reason: e.to_string(),
        }
      }
    })?;

    Ok(snapshot(final_url, status, &headers, body.to_vec()))
  }
}

/// Outgoing headers. A header that cannot be sent as given is logged and left out.
fn header_map(headers: &[(String, String)]) -> HeaderMap {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        map.append(name, value);
      }
      _ => warn!(header = %name, "dropping request header that is not valid HTTP"),
    }
  }
  map
}

/// Copy a live response, keeping header values as raw bytes.
fn snapshot(url: Url, status: u16, headers: &HeaderMap, body: Vec<u8>) -> Response {
  headers
    .iter()
    .fold(Response::new(url, status, body), |response, (name, value)| {
      response.with_header(name.as_str(), value.as_bytes())
    })
}
