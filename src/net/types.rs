use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// What the requesting context intends to do with the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// A navigable page load
  Document,
  /// An image element or icon
  Image,
  #[default]
  Other,
}

/// An outgoing request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Other,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A GET for a navigable document.
  #[allow(dead_code)]
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  /// A GET issued for an image.
  #[allow(dead_code)]
  pub fn image(url: Url) -> Self {
    Self {
      destination: Destination::Image,
      ..Self::get(url)
    }
  }

  /// A POST carrying a JSON body.
  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::POST,
      url,
      destination: Destination::Other,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: Some(body),
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }
}

/// A complete response snapshot. Cloning duplicates status, headers and body byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  /// Raw header values; they are not required to be UTF-8
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(url: Url, status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      url,
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: impl AsRef<[u8]>) -> Self {
    self.headers.push((name.to_string(), value.as_ref().to_vec()));
    self
  }

  /// Case-insensitive header lookup. Values that are not UTF-8 read as absent.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .and_then(|(_, v)| std::str::from_utf8(v).ok())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}
