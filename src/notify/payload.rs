use serde::{Deserialize, Serialize};

/// Content of an inbound push event. Both fields are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
}

/// Why the default payload was substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFallback {
  /// The event carried no data
  Absent,
  /// The data was not a JSON object
  Malformed(String),
}

/// Outcome of decoding push data. Decoding never fails; bad input selects the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
  Payload(PushPayload),
  Default(DecodeFallback),
}

impl Decoded {
  #[allow(dead_code)]
  pub fn is_default(&self) -> bool {
    matches!(self, Decoded::Default(_))
  }

  /// The decoded title, if one was supplied and non-empty.
  pub fn title(&self) -> Option<&str> {
    match self {
      Decoded::Payload(p) => p.title.as_deref().filter(|t| !t.is_empty()),
      Decoded::Default(_) => None,
    }
  }

  /// The decoded body, if one was supplied and non-empty.
  pub fn body(&self) -> Option<&str> {
    match self {
      Decoded::Payload(p) => p.body.as_deref().filter(|b| !b.is_empty()),
      Decoded::Default(_) => None,
    }
  }
}

/// Decode raw push data.
pub fn decode(data: Option<&[u8]>) -> Decoded {
  let Some(data) = data else {
    return Decoded::Default(DecodeFallback::Absent);
  };
  if data.iter().all(u8::is_ascii_whitespace) {
    return Decoded::Default(DecodeFallback::Absent);
  }

  let value = match serde_json::from_slice::<serde_json::Value>(data) {
    Ok(value) if value.is_object() => value,
    Ok(_) => {
      return Decoded::Default(DecodeFallback::Malformed(
        "expected a JSON object".to_string(),
      ))
    }
    Err(e) => return Decoded::Default(DecodeFallback::Malformed(e.to_string())),
  };

  match serde_json::from_value::<PushPayload>(value) {
    Ok(payload) => Decoded::Payload(payload),
    Err(e) => Decoded::Default(DecodeFallback::Malformed(e.to_string())),
  }
}
