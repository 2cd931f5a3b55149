use std::io::BufRead;

use tokio::sync::mpsc;

use crate::net::Destination;

/// Agent events
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
  /// Inbound push event with its raw data
  Push(Option<Vec<u8>>),
  /// Click on the most recent notification
  Click,
  /// Intercept a GET for a path on the origin
  Fetch {
    path: String,
    destination: Destination,
  },
  /// Stop the agent
  Shutdown,
}

/// Parse one line of the interactive protocol.
///
/// ```text
/// push [json]
/// click
/// fetch <path> [document|image]
/// quit
/// ```
pub fn parse_line(line: &str) -> Option<Event> {
  let line = line.trim();
  let (command, rest) = match line.split_once(char::is_whitespace) {
    Some((command, rest)) => (command, rest.trim()),
    None => (line, ""),
  };

  match command {
    "push" => Some(Event::Push(
      (!rest.is_empty()).then(|| rest.as_bytes().to_vec()),
    )),
    "click" => Some(Event::Click),
    "fetch" => {
      let mut parts = rest.split_whitespace();
      let path = parts.next()?.to_string();
      let destination = match parts.next() {
        Some("document") => Destination::Document,
        Some("image") => Destination::Image,
        Some(_) => return None,
        None => Destination::Other,
      };
      Some(Event::Fetch { path, destination })
    }
    "quit" | "exit" => Some(Event::Shutdown),
    _ => None,
  }
}

/// Event handler that produces events from stdin lines and Ctrl-C
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    Self::with_input(std::io::BufReader::new(std::io::stdin()))
  }

  /// Read commands from `input` instead of stdin.
  ///
  /// Lines are read on a plain OS thread. A read that never completes must not hold up
  /// runtime shutdown, which a task on tokio's blocking pool would.
  pub fn with_input<R: BufRead + Send + 'static>(input: R) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    let spawned = std::thread::Builder::new()
      .name("event-input".to_string())
      .spawn(move || {
        for line in input.lines() {
          let Ok(line) = line else { break };
          if line.trim().is_empty() {
            continue;
          }
          match parse_line(&line) {
            Some(event) => {
              if input_tx.send(event).is_err() {
                break;
              }
            }
            None => tracing::warn!(%line, "unrecognized command"),
          }
        }
      });
    if let Err(e) = spawned {
      tracing::error!(error = %e, "failed to start input reader, only Ctrl-C is handled");
    }

    // Ctrl-C
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
