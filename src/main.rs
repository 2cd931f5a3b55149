mod agent;
mod cache;
mod config;
mod error;
mod event;
mod interceptor;
mod lifecycle;
mod lifetime;
mod net;
mod notify;
mod poller;
mod subscribe;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::agent::Agent;
use crate::cache::{CacheStorage, SqliteStorage};
use crate::event::{Event, EventHandler};
use crate::net::{Destination, HttpClient, Network, Request};
use crate::notify::LocalHost;
use crate::subscribe::{PushSubscription, SubscriptionKeys};

type LocalAgent = Agent<SqliteStorage, HttpClient, LocalHost>;

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Offline-first request interception agent with push notifications")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin, e.g. http://localhost:5000
  #[arg(short, long)]
  origin: Option<String>,

  /// Cache generation name to use instead of the configured one
  #[arg(long)]
  cache_name: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install and activate, then poll and read events from stdin until Ctrl-C
  Run,
  /// Intercept a single request
  Fetch {
    /// Path on the origin
    path: String,
    #[arg(short, long, default_value = "GET")]
    method: String,
    #[arg(short, long, value_enum, default_value_t = Destination::Other)]
    destination: Destination,
  },
  /// Deliver a push event with an optional JSON payload
  Push { payload: Option<String> },
  /// Register a push subscription with the backend
  Subscribe {
    #[arg(long)]
    endpoint: String,
    #[arg(long)]
    p256dh: String,
    #[arg(long)]
    auth: String,
  },
  /// Inspect or clear cache generations
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// List generations and their entry counts
  List {
    /// Also print every cached URL, oldest first
    #[arg(long)]
    entries: bool,
  },
  /// Delete every generation
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref(), args.origin.as_deref())?;

  // Override cache name if specified on command line
  if let Some(name) = args.cache_name {
    config.cache.name = name;
  }

  let _log_guard = init_tracing(config.log_dir.as_deref());

  let storage = Arc::new(SqliteStorage::open(config.cache.path.as_deref())?);
  let network = Arc::new(HttpClient::new(config.request_timeout())?);
  let host = Arc::new(LocalHost::new());
  let agent = Agent::new(config, storage, network, Arc::clone(&host))?;

  match args.command {
    Command::Run => run(&agent, &host).await?,
    Command::Fetch {
      path,
      method,
      destination,
    } => {
      agent.start().await;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = Request::get(agent.resolve(&path)?)
        .with_method(method)
        .with_destination(destination);
      fetch(&agent, request).await?;
    }
    Command::Push { payload } => {
      agent.push(payload.map(String::into_bytes)).await??;
    }
    Command::Subscribe {
      endpoint,
      p256dh,
      auth,
    } => {
      let subscription = PushSubscription {
        endpoint,
        expiration_time: None,
        keys: SubscriptionKeys { p256dh, auth },
      };
      let status = agent.register_subscription(&subscription).await?;
      println!("subscription registered ({})", status);
    }
    Command::Cache { action } => cache_command(agent.generation().storage(), &action)?,
  }

  agent.shutdown().await;
  Ok(())
}

/// Log to stderr, and to a daily rolling file when a log directory is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_agent=info"));
  let stderr = fmt::layer().with_writer(std::io::stderr);

  match log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "offline-agent.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .init();
      None
    }
  }
}

fn cache_command(storage: &SqliteStorage, action: &CacheAction) -> Result<()> {
  match action {
    CacheAction::List { entries } => {
      for name in storage.generations()? {
        println!("{}\t{}", name, storage.count(&name)?);
        if *entries {
          for key in storage.keys(&name)? {
            println!("  {}", key.url());
          }
        }
      }
    }
    CacheAction::Clear => {
      for name in storage.generations()? {
        storage.delete_generation(&name)?;
        println!("deleted {}", name);
      }
    }
  }
  Ok(())
}

async fn fetch<N: Network>(
  agent: &Agent<SqliteStorage, N, LocalHost>,
  request: Request,
) -> Result<()> {
  let url = request.url.clone();
  match agent.fetch(request).await {
    Ok(result) => {
      let stored_at = result
        .stored_at
        .map(|t| format!(" stored {}", t.to_rfc3339()))
        .unwrap_or_default();
      println!(
        "{} {} {:?} {} bytes {}{}",
        result.response.status,
        url,
        result.source,
        result.response.body.len(),
        result.response.header("content-type").unwrap_or("-"),
        stored_at
      );
      if let Some(write) = result.write {
        write.await?;
      }
    }
    Err(e) => println!("{} failed: {}", url, e),
  }
  Ok(())
}

/// Act on one event. Returns false once the agent should stop.
///
/// A bad command only logs a warning; it never ends the event loop.
async fn handle_event<N: Network>(
  agent: &Agent<SqliteStorage, N, LocalHost>,
  host: &LocalHost,
  event: Event,
) -> Result<bool> {
  match event {
    Event::Push(data) => drop(agent.push(data)),
    Event::Click => match host.notifications()?.pop() {
      Some(record) => drop(agent.click(&record)),
      None => warn!("no notification to click"),
    },
    Event::Fetch { path, destination } => {
      let url = match agent.resolve(&path) {
        Ok(url) => url,
        Err(e) => {
          warn!(%path, error = %e, "ignoring fetch of unresolvable path");
          return Ok(true);
        }
      };
      let request = Request::get(url).with_destination(destination);
      if let Err(e) = fetch(agent, request).await {
        warn!(%path, error = %e, "fetch failed");
      }
    }
    Event::Shutdown => return Ok(false),
  }
  Ok(true)
}

async fn run(agent: &LocalAgent, host: &LocalHost) -> Result<()> {
  let state = agent.start().await;
  info!(?state, generation = %agent.generation().name(), "agent started");

  let (stop, shutdown) = watch::channel(false);
  let poller = agent.spawn_poller(shutdown)?;

  let mut events = EventHandler::new();
  while let Some(event) = events.next().await {
    if !handle_event(agent, host, event).await? {
      break;
    }
  }

  let _ = stop.send(true);
  if let Some(poller) = poller {
    poller
      .await
      .map_err(|e| eyre!("Order poller failed: {}", e))?;
  }
  info!("waiting for pending work");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::net::testing::ScriptedNetwork;

  fn agent(network: &ScriptedNetwork) -> Agent<SqliteStorage, ScriptedNetwork, LocalHost> {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let config = Config::for_origin("http://localhost:5000");
    Agent::new(config, storage, Arc::new(network.clone()), Arc::new(LocalHost::new())).unwrap()
  }

  #[tokio::test]
  async fn test_bad_fetch_commands_keep_running() {
    let network = ScriptedNetwork::new();
    let agent = agent(&network);
    let host = LocalHost::new();

    let unresolvable = Event::Fetch {
      path: "http://[::1".to_string(),
      destination: Destination::Document,
    };
    assert!(handle_event(&agent, &host, unresolvable).await.unwrap());
    assert_eq!(network.call_count(), 0);

    let unreachable = Event::Fetch {
      path: "/offline".to_string(),
      destination: Destination::Other,
    };
    assert!(handle_event(&agent, &host, unreachable).await.unwrap());
    assert_eq!(network.call_count(), 1);
  }

  #[tokio::test]
  async fn test_shutdown_stops_the_loop() {
    let network = ScriptedNetwork::new();
    let agent = agent(&network);
    let host = LocalHost::new();

    assert!(handle_event(&agent, &host, Event::Click).await.unwrap());
    assert!(!handle_event(&agent, &host, Event::Shutdown).await.unwrap());
  }
}
