//! Install and activation of a cache generation.
//!
//! A controller walks `Installing → (Waiting) → Activating → Active`. Install fills the
//! generation from the manifest; activation deletes every other generation and claims
//! the open clients. Failures are logged and leave the agent degraded, never crashed:
//! a failed install still activates with whatever was cached, and a failed activation
//! leaves the controller short of `Active`, so requests keep going straight to the network.

use std::sync::Arc;

use color_eyre::Result;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::{CacheGeneration, CacheStorage, RequestKey};
use crate::error::AgentFault;
use crate::lifetime::{CompletionToken, Lifetime};
use crate::net::{Network, Request};
use crate::notify::ClientHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed, waiting for clients of the previous generation to detach
  Waiting,
  Activating,
  /// Serving requests from this generation
  Active,
  /// Replaced by a newer generation
  Redundant,
}

/// What install stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub cached: Vec<Url>,
}

/// What activation cleaned up and claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub removed: Vec<String>,
  pub claimed: usize,
}

pub struct LifecycleController<S: CacheStorage, N: Network, H: ClientHost> {
  generation: CacheGeneration<S>,
  network: Arc<N>,
  host: Arc<H>,
  manifest: Vec<Url>,
  skip_waiting: bool,
  lifetime: Lifetime,
  state: Arc<watch::Sender<LifecycleState>>,
}

impl<S, N, H> LifecycleController<S, N, H>
where
  S: CacheStorage + 'static,
  N: Network,
  H: ClientHost,
{
  pub fn new(
    generation: CacheGeneration<S>,
    network: Arc<N>,
    host: Arc<H>,
    manifest: Vec<Url>,
    skip_waiting: bool,
    lifetime: Lifetime,
  ) -> Self {
    let (state, _) = watch::channel(LifecycleState::Installing);
    Self {
      generation,
      network,
      host,
      manifest,
      skip_waiting,
      lifetime,
      state: Arc::new(state),
    }
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.borrow()
  }

  /// Observe state transitions.
  pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
    self.state.subscribe()
  }

  /// Run install, the optional wait, and activation. Returns the state reached.
  pub async fn start(&self) -> LifecycleState {
    match self.install().await {
      Ok(Ok(report)) => info!(
        generation = %report.generation,
        cached = report.cached.len(),
        "install complete"
      ),
      Ok(Err(e)) | Err(e) => error!(error = %e, "install failed, continuing with a partial cache"),
    }

    if !self.skip_waiting {
      self.state.send_replace(LifecycleState::Waiting);
      info!("waiting for clients of the previous generation to detach");
      self.host.wait_for_detach().await;
    }

    match self.activate().await {
      Ok(Ok(report)) => info!(
        removed = report.removed.len(),
        claimed = report.claimed,
        "activation complete"
      ),
      Ok(Err(e)) | Err(e) => error!(error = %e, "activation failed, requests bypass the cache"),
    }

    self.state()
  }

  /// Open the generation and populate it from the manifest.
  ///
  /// Every manifest path is fetched concurrently and each successful response is stored.
  /// If any fetch fails the step fails with [`AgentFault::InstallPopulation`]; entries
  /// already stored are kept and nothing is retried.
  pub fn install(&self) -> CompletionToken<Result<InstallReport>> {
    let generation = self.generation.clone();
    let network = Arc::clone(&self.network);
    let manifest = self.manifest.clone();
    let state = Arc::clone(&self.state);

    self.lifetime.wait_until("install", async move {
      state.send_replace(LifecycleState::Installing);
      info!(generation = %generation.name(), paths = manifest.len(), "installing");
      generation.open()?;

      let fetches = manifest.iter().map(|url| {
        let network = Arc::clone(&network);
        let url = url.clone();
        async move {
          let result = network.fetch(Request::get(url.clone())).await;
          (url, result)
        }
      });

      let mut cached = Vec::new();
      let mut failed = Vec::new();
      for (url, result) in join_all(fetches).await {
        match result {
          Ok(response) if response.is_success() => {
            generation.store(&RequestKey::get(&url), &response).await?;
            cached.push(url);
          }
          Ok(response) => {
            warn!(%url, status = response.status, "manifest fetch returned an error status");
            failed.push(url.path().to_string());
          }
          Err(e) => {
            warn!(%url, error = %e, "manifest fetch failed");
            failed.push(url.path().to_string());
          }
        }
      }

      if !failed.is_empty() {
        return Err(
          AgentFault::InstallPopulation {
            generation: generation.name().to_string(),
            failed,
          }
          .into(),
        );
      }

      Ok::<_, color_eyre::Report>(InstallReport {
        generation: generation.name().to_string(),
        cached,
      })
    })
  }

  /// Delete every generation but the current one, then claim all open clients.
  pub fn activate(&self) -> CompletionToken<Result<ActivationReport>> {
    let generation = self.generation.clone();
    let host = Arc::clone(&self.host);
    let state = Arc::clone(&self.state);

    self.lifetime.wait_until("activate", async move {
      state.send_replace(LifecycleState::Activating);

      let storage = generation.storage();
      let mut removed = Vec::new();
      for name in storage.generations()? {
        if name == generation.name() {
          continue;
        }
        let fault = AgentFault::StaleGeneration { name: name.clone() };
        info!(%fault, "deleting");
        storage.delete_generation(&name)?;
        removed.push(name);
      }

      let claimed = host.claim().await?;
      state.send_replace(LifecycleState::Active);

      Ok::<_, color_eyre::Report>(ActivationReport { removed, claimed })
    })
  }

  /// Mark this controller as replaced by a newer generation.
  #[allow(dead_code)]
  pub fn retire(&self) {
    info!(generation = %self.generation.name(), "generation is redundant");
    self.state.send_replace(LifecycleState::Redundant);
  }
}
