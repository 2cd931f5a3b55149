//! The agent: one cache generation, its lifecycle, the interceptor and notifications.

use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::cache::{CacheGeneration, CacheStorage, EvictionPolicy};
use crate::config::Config;
use crate::error::FetchError;
use crate::interceptor::{Intercepted, Interceptor};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::lifetime::{CompletionToken, Lifetime};
use crate::net::{Network, Request};
use crate::notify::{ClickOutcome, ClientHost, Displayed, NotificationDispatcher, NotificationRecord};
use crate::poller::OrderPoller;
use crate::subscribe::{self, PushSubscription};

/// A long-lived agent instance.
///
/// The generation name comes from configuration, so several independently versioned
/// agents can share one storage backend.
pub struct Agent<S: CacheStorage, N: Network, H: ClientHost> {
  config: Config,
  generation: CacheGeneration<S>,
  network: Arc<N>,
  lifetime: Lifetime,
  lifecycle: LifecycleController<S, N, H>,
  interceptor: Interceptor<S, N>,
  dispatcher: Arc<NotificationDispatcher<H>>,
}

impl<S, N, H> Agent<S, N, H>
where
  S: CacheStorage + 'static,
  N: Network,
  H: ClientHost,
{
  pub fn new(config: Config, storage: Arc<S>, network: Arc<N>, host: Arc<H>) -> Result<Self> {
    let lifetime = Lifetime::new();
    let generation = CacheGeneration::new(
      storage,
      config.cache.name.clone(),
      EvictionPolicy::new(config.cache.max_items),
    );
    let root = config.resolve(&config.root_path)?;

    let lifecycle = LifecycleController::new(
      generation.clone(),
      Arc::clone(&network),
      Arc::clone(&host),
      config.manifest_urls()?,
      config.skip_waiting,
      lifetime.clone(),
    );

    let interceptor = Interceptor::new(
      generation.clone(),
      Arc::clone(&network),
      lifecycle.subscribe(),
      lifetime.clone(),
      root.clone(),
      config.resolve(&config.placeholder_icon)?,
    );

    let dispatcher = Arc::new(NotificationDispatcher::new(
      host,
      lifetime.clone(),
      config.notifications.clone(),
      root,
    ));

    Ok(Self {
      config,
      generation,
      network,
      lifetime,
      lifecycle,
      interceptor,
      dispatcher,
    })
  }

  pub fn generation(&self) -> &CacheGeneration<S> {
    &self.generation
  }

  #[allow(dead_code)]
  pub fn lifecycle(&self) -> &LifecycleController<S, N, H> {
    &self.lifecycle
  }

  #[allow(dead_code)]
  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Resolve a path on the application's origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self.config.resolve(path)
  }

  /// Install and activate the configured generation.
  pub async fn start(&self) -> LifecycleState {
    self.lifecycle.start().await
  }

  /// Intercept one outgoing request.
  pub async fn fetch(&self, request: Request) -> Result<Intercepted, FetchError> {
    self.interceptor.handle(request).await
  }

  /// Deliver an inbound push event.
  pub fn push(&self, data: Option<Vec<u8>>) -> CompletionToken<Result<Displayed>> {
    self.dispatcher.on_push(data)
  }

  /// Deliver a click on a displayed notification.
  pub fn click(&self, record: &NotificationRecord) -> CompletionToken<Result<ClickOutcome>> {
    self.dispatcher.on_click(record)
  }

  /// Register this client's push subscription with the backend.
  pub async fn register_subscription(&self, subscription: &PushSubscription) -> Result<u16> {
    let url = self.config.resolve(&self.config.subscribe_path)?;
    subscribe::register_subscription(self.network.as_ref(), url, subscription).await
  }

  /// Start the order poller, if enabled. It stops when `shutdown` turns true.
  pub fn spawn_poller(&self, shutdown: watch::Receiver<bool>) -> Result<Option<JoinHandle<()>>> {
    if !self.config.poll.enabled {
      return Ok(None);
    }

    let poller = OrderPoller::new(
      self.config.resolve(&self.config.poll.endpoint)?,
      self.config.poll_interval(),
    );
    let network = Arc::clone(&self.network);
    let dispatcher = Arc::clone(&self.dispatcher);

    Ok(Some(tokio::spawn(poller.run(
      network, dispatcher, shutdown,
    ))))
  }

  /// Wait for every outstanding side effect before the agent is torn down.
  pub async fn shutdown(&self) {
    self.lifetime.settled().await;
  }
}
