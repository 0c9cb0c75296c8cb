//! Cached views of reference resources.
//!
//! A `ResourceView` loads one resource through the cache layer in the
//! background and re-reads its cache entry whenever the sync service reports
//! that entry was refreshed.
//!
//! # Example
//!
//! ```ignore
//! let gateway = gateway.clone();
//! let mut view = ResourceView::new(Resource::Trips, layer, move |endpoint| {
//!     let gateway = gateway.clone();
//!     async move { gateway.get(&endpoint).await }
//! })
//! .watch(sync.subscribe());
//!
//! view.fetch();
//!
//! // In the event loop tick
//! if view.poll() {
//!     render(view.state());
//! }
//! ```

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::net::SendError;
use crate::store::{CacheLayer, CacheResult};
use crate::sync::{RefreshEvent, Resource};

/// The state of a view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
  /// Nothing requested yet
  Idle,
  /// A load is running
  Loading,
  /// Data from the network or the cache
  Ready(CacheResult<Value>),
  /// The load failed and no cached copy could stand in
  Error(String),
}

impl ViewState {
  pub fn is_loading(&self) -> bool {
    matches!(self, ViewState::Loading)
  }

  pub fn result(&self) -> Option<&CacheResult<Value>> {
    match self {
      ViewState::Ready(result) => Some(result),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      ViewState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<Value, SendError>> + Send>>;

/// Creates the network read for an endpoint
type FetcherFn = Box<dyn Fn(String) -> BoxFuture + Send + Sync>;

type LoadResult = Result<CacheResult<Value>, String>;

pub struct ResourceView {
  resource: Resource,
  layer: CacheLayer,
  fetcher: FetcherFn,
  state: ViewState,
  receiver: Option<mpsc::UnboundedReceiver<LoadResult>>,
  refreshes: Option<broadcast::Receiver<RefreshEvent>>,
}

impl ResourceView {
  pub fn new<F, Fut>(resource: Resource, layer: CacheLayer, fetcher: F) -> Self
  where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, SendError>> + Send + 'static,
  {
    Self {
      resource,
      layer,
      fetcher: Box::new(move |endpoint| Box::pin(fetcher(endpoint))),
      state: ViewState::Idle,
      receiver: None,
      refreshes: None,
    }
  }

  /// Re-read the cache entry whenever a sync pass refreshes it.
  pub fn watch(mut self, refreshes: broadcast::Receiver<RefreshEvent>) -> Self {
    self.refreshes = Some(refreshes);
    self
  }

  pub fn resource(&self) -> &Resource {
    &self.resource
  }

  pub fn state(&self) -> &ViewState {
    &self.state
  }

  /// Start a network-first load unless one is already running.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = ViewState::Loading;

    let layer = self.layer.clone();
    let key = self.resource.cache_key();
    let request = (self.fetcher)(self.resource.endpoint().to_string());
    let description = self.resource.description();

    tokio::spawn(async move {
      let result = layer
        .fetch(&key, || request)
        .await
        .map_err(|e| format!("failed to load {}: {}", description, e));
      // Receiver may have been dropped
      let _ = tx.send(result);
    });
  }

  /// Show the cached copy without touching the network.
  pub fn load_cached(&mut self) {
    self.receiver = None;
    self.state = match self.layer.cached(&self.resource.cache_key()) {
      Some(result) => ViewState::Ready(result),
      None => ViewState::Error(format!("no cached copy of {}", self.resource.description())),
    };
  }

  /// Apply finished loads and refresh notifications.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_load();

    if self.take_refresh() && !self.state.is_loading() {
      debug!(resource = %self.resource, "cache entry refreshed, re-reading");
      if let Some(result) = self.layer.cached(&self.resource.cache_key()) {
        self.state = ViewState::Ready(result);
        changed = true;
      }
    }

    changed
  }

  fn poll_load(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(result)) => {
        self.state = ViewState::Ready(result);
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = ViewState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = ViewState::Error("load was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Drain pending notifications, reporting whether any touched this resource.
  fn take_refresh(&mut self) -> bool {
    let Some(refreshes) = &mut self.refreshes else {
      return false;
    };

    let key = self.resource.cache_key();
    let mut hit = false;
    loop {
      match refreshes.try_recv() {
        Ok(event) => hit |= event.contains(&key),
        // Missed events may have included ours
        Err(broadcast::error::TryRecvError::Lagged(_)) => hit = true,
        Err(_) => break,
      }
    }
    hit
  }
}

impl std::fmt::Debug for ResourceView {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceView")
      .field("resource", &self.resource)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
