//! Read side of the cache: serve resources from the network with an offline
//! fallback to the last snapshot the sync service stored.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::LocalStore;
use crate::net::{is_connectivity_failure, SendError};

/// Result of a cache read, including where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was fetched from the service (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, older than the stale time
  CacheStale,
  /// Network unreachable, serving cached data
  Offline,
}

impl CacheSource {
  pub fn label(&self) -> &'static str {
    match self {
      CacheSource::Network => "live",
      CacheSource::CacheFresh => "cached",
      CacheSource::CacheStale => "cached, stale",
      CacheSource::Offline => "offline copy",
    }
  }
}

/// Read access to cached resources.
///
/// Never writes: cache entries are owned by the sync service.
#[derive(Clone)]
pub struct CacheLayer {
  store: Arc<dyn LocalStore>,
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl CacheLayer {
  pub fn new(store: Arc<dyn LocalStore>) -> Self {
    Self {
      store,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.stale_time
  }

  /// Cached snapshot for a resource, if any.
  ///
  /// An unreadable store reads as a miss.
  pub fn cached(&self, key: &str) -> Option<CacheResult<Value>> {
    match self.store.get_entry(key) {
      Ok(Some(entry)) => {
        let is_stale = self.is_stale(entry.fetched_at);
        Some(CacheResult::from_cache(entry.payload, entry.fetched_at, is_stale))
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "failed to read cache entry");
        None
      }
    }
  }

  /// Fetch with network-first strategy and offline fallback.
  ///
  /// 1. Try the network
  /// 2. On a connectivity failure, return the cached snapshot (offline mode)
  /// 3. Rejections and cache misses while offline propagate
  pub async fn fetch<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<Value>, SendError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, SendError>>,
  {
    match fetcher().await {
      Ok(data) => Ok(CacheResult::from_network(data)),
      Err(e) if is_connectivity_failure(&e) => match self.cached(key) {
        Some(cached) => {
          debug!(key, "serving offline copy");
          Ok(CacheResult {
            source: CacheSource::Offline,
            ..cached
          })
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }
}
