//! Sync service: drains the offline queue, then refreshes cached reads.
//!
//! A pass runs on its own task so that cancelling whoever triggered it (a
//! timer, a watcher, a caller that gave up) never interrupts a drain halfway
//! through. Triggers that arrive while a pass is running await that pass
//! instead of starting another.

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::resources::Resource;
use super::state::{PassResult, RefreshEvent, SharedPass, SyncError, SyncReport, SyncState, SyncStatus};
use crate::connectivity::ConnectivityMonitor;
use crate::net::{is_connectivity_failure, send_bounded, ApiRequest, Session, Transport};
use crate::queue::{DrainStatus, OfflineQueue};
use crate::store::{CacheEntry, LocalStore};

/// Everything a pass needs, shared by the service handle and its tasks.
struct Inner {
  queue: Arc<OfflineQueue>,
  store: Arc<dyn LocalStore>,
  transport: Arc<dyn Transport>,
  session: Session,
  monitor: ConnectivityMonitor,
  resources: Vec<Resource>,
  timeout: Duration,
  state: Mutex<SyncState>,
  events: broadcast::Sender<RefreshEvent>,
}

/// Owner of the sync state. Construct once and hand clones to consumers.
#[derive(Clone)]
pub struct SyncService {
  inner: Arc<Inner>,
}

impl SyncService {
  pub fn new(
    queue: Arc<OfflineQueue>,
    store: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    session: Session,
    monitor: ConnectivityMonitor,
    resources: Vec<Resource>,
    timeout: Duration,
  ) -> Self {
    let (events, _) = broadcast::channel(16);

    Self {
      inner: Arc::new(Inner {
        queue,
        store,
        transport,
        session,
        monitor,
        resources,
        timeout,
        state: Mutex::new(SyncState::default()),
        events,
      }),
    }
  }

  /// Bring the service up: recover interrupted requests, sync once if online,
  /// arm the timer and start reacting to reconnects.
  pub async fn start(&self, interval: Duration) {
    if let Err(e) = self.inner.queue.recover() {
      warn!(error = %e, "failed to recover interrupted requests");
    }

    self.watch_reconnects();

    if self.inner.monitor.is_online() {
      // Errors are recorded on the state
      let _ = self.sync_all().await;
    } else {
      info!("starting offline, first sync waits for connectivity");
    }

    self.start_auto_sync(interval);
  }

  /// Stop timers and watchers, then let a running pass finish.
  pub async fn shutdown(&self) {
    self.stop_auto_sync();

    let (watcher, current) = {
      let mut state = self.inner.lock_state();
      (state.reconnect_watch.take(), state.current.clone())
    };
    if let Some(watcher) = watcher {
      watcher.abort();
    }
    if let Some(pass) = current {
      debug!("waiting for running sync pass before shutdown");
      let _ = pass.await;
    }
  }

  /// Drain the queue, then refresh every reference resource.
  ///
  /// Joins the running pass if there is one.
  pub async fn sync_all(&self) -> PassResult {
    let pass = {
      let mut state = self.inner.lock_state();
      match &state.current {
        Some(pass) => {
          debug!("sync already running, joining it");
          pass.clone()
        }
        None => {
          let pass = self.spawn_pass();
          state.current = Some(pass.clone());
          pass
        }
      }
    };

    pass.await
  }

  /// `sync_all` for callers that only care whether it worked.
  pub async fn sync_now(&self) -> Result<(), SyncError> {
    self.sync_all().await.map(|_| ())
  }

  fn spawn_pass(&self) -> SharedPass {
    let inner = Arc::clone(&self.inner);
    let handle = tokio::spawn(async move {
      let result = AssertUnwindSafe(inner.run_pass())
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(SyncError::Aborted("sync pass panicked".to_string())));
      inner.finish_pass(&result);
      result
    });

    async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(SyncError::Aborted(e.to_string())),
      }
    }
    .boxed()
    .shared()
  }

  /// Run `sync_all` every `interval`, replacing any timer already armed.
  pub fn start_auto_sync(&self, interval: Duration) {
    let service = self.clone();
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        debug!("auto-sync tick");
        let _ = service.sync_all().await;
      }
    });

    let previous = self.inner.lock_state().timer.replace(handle);
    if let Some(previous) = previous {
      previous.abort();
    }
    info!(interval_secs = interval.as_secs_f64(), "auto-sync armed");
  }

  /// Cancel future timer ticks. A pass already running is not interrupted.
  pub fn stop_auto_sync(&self) -> bool {
    let timer = self.inner.lock_state().timer.take();
    match timer {
      Some(handle) => {
        handle.abort();
        info!("auto-sync stopped");
        true
      }
      None => false,
    }
  }

  fn watch_reconnects(&self) {
    let service = self.clone();
    let mut rx = self.inner.monitor.subscribe();

    let handle = tokio::spawn(async move {
      // The monitor only notifies on real transitions, so an "online"
      // notification always follows a period offline.
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online {
          info!("connectivity restored, syncing now");
          let _ = service.sync_all().await;
        }
      }
    });

    let previous = self.inner.lock_state().reconnect_watch.replace(handle);
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  /// Receive an event each time cache entries are overwritten.
  pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
    self.inner.events.subscribe()
  }

  pub fn status(&self) -> SyncStatus {
    let (is_syncing, last_synced_at, last_error) = {
      let state = self.inner.lock_state();
      (
        state.in_progress() || self.inner.queue.is_draining(),
        state.last_synced_at,
        state.last_error.as_ref().map(ToString::to_string),
      )
    };

    let pending_count = self.inner.queue.pending_count().unwrap_or_else(|e| {
      warn!(error = %e, "failed to count pending requests");
      0
    });
    let dead_count = self
      .inner
      .queue
      .dead_letters()
      .map(|d| d.len())
      .unwrap_or(0);

    SyncStatus {
      is_online: self.inner.monitor.is_online(),
      pending_count,
      dead_count,
      is_syncing,
      last_synced_at,
      last_error,
    }
  }

  /// Passes finished since construction.
  pub fn passes(&self) -> u64 {
    self.inner.lock_state().passes
  }
}

impl Inner {
  fn lock_state(&self) -> MutexGuard<'_, SyncState> {
    match self.state.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  async fn run_pass(&self) -> PassResult {
    info!("sync started");

    // Writes first, so the refresh below already reflects them
    let drain = self
      .queue
      .process_pending_requests()
      .await
      .map_err(|e| SyncError::Storage(e.to_string()))?;

    if let DrainStatus::Halted { seq, reason } = &drain.status {
      info!(seq, "drain halted, skipping refresh");
      self.monitor.report_unreachable(reason);
      return Err(SyncError::Offline {
        reason: reason.clone(),
        remaining: drain.remaining,
      });
    }

    let refreshed = self.refresh_all().await?;

    Ok(SyncReport {
      drain,
      refreshed,
      finished_at: Utc::now(),
    })
  }

  /// Fetch every resource concurrently and overwrite its cache entry.
  async fn refresh_all(&self) -> Result<Vec<String>, SyncError> {
    let token = self.session.token();

    let fetches = self.resources.iter().map(|resource| {
      let request = ApiRequest::get(resource.endpoint()).with_token(token.clone());
      async move {
        let result = send_bounded(self.transport.as_ref(), &request, self.timeout).await;
        (resource, result)
      }
    });

    let mut refreshed = Vec::new();
    let mut failed = Vec::new();

    for (resource, result) in join_all(fetches).await {
      match result {
        Ok(response) => {
          let entry = CacheEntry::new(resource.cache_key(), response.data);
          match self.store.put_entry(&entry) {
            Ok(()) => refreshed.push(entry.key),
            Err(e) => {
              warn!(resource = %resource, error = %e, "failed to store refreshed resource");
              failed.push(resource.description());
            }
          }
        }
        Err(e) => {
          if is_connectivity_failure(&e) {
            self.monitor.report_unreachable(&e.to_string());
          }
          warn!(resource = %resource, error = %e, "failed to refresh resource");
          failed.push(resource.description());
        }
      }
    }

    if !refreshed.is_empty() {
      // No receivers is fine
      let _ = self.events.send(RefreshEvent {
        keys: refreshed.clone(),
      });
    }

    if failed.is_empty() {
      Ok(refreshed)
    } else {
      Err(SyncError::Refresh { failed })
    }
  }

  fn finish_pass(&self, result: &PassResult) {
    let mut state = self.lock_state();
    state.current = None;
    state.passes += 1;

    match result {
      Ok(report) => {
        state.last_synced_at = Some(report.finished_at);
        state.last_error = None;
        info!(
          delivered = report.drain.delivered,
          dead = report.drain.dead,
          refreshed = report.refreshed.len(),
          "sync finished"
        );
      }
      Err(e) => {
        state.last_error = Some(e.clone());
        warn!(error = %e, "sync failed, will retry on next trigger");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::{Reply, ScriptedTransport};
  use crate::net::Gateway;
  use crate::queue::RetryPolicy;
  use crate::store::SqliteStore;
  use serde_json::json;

  struct Harness {
    service: SyncService,
    transport: Arc<ScriptedTransport>,
    queue: Arc<OfflineQueue>,
    store: Arc<dyn LocalStore>,
    monitor: ConnectivityMonitor,
    gateway: Gateway,
  }

  fn harness(online: bool) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let session = Session::default();
    let monitor = ConnectivityMonitor::new(online);
    let queue = Arc::new(OfflineQueue::new(
      store.clone(),
      transport.clone(),
      session.clone(),
      RetryPolicy::default(),
    ));
    let service = SyncService::new(
      queue.clone(),
      store.clone(),
      transport.clone(),
      session.clone(),
      monitor.clone(),
      Resource::defaults(),
      Duration::from_secs(1),
    );
    let gateway = Gateway::new(
      transport.clone(),
      monitor.clone(),
      queue.clone(),
      session,
      Duration::from_secs(1),
    );

    Harness {
      service,
      transport,
      queue,
      store,
      monitor,
      gateway,
    }
  }

  fn enqueue_trips(h: &Harness, count: u32) {
    for n in 0..count {
      h.queue
        .enqueue(&ApiRequest::new("POST", &format!("/trips/{}", n), Some(json!({ "n": n }))))
        .unwrap();
    }
  }

  async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
      if condition() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
  }

  fn cached_keys(store: &Arc<dyn LocalStore>) -> Vec<String> {
    store
      .list_entries()
      .unwrap()
      .into_iter()
      .map(|e| e.key)
      .collect()
  }

  #[tokio::test]
  async fn test_drain_happens_before_refresh() {
    let h = harness(true);
    h.transport
      .respond("/trips", Reply::Ok(json!([{"id": 1}, {"id": 2}])));
    enqueue_trips(&h, 2);
    let mut events = h.service.subscribe();

    let report = h.service.sync_all().await.unwrap();

    let endpoints = h.transport.endpoints();
    assert_eq!(&endpoints[..2], &["/trips/0", "/trips/1"]);
    assert_eq!(endpoints.len(), 5);
    assert_eq!(report.drain.delivered, 2);
    assert_eq!(report.refreshed.len(), 3);

    assert_eq!(cached_keys(&h.store), vec!["dashboard_stats", "profile", "trips"]);
    let trips = h.store.get_entry("trips").unwrap().unwrap();
    assert_eq!(trips.payload, json!([{"id": 1}, {"id": 2}]));

    let event = events.try_recv().unwrap();
    assert!(event.contains("trips"));
    assert!(event.contains("profile"));

    let status = h.service.status();
    assert!(status.last_synced_at.is_some());
    assert!(status.last_error.is_none());
    assert_eq!(status.pending_count, 0);
  }

  #[tokio::test]
  async fn test_concurrent_triggers_share_one_pass() {
    let h = harness(true);
    h.transport.set_delay(Duration::from_millis(30));
    enqueue_trips(&h, 1);

    let (a, b) = tokio::join!(h.service.sync_now(), h.service.sync_now());

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(h.transport.count("/trips/0"), 1);
    assert_eq!(h.transport.count("/trips"), 1);
    assert_eq!(h.service.passes(), 1);
  }

  #[tokio::test]
  async fn test_trigger_during_pass_joins_it() {
    let h = harness(true);
    h.transport.set_delay(Duration::from_millis(40));
    enqueue_trips(&h, 2);

    let service = h.service.clone();
    let first = tokio::spawn(async move { service.sync_all().await });
    wait_until(|| h.service.status().is_syncing).await;

    let second = h.service.sync_all().await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(h.transport.count("/trips/0"), 1);
    assert_eq!(h.transport.count("/trips/1"), 1);
    assert_eq!(h.service.passes(), 1);
  }

  #[tokio::test]
  async fn test_offline_drain_skips_refresh() {
    let h = harness(true);
    h.transport.set_offline(true);
    enqueue_trips(&h, 2);

    let err = h.service.sync_all().await.unwrap_err();

    assert!(matches!(err, SyncError::Offline { remaining: 2, .. }));
    assert!(cached_keys(&h.store).is_empty());
    assert!(!h.monitor.is_online());

    let status = h.service.status();
    assert!(!status.is_syncing);
    assert_eq!(status.pending_count, 2);
    assert!(status.last_error.is_some());
    assert!(status.last_synced_at.is_none());
  }

  #[tokio::test]
  async fn test_refresh_failure_recorded_but_others_cached() {
    let h = harness(true);
    h.transport.respond("/users/me", Reply::Reject(500, "boom"));

    let err = h.service.sync_all().await.unwrap_err();

    assert_eq!(
      err,
      SyncError::Refresh {
        failed: vec!["profile".to_string()]
      }
    );
    assert_eq!(cached_keys(&h.store), vec!["dashboard_stats", "trips"]);

    // Next trigger succeeds and clears the error
    h.transport.respond("/users/me", Reply::Ok(json!({"name": "Ana"})));
    h.service.sync_all().await.unwrap();
    assert!(h.service.status().last_error.is_none());
  }

  #[tokio::test]
  async fn test_refresh_overwrites_entries() {
    let h = harness(true);
    h.transport.respond("/trips", Reply::Ok(json!([1, 2, 3])));
    h.service.sync_all().await.unwrap();

    h.transport.respond("/trips", Reply::Ok(json!([4])));
    h.service.sync_all().await.unwrap();

    assert_eq!(h.store.get_entry("trips").unwrap().unwrap().payload, json!([4]));
  }

  #[tokio::test]
  async fn test_start_online_populates_cache_before_first_tick() {
    let h = harness(true);

    h.service.start(Duration::from_secs(3600)).await;

    assert_eq!(h.service.passes(), 1);
    assert_eq!(cached_keys(&h.store), vec!["dashboard_stats", "profile", "trips"]);

    h.service.shutdown().await;
    // Shutdown already disarmed the timer
    assert!(!h.service.stop_auto_sync());
  }

  #[tokio::test]
  async fn test_start_offline_waits() {
    let h = harness(false);

    h.service.start(Duration::from_secs(3600)).await;

    assert_eq!(h.service.passes(), 0);
    assert!(h.transport.calls().is_empty());
    h.service.shutdown().await;
  }

  #[tokio::test]
  async fn test_signup_offline_then_reconnect() {
    let h = harness(false);
    h.service.start(Duration::from_secs(3600)).await;

    let body = json!({"email": "ana@example.com", "password": "hunter22"});
    let response = h
      .gateway
      .request("POST", "/auth/register", Some(body.clone()))
      .await
      .unwrap();
    assert!(response.queued);
    assert_eq!(h.service.status().pending_count, 1);

    // Mid-interval: the hour-long timer must not be what delivers it
    h.monitor.set_online(true);
    wait_until(|| h.service.status().pending_count == 0 && h.service.passes() == 1).await;

    assert_eq!(h.transport.count("/auth/register"), 1);
    let sent = &h.transport.calls()[0];
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.body, Some(body));

    h.service.shutdown().await;
  }

  #[tokio::test]
  async fn test_timer_fires_and_stops() {
    let h = harness(true);

    h.service.start_auto_sync(Duration::from_millis(20));
    wait_until(|| h.service.passes() >= 2).await;

    assert!(h.service.stop_auto_sync());
    wait_until(|| !h.service.status().is_syncing).await;
    let passes = h.service.passes();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.service.passes(), passes);
    assert!(!h.service.stop_auto_sync());
  }

  #[tokio::test]
  async fn test_rearming_cancels_previous_timer() {
    let h = harness(true);

    h.service.start_auto_sync(Duration::from_millis(20));
    h.service.start_auto_sync(Duration::from_millis(20));
    h.service.stop_auto_sync();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.service.passes(), 0);
  }

  #[tokio::test]
  async fn test_stop_does_not_abort_running_pass() {
    let h = harness(true);
    h.transport.set_delay(Duration::from_millis(40));
    enqueue_trips(&h, 1);

    h.service.start_auto_sync(Duration::from_millis(5));
    wait_until(|| h.service.status().is_syncing).await;
    h.service.stop_auto_sync();

    wait_until(|| h.service.passes() == 1).await;
    assert_eq!(h.service.status().pending_count, 0);
    assert!(h.service.status().last_synced_at.is_some());
  }
}
