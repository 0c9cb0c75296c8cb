//! Reachability tracking for the remote service.
//!
//! The monitor holds one boolean and broadcasts changes over a watch channel.
//! Two sources feed it: a periodic probe of the health endpoint, and the gateway
//! reporting that a send failed for connectivity reasons while the monitor still
//! said "online".

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::net::{send_bounded, ApiRequest, SendError, Transport};

#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _rx) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  /// Build a monitor whose initial value comes from one probe.
  pub async fn detect(transport: &dyn Transport, health_endpoint: &str, timeout: Duration) -> Self {
    let online = probe(transport, health_endpoint, timeout).await;
    info!(online, "initial connectivity");
    Self::new(online)
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Receiver that observes every online/offline transition.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Record the current reachability. Returns true on a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      if online {
        info!("service reachable again");
      } else {
        warn!("service unreachable, switching to offline mode");
      }
    }
    changed
  }

  /// A send failed for connectivity reasons; trust that over the probe.
  pub fn report_unreachable(&self, reason: &str) {
    debug!(reason, "connectivity failure reported");
    self.set_online(false);
  }

  /// Re-probe the health endpoint on a fixed interval until aborted.
  pub fn spawn_probe(
    &self,
    transport: Arc<dyn Transport>,
    health_endpoint: String,
    timeout: Duration,
    every: Duration,
  ) -> JoinHandle<()> {
    let monitor = self.clone();

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
      loop {
        ticker.tick().await;
        let online = probe(transport.as_ref(), &health_endpoint, timeout).await;
        monitor.set_online(online);
      }
    })
  }
}

/// One bounded probe. Any answer from the service, even a rejection, proves it
/// is reachable.
pub async fn probe(transport: &dyn Transport, health_endpoint: &str, timeout: Duration) -> bool {
  match send_bounded(transport, &ApiRequest::get(health_endpoint), timeout).await {
    Ok(_) => true,
    Err(SendError::Connectivity(reason)) => {
      debug!(%reason, "probe failed");
      false
    }
    Err(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::{Reply, ScriptedTransport};

  #[test]
  fn test_transitions_are_reported_once() {
    let monitor = ConnectivityMonitor::new(true);
    let rx = monitor.subscribe();

    assert!(!monitor.set_online(true));
    assert!(!rx.has_changed().unwrap());

    assert!(monitor.set_online(false));
    assert!(rx.has_changed().unwrap());
    assert!(!monitor.is_online());

    assert!(!monitor.set_online(false));
  }

  #[test]
  fn test_report_unreachable_overrides_online() {
    let monitor = ConnectivityMonitor::new(true);
    monitor.report_unreachable("connection reset");
    assert!(!monitor.is_online());
  }

  #[test]
  fn test_set_online_without_subscribers() {
    let monitor = ConnectivityMonitor::new(false);
    assert!(monitor.set_online(true));
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn test_probe() {
    let transport = ScriptedTransport::new();
    assert!(probe(&transport, "/health", Duration::from_secs(1)).await);

    transport.respond("/health", Reply::Reject(404, "not found"));
    assert!(probe(&transport, "/health", Duration::from_secs(1)).await);

    transport.set_offline(true);
    assert!(!probe(&transport, "/health", Duration::from_secs(1)).await);

    transport.set_offline(false);
    transport.respond("/health", Reply::Hang);
    assert!(!probe(&transport, "/health", Duration::from_millis(20)).await);
  }

  #[tokio::test]
  async fn test_spawned_probe_detects_recovery() {
    let transport = Arc::new(ScriptedTransport::offline());
    let monitor = ConnectivityMonitor::detect(transport.as_ref(), "/health", Duration::from_secs(1)).await;
    assert!(!monitor.is_online());

    let mut rx = monitor.subscribe();
    let handle = monitor.spawn_probe(
      transport.clone(),
      "/health".to_string(),
      Duration::from_secs(1),
      Duration::from_millis(10),
    );

    transport.set_offline(false);
    tokio::time::timeout(Duration::from_secs(2), rx.changed())
      .await
      .unwrap()
      .unwrap();
    assert!(*rx.borrow());

    handle.abort();
  }
}
