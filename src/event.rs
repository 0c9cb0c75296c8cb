use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::sync::RefreshEvent;

/// Events driving the long-running mode
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// Periodic tick for the status line and view polling
  Tick,
  /// Connectivity changed
  Connectivity(bool),
  /// A sync pass overwrote cache entries
  Refreshed(RefreshEvent),
  /// Ctrl-C
  Shutdown,
}

/// Merges the tick timer, connectivity changes, refresh notifications and
/// Ctrl-C into one stream.
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
  tasks: Vec<JoinHandle<()>>,
}

impl EventHandler {
  pub fn new(
    tick_rate: Duration,
    mut connectivity: watch::Receiver<bool>,
    mut refreshes: broadcast::Receiver<RefreshEvent>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tasks = Vec::new();

    let ticks = tx.clone();
    tasks.push(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(tick_rate);
      loop {
        ticker.tick().await;
        if ticks.send(Event::Tick).is_err() {
          break;
        }
      }
    }));

    let changes = tx.clone();
    tasks.push(tokio::spawn(async move {
      while connectivity.changed().await.is_ok() {
        let online = *connectivity.borrow_and_update();
        if changes.send(Event::Connectivity(online)).is_err() {
          break;
        }
      }
    }));

    let refreshed = tx.clone();
    tasks.push(tokio::spawn(async move {
      loop {
        match refreshes.recv().await {
          Ok(event) => {
            if refreshed.send(Event::Refreshed(event)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    }));

    tasks.push(tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Shutdown);
      }
    }));

    Self { rx, tasks }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Drop for EventHandler {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}
