//! Status types owned by the sync service.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::queue::DrainReport;

/// Why a sync pass failed. Recorded and retried on the next trigger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  #[error("service unreachable, {remaining} request(s) still queued: {reason}")]
  Offline { reason: String, remaining: usize },

  #[error("failed to refresh {}", .failed.join(", "))]
  Refresh { failed: Vec<String> },

  #[error("local store error: {0}")]
  Storage(String),

  #[error("sync pass aborted: {0}")]
  Aborted(String),
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
  pub drain: DrainReport,
  /// Cache keys overwritten by this pass
  pub refreshed: Vec<String>,
  pub finished_at: DateTime<Utc>,
}

pub type PassResult = Result<SyncReport, SyncError>;

/// A running pass that any number of triggers can await.
pub(crate) type SharedPass = Shared<BoxFuture<'static, PassResult>>;

/// Sent after cache entries were overwritten so views re-read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEvent {
  pub keys: Vec<String>,
}

impl RefreshEvent {
  pub fn contains(&self, key: &str) -> bool {
    self.keys.iter().any(|k| k == key)
  }
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
  pub is_online: bool,
  pub pending_count: usize,
  pub dead_count: usize,
  pub is_syncing: bool,
  pub last_synced_at: Option<DateTime<Utc>>,
  pub last_error: Option<String>,
}

impl SyncStatus {
  /// One-line summary for the command line.
  pub fn summary(&self) -> String {
    let connectivity = if self.is_online { "online" } else { "offline" };
    let activity = if self.is_syncing { ", syncing" } else { "" };
    let last = self
      .last_synced_at
      .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
      .unwrap_or_else(|| "never".to_string());

    let mut line = format!(
      "{}{} | pending: {} | dead: {} | last sync: {}",
      connectivity, activity, self.pending_count, self.dead_count, last
    );
    if let Some(error) = &self.last_error {
      line.push_str(&format!(" | last error: {}", error));
    }
    line
  }
}

/// Mutable state behind the service's lock.
#[derive(Default)]
pub(crate) struct SyncState {
  pub last_synced_at: Option<DateTime<Utc>>,
  pub last_error: Option<SyncError>,
  /// Passes finished, successful or not
  pub passes: u64,
  /// The pass in flight, if any. At most one exists at a time.
  pub current: Option<SharedPass>,
  pub timer: Option<JoinHandle<()>>,
  pub reconnect_watch: Option<JoinHandle<()>>,
}

impl SyncState {
  pub fn in_progress(&self) -> bool {
    self.current.is_some()
  }
}
