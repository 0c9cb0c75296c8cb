//! Records held by the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::net::ApiRequest;

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
  /// Waiting for the next drain
  Pending,
  /// Being replayed right now
  InFlight,
  /// Last attempt hit a server error; will be retried
  FailedRetryable,
  /// Given up; lives in the dead letter table
  Dead,
}

impl RequestStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      RequestStatus::Pending => "pending",
      RequestStatus::InFlight => "in_flight",
      RequestStatus::FailedRetryable => "failed_retryable",
      RequestStatus::Dead => "dead",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "pending" => Some(RequestStatus::Pending),
      "in_flight" => Some(RequestStatus::InFlight),
      "failed_retryable" => Some(RequestStatus::FailedRetryable),
      "dead" => Some(RequestStatus::Dead),
      _ => None,
    }
  }

  /// Work still owed to the service.
  pub fn is_owed(&self) -> bool {
    matches!(
      self,
      RequestStatus::Pending | RequestStatus::FailedRetryable
    )
  }
}

/// A mutating call persisted because it could not be delivered immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
  /// Assigned by the store; strictly increasing and never reused
  pub seq: i64,
  pub request: ApiRequest,
  pub created_at: DateTime<Utc>,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub status: RequestStatus,
}

/// A queued request that will never be replayed, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadRequest {
  pub entry: QueuedRequest,
  pub reason: String,
  pub died_at: DateTime<Utc>,
}

/// Last known server state for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Value,
  pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(key: impl Into<String>, payload: Value) -> Self {
    Self {
      key: key.into(),
      payload,
      fetched_at: Utc::now(),
    }
  }
}
