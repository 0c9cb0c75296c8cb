//! Offline queue: the lifecycle of mutating requests that could not be
//! delivered when they were issued.
//!
//! Requests are replayed strictly in sequence order. A drain stops at the first
//! connectivity failure so the backlog stays ordered for the next attempt, while
//! a request the service refuses is moved aside so it cannot block the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::net::{
  is_connectivity_failure, send_bounded, ApiRequest, ApiResponse, SendError, Session, Transport,
};
use crate::store::{DeadRequest, LocalStore, QueuedRequest, RequestStatus, StoreError};

/// Limits applied while replaying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Attempts allowed for a request failing with a 5xx before it is dead
  pub max_attempts: u32,
  /// Upper bound for a single replay attempt
  pub request_timeout: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      request_timeout: Duration::from_secs(15),
    }
  }
}

/// How a drain ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DrainStatus {
  /// Every owed request was attempted
  #[default]
  Completed,
  /// Stopped at `seq` because the service could not be reached
  Halted { seq: i64, reason: String },
  /// Another drain was running; nothing was sent
  AlreadyRunning,
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub delivered: usize,
  pub dead: usize,
  /// Requests that hit a server error and stay queued for a later drain
  pub retry_later: usize,
  /// Requests still owed when the drain ended
  pub remaining: usize,
  pub status: DrainStatus,
}

impl DrainReport {
  pub fn is_halted(&self) -> bool {
    matches!(self.status, DrainStatus::Halted { .. })
  }
}

enum Outcome {
  Delivered,
  RetryLater,
  Dead,
  Halted(String),
}

/// Resets the drain flag however the drain ends, including cancellation.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct OfflineQueue {
  store: Arc<dyn LocalStore>,
  transport: Arc<dyn Transport>,
  session: Session,
  policy: RetryPolicy,
  draining: AtomicBool,
}

impl OfflineQueue {
  pub fn new(
    store: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    session: Session,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      store,
      transport,
      session,
      policy,
      draining: AtomicBool::new(false),
    }
  }

  /// Persist a request as pending. The store assigns the next sequence id.
  pub fn enqueue(&self, request: &ApiRequest) -> Result<QueuedRequest, StoreError> {
    let queued = self.store.insert_request(request)?;
    info!(
      seq = queued.seq,
      method = %request.method,
      endpoint = %request.endpoint,
      durable = self.store.is_durable(),
      "request queued for later delivery"
    );
    Ok(queued)
  }

  /// Requests still owed to the service (pending or failed-retryable).
  pub fn pending_count(&self) -> Result<usize, StoreError> {
    Ok(self.pending()?.len())
  }

  /// Owed requests in replay order.
  pub fn pending(&self) -> Result<Vec<QueuedRequest>, StoreError> {
    Ok(
      self
        .store
        .list_requests()?
        .into_iter()
        .filter(|r| r.status.is_owed())
        .collect(),
    )
  }

  pub fn dead_letters(&self) -> Result<Vec<DeadRequest>, StoreError> {
    self.store.list_dead()
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Return requests interrupted mid-replay (crash, kill) to the queue.
  ///
  /// Their outcome is unknown, so they are sent again rather than dropped.
  pub fn recover(&self) -> Result<usize, StoreError> {
    let count = self.store.reset_in_flight()?;
    if count > 0 {
      warn!(count, "requeued requests interrupted during a previous replay");
    }
    Ok(count)
  }

  /// Replay every owed request in sequence order.
  pub async fn process_pending_requests(&self) -> Result<DrainReport, StoreError> {
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      debug!("drain already running, not starting another");
      return Ok(DrainReport {
        status: DrainStatus::AlreadyRunning,
        ..Default::default()
      });
    };

    let owed = self.pending()?;
    let mut report = DrainReport::default();
    if owed.is_empty() {
      return Ok(report);
    }

    info!(count = owed.len(), "draining offline queue");

    for (index, item) in owed.iter().enumerate() {
      let seq = item.seq;
      match self.replay(item.clone()).await? {
        Outcome::Delivered => report.delivered += 1,
        Outcome::RetryLater => report.retry_later += 1,
        Outcome::Dead => report.dead += 1,
        Outcome::Halted(reason) => {
          report.remaining = owed.len() - index;
          report.status = DrainStatus::Halted { seq, reason };
          break;
        }
      }
    }
    report.remaining += report.retry_later;

    info!(
      delivered = report.delivered,
      dead = report.dead,
      remaining = report.remaining,
      halted = report.is_halted(),
      "drain finished"
    );
    Ok(report)
  }

  async fn replay(&self, mut item: QueuedRequest) -> Result<Outcome, StoreError> {
    let previous_status = item.status;
    let previous_attempts = item.attempts;

    item.status = RequestStatus::InFlight;
    item.attempts += 1;
    self.store.update_request(&item)?;

    debug!(
      seq = item.seq,
      method = %item.request.method,
      endpoint = %item.request.endpoint,
      attempt = item.attempts,
      "replaying queued request"
    );

    match self.deliver(&mut item).await? {
      Ok(response) => {
        self.store.delete_request(item.seq)?;
        // A replayed sign-up or login may hand out the token later items need
        self.session.adopt_token(&response.data);
        debug!(seq = item.seq, "queued request delivered");
        Ok(Outcome::Delivered)
      }
      Err(e) if is_connectivity_failure(&e) => {
        // Leave it exactly as it was so the next drain starts here
        item.status = previous_status;
        item.attempts = previous_attempts;
        item.last_error = Some(e.to_string());
        self.store.update_request(&item)?;
        Ok(Outcome::Halted(e.to_string()))
      }
      Err(e) if e.is_server_error() && item.attempts < self.policy.max_attempts => {
        warn!(
          seq = item.seq,
          attempt = item.attempts,
          error = %e,
          "server error while replaying, will retry"
        );
        item.status = RequestStatus::FailedRetryable;
        item.last_error = Some(e.to_string());
        self.store.update_request(&item)?;
        Ok(Outcome::RetryLater)
      }
      Err(e) => {
        warn!(
          seq = item.seq,
          method = %item.request.method,
          endpoint = %item.request.endpoint,
          error = %e,
          "queued request refused, moving to dead letters"
        );
        item.status = RequestStatus::Dead;
        item.last_error = Some(e.to_string());
        self.store.bury_request(&item, &e.to_string())?;
        Ok(Outcome::Dead)
      }
    }
  }

  /// Send with the token captured at enqueue time.
  ///
  /// If that token is refused and the session has since obtained a different
  /// one, the item is rewritten with the current token and resent once.
  async fn deliver(
    &self,
    item: &mut QueuedRequest,
  ) -> Result<Result<ApiResponse, SendError>, StoreError> {
    let timeout = self.policy.request_timeout;

    match send_bounded(self.transport.as_ref(), &item.request, timeout).await {
      Err(e) if e.is_unauthorized() => {
        let current = self.session.token();
        if current.is_none() || current == item.request.auth_token {
          return Ok(Err(e));
        }

        info!(seq = item.seq, "captured token refused, resending with current session token");
        item.request.auth_token = current;
        self.store.update_request(item)?;
        Ok(send_bounded(self.transport.as_ref(), &item.request, timeout).await)
      }
      other => Ok(other),
    }
  }
}
