use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{is_connectivity_failure, GatewayError, SendError};
use super::session::Session;
use super::transport::{send_bounded, ApiRequest, Transport};
use crate::connectivity::ConnectivityMonitor;
use crate::queue::OfflineQueue;

/// What callers get back from the gateway.
///
/// `queued: true` means the call was accepted for later delivery: `data` is only
/// an echo of what was sent and carries no server-generated fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
  pub data: Value,
  pub queued: bool,
  /// Sequence id of the queued request
  #[serde(skip_serializing_if = "Option::is_none")]
  pub queued_id: Option<i64>,
}

impl GatewayResponse {
  fn delivered(data: Value) -> Self {
    Self {
      data,
      queued: false,
      queued_id: None,
    }
  }

  fn queued(echo: Option<Value>, seq: i64) -> Self {
    Self {
      data: echo.unwrap_or(Value::Null),
      queued: true,
      queued_id: Some(seq),
    }
  }
}

/// Single entry point for calls issued by the front end.
///
/// Mutating calls that cannot reach the service are persisted in the offline
/// queue; everything the service itself decides is passed back unchanged.
pub struct Gateway {
  transport: Arc<dyn Transport>,
  monitor: ConnectivityMonitor,
  queue: Arc<OfflineQueue>,
  session: Session,
  timeout: Duration,
}

impl Gateway {
  pub fn new(
    transport: Arc<dyn Transport>,
    monitor: ConnectivityMonitor,
    queue: Arc<OfflineQueue>,
    session: Session,
    timeout: Duration,
  ) -> Self {
    Self {
      transport,
      monitor,
      queue,
      session,
      timeout,
    }
  }

  pub async fn request(
    &self,
    method: &str,
    endpoint: &str,
    body: Option<Value>,
  ) -> Result<GatewayResponse, GatewayError> {
    let request = ApiRequest::new(method, endpoint, body).with_token(self.session.token());

    if !self.monitor.is_online() {
      debug!(method = %request.method, endpoint = %request.endpoint, "offline, skipping send");
      return self.defer(request, "offline".to_string());
    }

    match send_bounded(self.transport.as_ref(), &request, self.timeout).await {
      Ok(response) => {
        debug!(status = response.status, endpoint = %request.endpoint, "delivered");
        self.session.adopt_token(&response.data);
        Ok(GatewayResponse::delivered(response.data))
      }
      Err(e) if is_connectivity_failure(&e) => {
        self.monitor.report_unreachable(&e.to_string());
        self.defer(request, e.to_string())
      }
      Err(e) => Err(GatewayError::Rejected(e)),
    }
  }

  fn defer(&self, request: ApiRequest, reason: String) -> Result<GatewayResponse, GatewayError> {
    if !request.is_mutating() {
      return Err(GatewayError::Unreachable {
        method: request.method,
        endpoint: request.endpoint,
        reason,
      });
    }

    let queued = self.queue.enqueue(&request)?;
    info!(seq = queued.seq, %reason, "delivery deferred");
    Ok(GatewayResponse::queued(request.body, queued.seq))
  }

  /// Send a read directly, without queueing. Used by the cache layer fetchers.
  pub async fn get(&self, endpoint: &str) -> Result<Value, SendError> {
    let request = ApiRequest::get(endpoint).with_token(self.session.token());
    let result = send_bounded(self.transport.as_ref(), &request, self.timeout).await;

    if let Err(e) = &result {
      if is_connectivity_failure(e) {
        self.monitor.report_unreachable(&e.to_string());
      }
    }
    result.map(|r| r.data)
  }
}
