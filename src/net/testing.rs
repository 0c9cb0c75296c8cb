//! Scripted in-process transport for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::error::SendError;
use super::transport::{ApiRequest, ApiResponse, Transport};

/// What the fake service does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
  Ok(Value),
  Offline,
  Reject(u16, &'static str),
  Hang,
}

/// Records every request and answers from per-endpoint scripts.
///
/// One-shot replies are consumed first, then the endpoint's standing reply,
/// then `{}`. The offline switch overrides everything.
#[derive(Default)]
pub struct ScriptedTransport {
  calls: Mutex<Vec<ApiRequest>>,
  once: Mutex<HashMap<String, VecDeque<Reply>>>,
  always: Mutex<HashMap<String, Reply>>,
  offline: AtomicBool,
  delay: Mutex<Option<Duration>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn offline() -> Self {
    let transport = Self::default();
    transport.set_offline(true);
    transport
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn respond(&self, endpoint: &str, reply: Reply) {
    self.always.lock().unwrap().insert(endpoint.to_string(), reply);
  }

  pub fn respond_once(&self, endpoint: &str, reply: Reply) {
    self
      .once
      .lock()
      .unwrap()
      .entry(endpoint.to_string())
      .or_default()
      .push_back(reply);
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn endpoints(&self) -> Vec<String> {
    self.calls().into_iter().map(|c| c.endpoint).collect()
  }

  pub fn count(&self, endpoint: &str) -> usize {
    self.calls().iter().filter(|c| c.endpoint == endpoint).count()
  }

  fn next_reply(&self, endpoint: &str) -> Reply {
    if self.offline.load(Ordering::SeqCst) {
      return Reply::Offline;
    }
    if let Some(reply) = self
      .once
      .lock()
      .unwrap()
      .get_mut(endpoint)
      .and_then(VecDeque::pop_front)
    {
      return reply;
    }
    self
      .always
      .lock()
      .unwrap()
      .get(endpoint)
      .cloned()
      .unwrap_or_else(|| Reply::Ok(json!({})))
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError> {
    let reply = self.next_reply(&request.endpoint);
    if !matches!(reply, Reply::Offline) {
      self.calls.lock().unwrap().push(request.clone());
    }

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    match reply {
      Reply::Ok(data) => Ok(ApiResponse { status: 200, data }),
      Reply::Offline => Err(SendError::Connectivity("network unreachable".into())),
      Reply::Reject(status, message) => Err(SendError::Application {
        status,
        message: message.to_string(),
        body: json!({ "message": message }),
      }),
      Reply::Hang => std::future::pending().await,
    }
  }
}
