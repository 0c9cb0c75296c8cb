//! Failure taxonomy for requests to the remote service.
//!
//! Every send failure is one of two things: the service could not be reached
//! (connectivity) or the service reached a decision (application). The split
//! decides whether a mutating call is queued for later or surfaced to the caller,
//! so it lives in exactly one predicate: [`is_connectivity_failure`].

use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, Error)]
pub enum SendError {
  /// Network unreachable, connection reset, timeout, or a response that did not
  /// come from the service (gateway errors, captive portals).
  #[error("service unreachable: {0}")]
  Connectivity(String),

  /// A definitive rejection returned by the service.
  #[error("request rejected ({status}): {message}")]
  Application {
    status: u16,
    message: String,
    body: Value,
  },

  /// The request could not be built (unknown method, malformed endpoint).
  #[error("invalid request: {0}")]
  Invalid(String),
}

impl SendError {
  pub fn status(&self) -> Option<u16> {
    match self {
      SendError::Application { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// A 5xx rejection. The service answered but may succeed on a later attempt.
  pub fn is_server_error(&self) -> bool {
    self.status().is_some_and(|s| s >= 500)
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }
}

/// Whether a failure means "the service was not reached".
///
/// Connectivity failures are absorbed (queue the call, pause the drain); every
/// other failure is the service's decision and propagates unchanged.
pub fn is_connectivity_failure(err: &SendError) -> bool {
  matches!(err, SendError::Connectivity(_))
}

/// Statuses produced by intermediaries rather than the service itself.
pub fn is_gateway_status(status: u16) -> bool {
  matches!(status, 408 | 502 | 503 | 504)
}

/// Pull a human readable message out of an error body.
///
/// Services answer with `{"message": ...}`, `{"error": ...}` or
/// `{"detail": ...}`; anything else falls back to the raw text.
pub fn extract_message(body: &Value, raw: &[u8]) -> String {
  for field in ["message", "error", "detail"] {
    if let Some(msg) = body.get(field).and_then(Value::as_str) {
      return msg.to_string();
    }
  }

  let text = String::from_utf8_lossy(raw).trim().to_string();
  if text.is_empty() {
    "no details provided".to_string()
  } else {
    text
  }
}

/// Error returned to callers of the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
  /// The service (or request validation) rejected the call. Never queued.
  #[error(transparent)]
  Rejected(SendError),

  /// A read could not reach the service. Reads are served from the cache
  /// layer, not the queue.
  #[error("{method} {endpoint} requires the network: {reason}")]
  Unreachable {
    method: String,
    endpoint: String,
    reason: String,
  },

  /// The call could not be delivered nor persisted.
  #[error("failed to queue request: {0}")]
  Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_only_connectivity_is_absorbed() {
    assert!(is_connectivity_failure(&SendError::Connectivity(
      "connection reset".into()
    )));
    assert!(!is_connectivity_failure(&SendError::Application {
      status: 422,
      message: "email taken".into(),
      body: Value::Null,
    }));
    assert!(!is_connectivity_failure(&SendError::Invalid("bad method".into())));
  }

  #[test]
  fn test_server_error_and_unauthorized() {
    let err = SendError::Application {
      status: 500,
      message: "boom".into(),
      body: Value::Null,
    };
    assert!(err.is_server_error());
    assert!(!err.is_unauthorized());

    let err = SendError::Application {
      status: 401,
      message: "token expired".into(),
      body: Value::Null,
    };
    assert!(err.is_unauthorized());
    assert!(!err.is_server_error());
    assert!(!SendError::Connectivity("x".into()).is_server_error());
  }

  #[test]
  fn test_gateway_statuses() {
    for status in [408, 502, 503, 504] {
      assert!(is_gateway_status(status), "{status}");
    }
    for status in [400, 401, 404, 409, 422, 500] {
      assert!(!is_gateway_status(status), "{status}");
    }
  }

  #[test]
  fn test_extract_message() {
    let body = json!({"message": "email already registered"});
    assert_eq!(extract_message(&body, b""), "email already registered");

    let body = json!({"error": "forbidden"});
    assert_eq!(extract_message(&body, b""), "forbidden");

    assert_eq!(extract_message(&Value::Null, b" plain text "), "plain text");
    assert_eq!(extract_message(&Value::Null, b""), "no details provided");
  }
}
