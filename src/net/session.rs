use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Response fields that carry a freshly issued token.
const TOKEN_FIELDS: [&str; 2] = ["token", "access_token"];

/// Ambient auth context shared by every component that talks to the service.
///
/// The gateway captures the current token into each queued request; replay
/// consults it again only when the captured token was refused.
#[derive(Debug, Clone, Default)]
pub struct Session {
  token: Arc<RwLock<Option<String>>>,
}

impl Session {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: Arc::new(RwLock::new(token)),
    }
  }

  pub fn token(&self) -> Option<String> {
    match self.token.read() {
      Ok(guard) => guard.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  pub fn set_token(&self, token: Option<String>) {
    match self.token.write() {
      Ok(mut guard) => *guard = token,
      Err(poisoned) => *poisoned.into_inner() = token,
    }
  }

  /// Take over a token issued in a response body (sign-up, login).
  ///
  /// Returns true when the session token changed.
  pub fn adopt_token(&self, data: &Value) -> bool {
    let issued = TOKEN_FIELDS
      .iter()
      .find_map(|field| data.get(*field).and_then(Value::as_str))
      .map(str::trim)
      .filter(|t| !t.is_empty());

    match issued {
      Some(token) if self.token().as_deref() != Some(token) => {
        self.set_token(Some(token.to_string()));
        info!("session token updated from service response");
        true
      }
      _ => false,
    }
  }
}
