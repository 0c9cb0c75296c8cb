//! Wire-level access to the remote service.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::error::{extract_message, is_gateway_status, SendError};

/// One call against the remote service, exactly as it goes on the wire.
///
/// A queued request stores this verbatim so a replay sends the same method,
/// endpoint, body and token as the original attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
  pub method: String,
  pub endpoint: String,
  pub body: Option<Value>,
  pub auth_token: Option<String>,
}

impl ApiRequest {
  pub fn new(method: &str, endpoint: &str, body: Option<Value>) -> Self {
    Self {
      method: method.trim().to_ascii_uppercase(),
      endpoint: endpoint.trim().to_string(),
      body,
      auth_token: None,
    }
  }

  pub fn get(endpoint: &str) -> Self {
    Self::new("GET", endpoint, None)
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.auth_token = token;
    self
  }

  /// Whether the call changes server state. Only these are ever queued.
  pub fn is_mutating(&self) -> bool {
    !matches!(self.method.as_str(), "GET" | "HEAD" | "OPTIONS")
  }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub data: Value,
}

/// Sends requests to the remote service.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError>;
}

/// Send with a hard upper bound on how long the attempt may take.
///
/// An attempt that never resolves would hold the drain guard forever, so
/// expiry is reported as a connectivity failure.
pub async fn send_bounded(
  transport: &dyn Transport,
  request: &ApiRequest,
  limit: Duration,
) -> Result<ApiResponse, SendError> {
  match tokio::time::timeout(limit, transport.send(request)).await {
    Ok(result) => result,
    Err(_) => Err(SendError::Connectivity(format!(
      "{} {} timed out after {:?}",
      request.method, request.endpoint, limit
    ))),
  }
}

/// Turn a status line and body into a response or a classified failure.
pub fn classify_response(status: u16, is_html: bool, body: &[u8]) -> Result<ApiResponse, SendError> {
  let parsed = if body.iter().all(u8::is_ascii_whitespace) {
    Value::Null
  } else {
    serde_json::from_slice(body)
      .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
  };

  if (200..300).contains(&status) {
    if is_html {
      // A login page served with 200 by a captive network.
      return Err(SendError::Connectivity(format!(
        "HTTP {} returned an HTML page instead of the service response",
        status
      )));
    }
    return Ok(ApiResponse {
      status,
      data: parsed,
    });
  }

  if is_gateway_status(status) {
    return Err(SendError::Connectivity(format!("HTTP {}", status)));
  }

  Err(SendError::Application {
    status,
    message: extract_message(&parsed, body),
    body: parsed,
  })
}

fn classify_transport_error(err: reqwest::Error) -> SendError {
  if err.is_builder() {
    SendError::Invalid(err.to_string())
  } else {
    SendError::Connectivity(err.to_string())
  }
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    // Url::join replaces the last path segment unless the base ends with '/'
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .connect_timeout(timeout)
      .user_agent(concat!("roadbook/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn resolve(&self, endpoint: &str) -> Result<Url, SendError> {
    self
      .base_url
      .join(endpoint.trim_start_matches('/'))
      .map_err(|e| SendError::Invalid(format!("bad endpoint {}: {}", endpoint, e)))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError> {
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|_| SendError::Invalid(format!("unknown method {}", request.method)))?;
    let url = self.resolve(&request.endpoint)?;

    let mut builder = self
      .client
      .request(method, url)
      .header(ACCEPT, "application/json");

    if let Some(token) = &request.auth_token {
      builder = builder.bearer_auth(token);
    }

    if let Some(body) = &request.body {
      let bytes = serde_json::to_vec(body)
        .map_err(|e| SendError::Invalid(format!("unserializable body: {}", e)))?;
      builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
    }

    let response = builder.send().await.map_err(classify_transport_error)?;

    let status = response.status().as_u16();
    let is_html = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.starts_with("text/html"));
    let body = response.bytes().await.map_err(classify_transport_error)?;

    tracing::debug!(
      method = %request.method,
      endpoint = %request.endpoint,
      status,
      "request completed"
    );

    classify_response(status, is_html, &body)
  }
}
