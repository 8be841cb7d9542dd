//! HTTP transport abstraction.
//!
//! The gateway never talks to the network directly; it hands an
//! [`HttpRequest`] to a [`Transport`] and inspects the [`HttpResponse`] that
//! comes back. [`ReqwestTransport`] is the default implementation; tests and
//! embedders can substitute their own.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::store::Secret;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error type for transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request did not complete within its timeout.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Connection or protocol failure.
    #[error("network error: {message}")]
    Network { message: String },

    /// The request could not be constructed.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// An outbound request the gateway can resend verbatim.
///
/// Kept as plain data (rather than a transport-specific builder) so the
/// gateway can clone and replay it after a credential renewal.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Optional JSON body, passed through untouched.
    pub body: Option<serde_json::Value>,
    /// Extra headers beyond the authorization header.
    pub headers: Vec<(String, String)>,
    /// Bearer credential attached by the gateway.
    pub bearer: Option<Secret>,
    /// Per-request timeout; the transport default applies when absent.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a request with no body, headers, or credential.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            headers: Vec::new(),
            bearer: None,
            timeout: None,
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a bearer credential.
    pub fn with_bearer(mut self, token: Secret) -> Self {
        self.bearer = Some(token);
        self
    }

    /// Set a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A completed response: status plus raw body bytes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body interpreted as UTF-8, lossily, for diagnostics.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Abstraction over the HTTP layer that actually sends requests.
///
/// The gateway wraps a transport only to intercept outcomes; it imposes no
/// policy beyond attaching credentials and reacting to 401s. Implementations
/// must surface timeouts as [`TransportError::Timeout`] and must not retry
/// on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the response, whatever its status.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Default [`Transport`] backed by [`reqwest::Client`].
pub struct ReqwestTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Create a transport over an existing client, sharing its pool.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Set the default per-request timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            message: e.to_string(),
        }
    } else if e.is_builder() || e.is_request() {
        TransportError::InvalidRequest {
            message: e.to_string(),
        }
    } else {
        TransportError::Network {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(request.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(map_reqwest_error)?
            .to_vec();

        tracing::debug!(%status, url = %request.url, "transport completed");
        Ok(HttpResponse { status, body })
    }
}
