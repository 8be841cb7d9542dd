//! Authorized request dispatch with transparent credential renewal.
//!
//! [`RequestGateway`] wraps a [`Transport`]: it attaches the stored access
//! token to outbound requests, detects authorization failures, drives a
//! single renewal through the [`RenewalCoordinator`], and retries the
//! original request exactly once with the fresh credential. Renewal failure
//! is terminal: the store is cleared, the configured callback fires once,
//! and the caller receives [`AuthError::SessionExpired`].

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::coordinator::RenewalCoordinator;
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::store::{Secret, StorageBackend};
use crate::transport::{HttpRequest, HttpResponse, Transport, DEFAULT_TIMEOUT_SECS};

/// Callback invoked exactly once per terminal authentication failure.
pub type SessionExpiredCallback = Arc<dyn Fn(&AuthError) + Send + Sync>;

/// Wire shape of the renewal endpoint response.
///
/// `refreshToken` is optional: its absence means the previous renewal token
/// stays valid and only the access token rotates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Sends authorized requests and keeps them authorized as credentials
/// expire.
///
/// Cloning is cheap; all clones share the credential store, coordinator,
/// and transport.
pub struct RequestGateway<S: StorageBackend, T: Transport> {
    credentials: Arc<CredentialStore<S>>,
    coordinator: Arc<RenewalCoordinator>,
    transport: Arc<T>,
    refresh_url: Url,
    request_timeout: Duration,
    on_session_expired: Option<SessionExpiredCallback>,
}

impl<S: StorageBackend, T: Transport> Clone for RequestGateway<S, T> {
    fn clone(&self) -> Self {
        Self {
            credentials: self.credentials.clone(),
            coordinator: self.coordinator.clone(),
            transport: self.transport.clone(),
            refresh_url: self.refresh_url.clone(),
            request_timeout: self.request_timeout,
            on_session_expired: self.on_session_expired.clone(),
        }
    }
}

impl<S: StorageBackend, T: Transport> RequestGateway<S, T> {
    /// Create a gateway over shared collaborators.
    pub fn new(
        credentials: Arc<CredentialStore<S>>,
        coordinator: Arc<RenewalCoordinator>,
        transport: Arc<T>,
        refresh_url: Url,
    ) -> Self {
        Self {
            credentials,
            coordinator,
            transport,
            refresh_url,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            on_session_expired: None,
        }
    }

    /// Register the callback fired once per terminal authentication failure.
    ///
    /// The callback is never invoked for ordinary request errors.
    pub fn with_error_callback(mut self, callback: SessionExpiredCallback) -> Self {
        self.on_session_expired = Some(callback);
        self
    }

    /// Set the default per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The shared credential store.
    pub fn credentials(&self) -> &Arc<CredentialStore<S>> {
        &self.credentials
    }

    /// Execute a request with credential attachment, renewal, and a single
    /// retry.
    ///
    /// Responses other than 401 are returned unchanged, success or failure.
    /// The first 401 triggers one renewal cycle through the coordinator and
    /// one resend; a 401 on the resend is terminal.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let mut bearer = self.credentials.get_access().await?;
        let mut already_retried = false;

        loop {
            let mut attempt = request.clone();
            if attempt.timeout.is_none() {
                attempt.timeout = Some(self.request_timeout);
            }
            if let Some(token) = bearer.clone() {
                attempt = attempt.with_bearer(token);
            }

            let response = self.transport.send(attempt).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if already_retried {
                tracing::warn!(url = %request.url, "request unauthorized after renewal");
                return Err(self.expire_session(AuthError::SessionExpired).await);
            }

            if self.credentials.get_renewal().await?.is_none() {
                tracing::warn!(url = %request.url, "unauthorized with no renewal credential");
                return Err(self.expire_session(AuthError::SessionExpired).await);
            }

            already_retried = true;
            let token = self.coordinator.request(|| self.lead_renewal()).await?;
            bearer = Some(token);
        }
    }

    /// GET convenience verb.
    pub async fn get(&self, url: Url) -> Result<HttpResponse, AuthError> {
        self.execute(HttpRequest::new(Method::GET, url)).await
    }

    /// POST convenience verb.
    pub async fn post(&self, url: Url, body: serde_json::Value) -> Result<HttpResponse, AuthError> {
        self.execute(HttpRequest::new(Method::POST, url).with_body(body))
            .await
    }

    /// PUT convenience verb.
    pub async fn put(&self, url: Url, body: serde_json::Value) -> Result<HttpResponse, AuthError> {
        self.execute(HttpRequest::new(Method::PUT, url).with_body(body))
            .await
    }

    /// PATCH convenience verb.
    pub async fn patch(
        &self,
        url: Url,
        body: serde_json::Value,
    ) -> Result<HttpResponse, AuthError> {
        self.execute(HttpRequest::new(Method::PATCH, url).with_body(body))
            .await
    }

    /// DELETE convenience verb.
    pub async fn delete(&self, url: Url) -> Result<HttpResponse, AuthError> {
        self.execute(HttpRequest::new(Method::DELETE, url)).await
    }

    /// Renewal operation run by the coordinator's leading caller.
    ///
    /// Failure here is terminal for the whole session: the leader clears the
    /// store and fires the callback once, and every waiter receives the
    /// resulting [`AuthError::SessionExpired`] without repeating either side
    /// effect.
    async fn lead_renewal(&self) -> Result<Secret, AuthError> {
        let renewal = match self.credentials.get_renewal().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                return Err(self.expire_session(AuthError::SessionExpired).await);
            }
            Err(e) => return Err(e.into()),
        };

        match self.exchange_renewal(&renewal).await {
            Ok(token) => Ok(token),
            Err(cause) => Err(self.expire_session(cause).await),
        }
    }

    /// Exchange the renewal token at the renewal endpoint and persist the
    /// result.
    async fn exchange_renewal(&self, renewal: &Secret) -> Result<Secret, AuthError> {
        let request = HttpRequest::new(Method::POST, self.refresh_url.clone())
            .with_body(serde_json::json!({ "refreshToken": renewal.expose() }))
            .with_timeout(self.request_timeout);

        let response = self.transport.send(request).await.map_err(|e| {
            AuthError::RenewalFailed {
                status: None,
                message: format!("renewal request failed: {}", e),
            }
        })?;

        if !response.is_success() {
            return Err(AuthError::RenewalFailed {
                status: Some(response.status.as_u16()),
                message: format!(
                    "renewal endpoint returned {}: {}",
                    response.status,
                    response.body_text()
                ),
            });
        }

        let parsed: RenewalResponse =
            response.json().map_err(|e| AuthError::InvalidResponse {
                message: format!("renewal response: {}", e),
            })?;

        let access = Secret::new(parsed.access_token);
        match parsed.refresh_token {
            Some(new_renewal) => {
                self.credentials
                    .set_pair(&access, &Secret::new(new_renewal))
                    .await?;
            }
            None => {
                self.credentials.set_access_only(&access).await?;
            }
        }
        // The pair is persisted; expiry is bookkeeping and must not fail
        // an otherwise completed renewal.
        if let Some(expires_in) = parsed.expires_in {
            if let Err(e) = self.credentials.record_expires_in(expires_in).await {
                tracing::warn!(error = %e, "failed to record token expiry");
            }
        }

        Ok(access)
    }

    /// Terminal authentication failure: clear credentials, fire the callback
    /// once, and hand back the error the caller fails with.
    async fn expire_session(&self, cause: AuthError) -> AuthError {
        tracing::warn!(error = %cause, "session expired, clearing stored credentials");
        if let Err(e) = self.credentials.clear().await {
            tracing::warn!(error = %e, "failed to clear credentials on session expiry");
        }

        let error = AuthError::SessionExpired;
        if let Some(callback) = &self.on_session_expired {
            callback(&error);
        }
        error
    }
}

impl<S: StorageBackend, T: Transport> std::fmt::Debug for RequestGateway<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("refresh_url", &self.refresh_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
