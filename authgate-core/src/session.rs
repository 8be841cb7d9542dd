//! Session lifecycle state machine.
//!
//! [`SessionController`] owns the session state visible to the application:
//! identity, authentication phase, and the last terminal error. It
//! orchestrates login (through the transport, persisting the returned pair),
//! logout (clearing everything, no network), and forced logout driven by the
//! gateway's terminal-failure callback. UI bindings consume the read-only
//! [`SessionSnapshot`] plus the `login`/`logout` action functions and the
//! `access_token` accessor.

use parking_lot::Mutex;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{InitPolicy, SessionConfig};
use crate::coordinator::RenewalCoordinator;
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::gateway::{RequestGateway, SessionExpiredCallback};
use crate::store::{Secret, StorageBackend, StoreError};
use crate::transport::{HttpRequest, Transport};

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// `initialize` has not run yet.
    Uninitialized,
    /// `initialize` is inspecting stored credentials.
    Loading,
    /// A credential pair is held and an identity is established.
    Authenticated,
    /// No usable session; login is required.
    Unauthenticated,
}

/// Read-only session snapshot for UI bindings.
#[derive(Debug, Clone)]
pub struct SessionSnapshot<U> {
    pub user: Option<U>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub error: Option<AuthError>,
}

/// Wire shape of the login endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse<U> {
    access_token: String,
    refresh_token: String,
    user: U,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct SessionState<U> {
    identity: Option<U>,
    phase: SessionPhase,
    authenticating: bool,
    last_error: Option<AuthError>,
}

impl<U> Default for SessionState<U> {
    fn default() -> Self {
        Self {
            identity: None,
            phase: SessionPhase::Uninitialized,
            authenticating: false,
            last_error: None,
        }
    }
}

/// The session state machine exposed to callers.
///
/// Generic over the application identity type `U`, which the controller
/// never inspects beyond (de)serializing it. All construction is explicit;
/// there are no process-wide default instances.
///
/// # Example
///
/// ```rust,ignore
/// use authgate_core::{MemoryStore, ReqwestTransport, SessionConfig, SessionController};
/// use serde::{Deserialize, Serialize};
/// use url::Url;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct User { id: String }
///
/// # async fn example() -> Result<(), authgate_core::AuthError> {
/// let config = SessionConfig::new(
///     Url::parse("https://api.example.com/auth/login")?,
///     Url::parse("https://api.example.com/auth/refresh")?,
/// );
/// let session: SessionController<User, _, _> =
///     SessionController::new(config, MemoryStore::new(), ReqwestTransport::new());
///
/// session.initialize().await?;
/// let user = session.login(&serde_json::json!({
///     "email": "ada@example.com",
///     "password": "secret",
/// })).await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionController<U, S: StorageBackend, T: Transport> {
    config: SessionConfig,
    credentials: Arc<CredentialStore<S>>,
    transport: Arc<T>,
    gateway: RequestGateway<S, T>,
    state: Arc<Mutex<SessionState<U>>>,
}

impl<U, S, T> SessionController<U, S, T>
where
    U: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    S: StorageBackend,
    T: Transport,
{
    /// Create a controller with no extra expiry listener.
    pub fn new(config: SessionConfig, backend: S, transport: T) -> Self {
        Self::with_expiry_listener(config, backend, transport, None)
    }

    /// Create a controller that also notifies `listener` on each terminal
    /// authentication failure, after the forced logout has been applied.
    pub fn with_expiry_listener(
        config: SessionConfig,
        backend: S,
        transport: T,
        listener: Option<SessionExpiredCallback>,
    ) -> Self {
        let credentials = Arc::new(CredentialStore::with_prefix(
            backend,
            config.storage_prefix.clone(),
        ));
        let transport = Arc::new(transport);
        let state: Arc<Mutex<SessionState<U>>> = Arc::new(Mutex::new(SessionState::default()));

        // Forced logout: the gateway has already cleared the store; mirror
        // that in the in-memory state and retain the error for display.
        let callback_state = state.clone();
        let callback: SessionExpiredCallback = Arc::new(move |error: &AuthError| {
            tracing::info!("forced logout after terminal authentication failure");
            {
                let mut state = callback_state.lock();
                state.identity = None;
                state.authenticating = false;
                state.phase = SessionPhase::Unauthenticated;
                state.last_error = Some(error.clone());
            }
            if let Some(listener) = &listener {
                listener(error);
            }
        });

        let gateway = RequestGateway::new(
            credentials.clone(),
            Arc::new(RenewalCoordinator::new()),
            transport.clone(),
            config.refresh_url.clone(),
        )
        .with_request_timeout(config.request_timeout())
        .with_error_callback(callback);

        Self {
            config,
            credentials,
            transport,
            gateway,
            state,
        }
    }

    /// The gateway for application requests; shares this session's
    /// credentials and renewal coordinator.
    pub fn gateway(&self) -> &RequestGateway<S, T> {
        &self.gateway
    }

    /// Establish the starting state from stored credentials.
    ///
    /// With [`InitPolicy::Trust`] a stored pair is accepted as an
    /// authenticated session without network validation, restoring the
    /// persisted identity when one exists. With [`InitPolicy::Validate`]
    /// the pair is confirmed against the validation endpoint first and the
    /// identity comes from that response.
    pub async fn initialize(&self) -> Result<SessionSnapshot<U>, AuthError> {
        self.state.lock().phase = SessionPhase::Loading;

        if !self.credentials.has_pair().await? {
            tracing::debug!("no stored credential pair, starting unauthenticated");
            self.state.lock().phase = SessionPhase::Unauthenticated;
            return self.snapshot().await.map_err(Into::into);
        }

        match self.config.init_policy {
            InitPolicy::Trust => {
                let identity = self.load_persisted_identity().await?;
                let mut state = self.state.lock();
                state.identity = identity;
                state.phase = SessionPhase::Authenticated;
                tracing::info!("restored session from stored credentials");
            }
            InitPolicy::Validate => self.validate_stored_session().await?,
        }

        self.snapshot().await.map_err(Into::into)
    }

    /// Authenticate with an opaque payload.
    ///
    /// The payload goes to the login endpoint untouched; the response must
    /// carry an access token, a renewal token, and the identity. Both
    /// outcomes reset the `authenticating` flag.
    pub async fn login<P: Serialize + ?Sized>(&self, payload: &P) -> Result<U, AuthError> {
        {
            let mut state = self.state.lock();
            state.authenticating = true;
            state.last_error = None;
        }

        let outcome = self.perform_login(payload).await;
        let mut state = self.state.lock();
        state.authenticating = false;
        match outcome {
            Ok(user) => {
                state.identity = Some(user.clone());
                state.phase = SessionPhase::Authenticated;
                state.last_error = None;
                tracing::info!("login succeeded");
                Ok(user)
            }
            Err(error) => {
                state.phase = SessionPhase::Unauthenticated;
                state.last_error = Some(error.clone());
                tracing::warn!(error = %error, "login failed");
                Err(error)
            }
        }
    }

    /// End the session locally: clear stored credentials, identity, and the
    /// last error. No network call is made.
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.credentials.clear().await?;
        let mut state = self.state.lock();
        state.identity = None;
        state.authenticating = false;
        state.last_error = None;
        state.phase = SessionPhase::Unauthenticated;
        tracing::info!("logged out");
        Ok(())
    }

    /// Read-only snapshot for UI bindings.
    ///
    /// `is_authenticated` requires both an established identity and a stored
    /// access credential.
    pub async fn snapshot(&self) -> Result<SessionSnapshot<U>, StoreError> {
        let has_access = self.credentials.get_access().await?.is_some();
        let state = self.state.lock();
        Ok(SessionSnapshot {
            user: state.identity.clone(),
            is_authenticated: state.identity.is_some() && has_access,
            loading: state.authenticating || state.phase == SessionPhase::Loading,
            error: state.last_error.clone(),
        })
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> SessionPhase {
        self.state.lock().phase
    }

    /// The current access credential, if one is stored.
    pub async fn access_token(&self) -> Result<Option<Secret>, StoreError> {
        self.credentials.get_access().await
    }

    async fn perform_login<P: Serialize + ?Sized>(&self, payload: &P) -> Result<U, AuthError> {
        let body = serde_json::to_value(payload).map_err(|e| AuthError::InvalidResponse {
            message: format!("login payload not serializable: {}", e),
        })?;

        // Straight through the transport: a 401 from the login endpoint
        // means rejected credentials, never a renewal cycle.
        let request = HttpRequest::new(Method::POST, self.config.login_url.clone())
            .with_body(body)
            .with_timeout(self.config.request_timeout());
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(AuthError::LoginFailed {
                status: Some(response.status.as_u16()),
                message: format!(
                    "login endpoint returned {}: {}",
                    response.status,
                    response.body_text()
                ),
            });
        }

        let parsed: LoginResponse<U> =
            response.json().map_err(|e| AuthError::InvalidResponse {
                message: format!("login response: {}", e),
            })?;

        self.credentials
            .set_pair(
                &Secret::new(parsed.access_token),
                &Secret::new(parsed.refresh_token),
            )
            .await?;
        // The pair is persisted and the login has succeeded; expiry and
        // identity writes are bookkeeping and must not turn that success
        // into a failure that leaves a live pair behind.
        if let Some(expires_in) = parsed.expires_in {
            if let Err(e) = self.credentials.record_expires_in(expires_in).await {
                tracing::warn!(error = %e, "failed to record token expiry");
            }
        }
        if let Ok(json) = serde_json::to_string(&parsed.user) {
            if let Err(e) = self.credentials.set_identity(&json).await {
                tracing::warn!(error = %e, "failed to persist identity");
            }
        }

        Ok(parsed.user)
    }

    async fn load_persisted_identity(&self) -> Result<Option<U>, StoreError> {
        let Some(stored) = self.credentials.get_identity().await? else {
            return Ok(None);
        };
        match serde_json::from_str(stored.expose()) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(error = %e, "persisted identity not decodable, ignoring");
                Ok(None)
            }
        }
    }

    async fn validate_stored_session(&self) -> Result<(), AuthError> {
        let Some(validate_url) = self.config.validate_url.clone() else {
            tracing::warn!("validate-on-init configured without a validation endpoint");
            let identity = self.load_persisted_identity().await?;
            let mut state = self.state.lock();
            state.identity = identity;
            state.phase = SessionPhase::Authenticated;
            return Ok(());
        };

        // Through the gateway so an expired access token gets one renewal.
        match self.gateway.get(validate_url).await {
            Ok(response) if response.is_success() => {
                let user: U = response.json().map_err(|e| AuthError::InvalidResponse {
                    message: format!("validation response: {}", e),
                })?;
                if let Ok(json) = serde_json::to_string(&user) {
                    self.credentials.set_identity(&json).await?;
                }
                let mut state = self.state.lock();
                state.identity = Some(user);
                state.phase = SessionPhase::Authenticated;
                tracing::info!("stored session validated");
                Ok(())
            }
            Ok(response) => {
                tracing::warn!(status = %response.status, "stored session rejected by validation endpoint");
                self.credentials.clear().await?;
                let mut state = self.state.lock();
                state.identity = None;
                state.phase = SessionPhase::Unauthenticated;
                Ok(())
            }
            Err(error) => {
                // Terminal failures already forced a logout through the
                // gateway callback; anything else leaves the pair in place
                // but starts unauthenticated.
                tracing::warn!(error = %error, "could not validate stored session");
                let mut state = self.state.lock();
                state.identity = None;
                state.phase = SessionPhase::Unauthenticated;
                state.last_error = Some(error);
                Ok(())
            }
        }
    }
}

impl<U, S: StorageBackend, T: Transport> std::fmt::Debug for SessionController<U, S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("login_url", &self.config.login_url.as_str())
            .field("phase", &self.state.lock().phase)
            .finish()
    }
}
