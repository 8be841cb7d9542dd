//! Session configuration.

use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::credentials::DEFAULT_STORAGE_PREFIX;
use crate::transport::DEFAULT_TIMEOUT_SECS;

/// How [`SessionController::initialize`](crate::session::SessionController::initialize)
/// treats a stored credential pair found at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// Trust the stored pair and mark the session authenticated without a
    /// network round trip. Matches the common client behavior; a stale pair
    /// is caught by the first 401.
    #[default]
    Trust,
    /// Validate the stored pair against the configured validation endpoint
    /// before marking the session authenticated.
    Validate,
}

/// Configuration for one session: endpoint URLs, timeout, storage keying,
/// and the initialization policy.
///
/// Deserializable so embedders can load it from their own config files.
///
/// # Example
///
/// ```rust,ignore
/// use authgate_core::SessionConfig;
/// use url::Url;
///
/// let config = SessionConfig::new(
///     Url::parse("https://api.example.com/auth/login").unwrap(),
///     Url::parse("https://api.example.com/auth/refresh").unwrap(),
/// )
/// .with_storage_prefix("myapp");
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Endpoint receiving the opaque login payload.
    pub login_url: Url,

    /// Endpoint exchanging a renewal token for a fresh access token.
    pub refresh_url: Url,

    /// Endpoint used by [`InitPolicy::Validate`] to confirm a stored pair
    /// and fetch the identity.
    #[serde(default)]
    pub validate_url: Option<Url>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Prefix for storage backend keys.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,

    /// Startup behavior when a stored pair exists.
    #[serde(default)]
    pub init_policy: InitPolicy,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_storage_prefix() -> String {
    DEFAULT_STORAGE_PREFIX.to_string()
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the two
    /// required endpoints.
    pub fn new(login_url: Url, refresh_url: Url) -> Self {
        Self {
            login_url,
            refresh_url,
            validate_url: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            init_policy: InitPolicy::default(),
        }
    }

    /// Set the validation endpoint and switch to [`InitPolicy::Validate`].
    pub fn with_validation(mut self, validate_url: Url) -> Self {
        self.validate_url = Some(validate_url);
        self.init_policy = InitPolicy::Validate;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the storage key prefix.
    pub fn with_storage_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Set the initialization policy explicitly.
    pub fn with_init_policy(mut self, policy: InitPolicy) -> Self {
        self.init_policy = policy;
        self
    }

    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
