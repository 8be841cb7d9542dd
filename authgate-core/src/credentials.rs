//! Typed access to the persisted credential pair.
//!
//! [`CredentialStore`] wraps a [`StorageBackend`] and owns the keys under
//! which the access token, renewal token, identity snapshot, and optional
//! expiry bookkeeping live. It has no concurrency logic of its own; callers
//! serialize writes through the renewal coordinator.

use chrono::{DateTime, Utc};

use crate::store::{Secret, StorageBackend, StoreError};

/// Default storage key prefix.
pub const DEFAULT_STORAGE_PREFIX: &str = "authgate";

/// Typed wrapper over a storage backend holding the session credential pair.
///
/// Invariant: the store holds at most one pair at a time, and after any
/// completed operation both tokens are present or both are absent. Writes
/// are ordered so that no observer sees a new access token paired with a
/// renewal token from a different completed renewal: `set_pair` writes the
/// renewal token first, `clear` removes the access token first.
pub struct CredentialStore<S: StorageBackend> {
    backend: S,
    prefix: String,
}

impl<S: StorageBackend> CredentialStore<S> {
    /// Create a credential store over the given backend with the default
    /// key prefix.
    pub fn new(backend: S) -> Self {
        Self::with_prefix(backend, DEFAULT_STORAGE_PREFIX)
    }

    /// Create a credential store with a custom key prefix.
    ///
    /// Distinct prefixes let independent sessions share one backend.
    pub fn with_prefix(backend: S, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    fn access_key(&self) -> String {
        self.key("access_token")
    }

    fn renewal_key(&self) -> String {
        self.key("refresh_token")
    }

    fn expiry_key(&self) -> String {
        self.key("token_expiry")
    }

    fn identity_key(&self) -> String {
        self.key("identity")
    }

    /// Read the current access token.
    pub async fn get_access(&self) -> Result<Option<Secret>, StoreError> {
        self.backend.get(&self.access_key()).await
    }

    /// Read the current renewal token.
    pub async fn get_renewal(&self) -> Result<Option<Secret>, StoreError> {
        self.backend.get(&self.renewal_key()).await
    }

    /// Persist a complete credential pair.
    ///
    /// The renewal token is written before the access token so a reader
    /// never observes a fresh access token without its companion.
    pub async fn set_pair(&self, access: &Secret, renewal: &Secret) -> Result<(), StoreError> {
        self.backend.set(&self.renewal_key(), renewal).await?;
        self.backend.set(&self.access_key(), access).await?;
        tracing::debug!("stored credential pair");
        Ok(())
    }

    /// Replace only the access token.
    ///
    /// Used when a renewal response omits a new renewal token; renewal-token
    /// rotation is optional per exchange and the previous renewal token
    /// stays valid.
    pub async fn set_access_only(&self, access: &Secret) -> Result<(), StoreError> {
        self.backend.set(&self.access_key(), access).await?;
        tracing::debug!("rotated access token, renewal token unchanged");
        Ok(())
    }

    /// Remove all stored credentials, identity, and expiry bookkeeping.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove(&self.access_key()).await?;
        self.backend.remove(&self.renewal_key()).await?;
        self.backend.remove(&self.expiry_key()).await?;
        self.backend.remove(&self.identity_key()).await?;
        tracing::debug!("cleared stored credentials");
        Ok(())
    }

    /// True iff both tokens of the pair are present.
    pub async fn has_pair(&self) -> Result<bool, StoreError> {
        Ok(self.get_access().await?.is_some() && self.get_renewal().await?.is_some())
    }

    /// Record when the current access token expires.
    ///
    /// Purely informational; the 401 path stays authoritative for detecting
    /// an expired token.
    pub async fn set_expiry(&self, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        let value = Secret::new(expires_at.timestamp().to_string());
        self.backend.set(&self.expiry_key(), &value).await
    }

    /// Record the access-token expiry from a server-supplied lifetime in
    /// seconds.
    ///
    /// Endpoints control this value, so a lifetime that overflows the
    /// representable range is ignored rather than trusted; the 401 path
    /// catches the expiry either way.
    pub async fn record_expires_in(&self, seconds: u64) -> Result<(), StoreError> {
        let lifetime = i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        let expires_at = lifetime.and_then(|d| Utc::now().checked_add_signed(d));
        match expires_at {
            Some(at) => self.set_expiry(at).await,
            None => {
                tracing::warn!(seconds, "ignoring out-of-range token lifetime");
                Ok(())
            }
        }
    }

    /// Read the recorded access-token expiry, if any.
    ///
    /// An unparseable stored value is treated as absent.
    pub async fn expires_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let stored = self.backend.get(&self.expiry_key()).await?;
        Ok(stored
            .and_then(|s| s.expose().parse::<i64>().ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)))
    }

    /// Persist a serialized identity snapshot alongside the pair.
    pub async fn set_identity(&self, json: &str) -> Result<(), StoreError> {
        self.backend
            .set(&self.identity_key(), &Secret::new(json))
            .await
    }

    /// Read the serialized identity snapshot, if any.
    pub async fn get_identity(&self) -> Result<Option<Secret>, StoreError> {
        self.backend.get(&self.identity_key()).await
    }
}

impl<S: StorageBackend> std::fmt::Debug for CredentialStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}
