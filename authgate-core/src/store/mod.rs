//! Pluggable storage for session credentials.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`StorageBackend`] - Trait for key-value storage backends
//! - [`MemoryStore`] - In-memory implementation for testing and development
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend based on availability
//!
//! Backends store opaque string values under string keys. A missing key is
//! never an error; `get` returns `Ok(None)` for it.
//!
//! # Example
//!
//! ```rust,ignore
//! use authgate_core::store::{Secret, StorageBackend, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("authgate/access_token", &Secret::new("tok-123")).await.unwrap();
//!
//! let value = store.get("authgate/access_token").await.unwrap();
//! assert_eq!(value.unwrap().expose(), "tok-123");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing memory is zeroed when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for storage backend operations.
///
/// Variants carry plain messages so the error can be cloned and fanned out
/// to every caller waiting on a shared renewal outcome.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Access to the stored value was denied.
    #[error("access denied to key: {key}")]
    AccessDenied { key: String },

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Abstraction over credential storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
///
/// Applications can plug in their own backend (browser local storage bridge,
/// encrypted file, remote vault) by implementing this trait.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist. Implementations must not
    /// report a missing key as an error.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a value at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError>;

    /// Remove a value by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}

/// Create a storage backend with automatic selection.
///
/// If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
/// attempts to use the OS keyring, falling back to [`MemoryStore`] with a
/// warning when the keyring is unavailable. Otherwise returns a
/// [`MemoryStore`].
pub fn create_store(prefer_keyring: bool) -> Box<dyn StorageBackend> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new("authgate") {
            Ok(store) => {
                tracing::info!("using OS keyring for credential storage");
                return Box::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "keyring unavailable ({}), falling back to memory store; \
                     credentials will not persist across restarts",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "keyring storage requested but keyring-store feature not enabled; \
             using memory store"
        );
    }

    tracing::debug!("using in-memory credential storage");
    Box::new(MemoryStore::new())
}
