//! OS keyring-backed storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, StorageBackend, StoreError};

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// Keys are stored using the format `{service_name}/{key}` where the
/// service name is set during construction.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Create a new keyring store with the given service name.
    ///
    /// # Panics
    ///
    /// Panics if the keyring backend is not available on this platform.
    /// Use [`try_new`](Self::try_new) for a non-panicking version.
    pub fn new(service_name: &str) -> Self {
        Self::try_new(service_name).expect("keyring backend not available")
    }

    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        // Probe availability by attempting to create a test entry
        let test_key = format!("{}/__test__", service_name);
        match Entry::new(&test_key, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn create_entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, "authgate").map_err(|e| StoreError::Backend {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let entry = self.create_entry(key)?;

        match entry.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::Backend {
                message: format!("ambiguous keyring entry for key: {}", key),
            }),
            Err(keyring::Error::Invalid(msg, _)) => Err(StoreError::Backend {
                message: format!("invalid keyring operation: {}", msg),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::Backend {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::Backend {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        entry
            .set_password(value.expose())
            .map_err(|e| StoreError::Backend {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()), // Idempotent delete
            Err(e) => Err(StoreError::Backend {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}
