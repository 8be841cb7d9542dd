//! In-memory storage backend implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Secret, StorageBackend, StoreError};

/// In-memory storage backend for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: HashMap<String, Secret>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.data.read().map(|d| d.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("keys_count", &count)
            .finish()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let data = self.data.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {}", e),
        })?;
        data.remove(key);
        Ok(())
    }
}
