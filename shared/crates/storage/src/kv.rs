//! Embedded key/value backend. Stands in for the ArangoDB collections the
//! spec treats as an external product (spec.md "Out of scope" /
//! SPEC_FULL.md §4.3) — `GraphStore` (see `graph.rs`) is built on top of
//! this trait the way the teacher's `StorageManager` was built on top of
//! `StorageBackend`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("serialization error: {0}")]
    SerializationError(String),
}

#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// In-memory backend: dev mode and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: std::sync::Arc<tokio::sync::RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.data.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Sled-based persistent backend.
pub struct SledStorage {
    db: sled::Db,
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(SledStorage { db })
    }
}

#[async_trait::async_trait]
impl StorageBackend for SledStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self
            .db
            .get(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(result.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.db
            .contains_key(key.as_bytes())
            .map_err(|e| StorageError::DatabaseError(e.to_string()))
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for result in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = result.map_err(|e| StorageError::DatabaseError(e.to_string()))?;
            keys.push(String::from_utf8_lossy(&key).to_string());
        }
        Ok(keys)
    }
}

/// Typed JSON convenience layer over a `StorageBackend`.
pub struct StorageManager<T: StorageBackend> {
    backend: T,
}

impl<T: StorageBackend> StorageManager<T> {
    pub fn new(backend: T) -> Self {
        StorageManager { backend }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub async fn store_json<V: Serialize>(&self, key: &str, value: &V) -> Result<(), StorageError> {
        let json = serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.backend.put(key, json).await
    }

    pub async fn load_json<V: for<'de> Deserialize<'de>>(
        &self,
        key: &str,
    ) -> Result<Option<V>, StorageError> {
        match self.backend.get(key).await? {
            Some(data) => {
                let value = serde_json::from_slice(&data)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.backend.exists(key).await
    }

    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.backend.list_keys(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(storage.exists("k").await.unwrap());
        storage.delete("k").await.unwrap();
        assert!(!storage.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn storage_manager_roundtrips_json() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Doc {
            id: String,
            title: String,
        }
        let manager = StorageManager::new(MemoryStorage::new());
        let doc = Doc {
            id: "eng#d-1".into(),
            title: "hello".into(),
        };
        manager.store_json("eng_d-1", &doc).await.unwrap();
        let loaded: Doc = manager.load_json("eng_d-1").await.unwrap().unwrap();
        assert_eq!(loaded, doc);
    }
}
