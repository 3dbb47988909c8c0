//! Persisted device storage: the only state that survives a restart.

pub mod file;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::error::StorageError;

pub use file::FileStorage;

/// Well-known storage keys.
pub mod keys {
    /// Serialized `Credential`.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// Serialized `Identity` from the last successful validation.
    pub const AUTH_USER: &str = "auth_user";
    /// Serialized `TravelProfile`, only used by the dev profile fallback.
    pub const TRAVEL_PROFILE: &str = "travel_profile";
}

/// Async string key/value store.
#[async_trait]
pub trait DeviceStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and deserialize a JSON value.
pub async fn load_json<T: DeserializeOwned>(
    storage: &dyn DeviceStorage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = storage.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize and write a JSON value.
pub async fn save_json<T: Serialize + ?Sized>(
    storage: &dyn DeviceStorage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    storage.set(key, raw).await
}

/// Volatile storage for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
    }

    #[tokio::test]
    async fn json_helpers_roundtrip() {
        let storage = MemoryStorage::new();
        let sample = Sample { id: "u1".into() };

        save_json(&storage, keys::AUTH_USER, &sample).await.unwrap();
        let loaded: Option<Sample> = load_json(&storage, keys::AUTH_USER).await.unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let storage = MemoryStorage::new();
        let loaded: Option<Sample> = load_json(&storage, keys::AUTH_USER).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn corrupt_value_is_serialization_error() {
        let storage = MemoryStorage::new();
        storage.set(keys::AUTH_USER, "{not json".into()).await.unwrap();
        let err = load_json::<Sample>(&storage, keys::AUTH_USER).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[tokio::test]
    async fn remove_deletes() {
        let storage = MemoryStorage::new();
        storage.set(keys::AUTH_TOKEN, "x".into()).await.unwrap();
        storage.remove(keys::AUTH_TOKEN).await.unwrap();
        assert!(storage.get(keys::AUTH_TOKEN).await.unwrap().is_none());
    }
}
