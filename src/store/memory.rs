//! In-process cache storage.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::Result;
use crate::response::AssetResponse;

type Store = BTreeMap<String, AssetResponse>;

/// Cache storage held in memory. Store names are listed in sorted order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: RwLock<BTreeMap<String, Store>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.stores
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.stores.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.stores.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<AssetResponse>> {
        Ok(self
            .stores
            .read()
            .await
            .get(name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: &str, response: AssetResponse) -> Result<()> {
        self.stores
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), response);
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool> {
        Ok(self
            .stores
            .write()
            .await
            .get_mut(name)
            .is_some_and(|store| store.remove(key).is_some()))
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .await
            .get(name)
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.open("v1").await.unwrap();
        storage.put("v1", "GET /a", AssetResponse::new(200, "a")).await.unwrap();
        storage.open("v1").await.unwrap();

        assert_eq!(storage.entry_keys("v1").await.unwrap(), vec!["GET /a"]);
    }

    #[tokio::test]
    async fn put_creates_store_and_last_write_wins() {
        let storage = MemoryStorage::new();
        storage.put("v1", "k", AssetResponse::new(200, "first")).await.unwrap();
        storage.put("v1", "k", AssetResponse::new(200, "second")).await.unwrap();

        assert!(storage.has("v1").await.unwrap());
        let hit = storage.match_entry("v1", "k").await.unwrap().unwrap();
        assert_eq!(&hit.body[..], b"second");
    }

    #[tokio::test]
    async fn delete_removes_whole_store() {
        let storage = MemoryStorage::new();
        storage.put("old", "k", AssetResponse::new(200, "x")).await.unwrap();
        storage.open("new").await.unwrap();

        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.delete("old").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["new"]);
        assert!(storage.match_entry("old", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_entry_reports_presence() {
        let storage = MemoryStorage::new();
        storage.put("v1", "k", AssetResponse::new(200, "x")).await.unwrap();

        assert!(storage.delete_entry("v1", "k").await.unwrap());
        assert!(!storage.delete_entry("v1", "k").await.unwrap());
        assert!(!storage.delete_entry("missing", "k").await.unwrap());
    }
}
