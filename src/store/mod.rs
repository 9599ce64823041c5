//! Cache storage abstraction.
//!
//! A cache store is a named mapping from a request key to a captured
//! response. Stores are created on demand, listed, and deleted as a whole;
//! individual entries carry no version of their own.

mod disk;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::response::AssetResponse;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Named key-value cache stores, in the shape of the browser Cache API.
///
/// Concurrent writers to the same key race and the last write wins; readers
/// never observe a partially written entry.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the store `name` if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if the store `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Lists the names of all stores.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes the store `name` and every entry in it. Returns false if the
    /// store did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Looks up `key` in the store `name`. A missing store is a miss.
    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<AssetResponse>>;

    /// Stores `response` under `key`, creating the store if needed.
    async fn put(&self, name: &str, key: &str, response: AssetResponse) -> Result<()>;

    /// Removes a single entry. Returns false if it was not present.
    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool>;

    /// Lists the entry keys of the store `name`.
    async fn entry_keys(&self, name: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<S: CacheStorage + ?Sized> CacheStorage for Arc<S> {
    async fn open(&self, name: &str) -> Result<()> {
        (**self).open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        (**self).has(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        (**self).keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        (**self).delete(name).await
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<AssetResponse>> {
        (**self).match_entry(name, key).await
    }

    async fn put(&self, name: &str, key: &str, response: AssetResponse) -> Result<()> {
        (**self).put(name, key, response).await
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool> {
        (**self).delete_entry(name, key).await
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
        (**self).entry_keys(name).await
    }
}
