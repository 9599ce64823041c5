//! Durable cache storage on the local file system.
//!
//! Layout under the root directory:
//!
//! ```text
//! <sha256(store name)>/store.toml
//! <sha256(store name)>/entries/<sha256(key)>.toml
//! <sha256(store name)>/entries/<uuid>.body
//! ```
//!
//! An entry's metadata file names its body file, so renaming the metadata
//! into place commits the whole entry at once. Deleting a store renames its
//! directory aside before removing it; trash left by a failed removal is
//! swept on the next `open`.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::CacheStorage;
use crate::error::Result;
use crate::response::{AssetResponse, ResponseKind};

const STORE_META: &str = "store.toml";
const ENTRIES_DIR: &str = "entries";
const TRASH_PREFIX: &str = ".trash-";

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    name: String,
    created: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    kind: ResponseKind,
    headers: Vec<(String, String)>,
    body: String,
    size: u64,
    cached_at: DateTime<Utc>,
}

fn digest(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

fn not_found_as_none<T>(result: std::io::Result<T>) -> std::io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Writes `contents` next to `path` under a unique name, then renames it over
/// `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// Cache storage persisted under a root directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    // Serializes metadata swaps so a replaced body is always known to the
    // writer that replaced it.
    meta_lock: Arc<Mutex<()>>,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            meta_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(digest(name))
    }

    fn entry_meta_path(&self, name: &str, key: &str) -> PathBuf {
        self.store_dir(name)
            .join(ENTRIES_DIR)
            .join(format!("{}.toml", digest(key)))
    }

    async fn read_store_meta(dir: &Path) -> Result<Option<StoreMeta>> {
        let Some(contents) =
            not_found_as_none(tokio::fs::read_to_string(dir.join(STORE_META)).await)?
        else {
            return Ok(None);
        };
        Ok(Some(toml::from_str(&contents)?))
    }

    async fn read_entry_meta(path: &Path) -> Result<Option<EntryMeta>> {
        let Some(contents) = not_found_as_none(tokio::fs::read_to_string(path).await)? else {
            return Ok(None);
        };
        Ok(Some(toml::from_str(&contents)?))
    }

    async fn sweep_trash(&self) -> Result<()> {
        let Some(mut dir) = not_found_as_none(tokio::fs::read_dir(&self.root).await)? else {
            return Ok(());
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with(TRASH_PREFIX) {
                continue;
            }
            if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                log::warn!("Failed to sweep {}: {e}", entry.path().display());
            }
        }
        Ok(())
    }

    async fn remove_body(entries: &Path, body: &str) {
        if let Err(e) = tokio::fs::remove_file(entries.join(body)).await {
            if e.kind() != ErrorKind::NotFound {
                log::debug!("Failed to remove cache body {body}: {e}");
            }
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.sweep_trash().await?;
        let dir = self.store_dir(name);
        tokio::fs::create_dir_all(dir.join(ENTRIES_DIR)).await?;
        if Self::read_store_meta(&dir).await?.is_none() {
            let meta = StoreMeta {
                name: name.to_string(),
                created: Utc::now(),
            };
            write_atomic(&dir.join(STORE_META), toml::to_string(&meta)?.as_bytes()).await?;
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(Self::read_store_meta(&self.store_dir(name)).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let Some(mut dir) = not_found_as_none(tokio::fs::read_dir(&self.root).await)? else {
            return Ok(Vec::new());
        };

        let mut stores = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_store_meta(&entry.path()).await {
                Ok(Some(meta)) => stores.push(meta),
                Ok(None) => {}
                Err(e) => log::warn!(
                    "Skipping unreadable cache store {}: {e}",
                    entry.path().display()
                ),
            }
        }
        stores.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(stores.into_iter().map(|meta| meta.name).collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name);
        let trash = self
            .root
            .join(format!("{TRASH_PREFIX}{}", uuid::Uuid::new_v4()));

        // Once renamed the store is gone for readers; removal can lag behind.
        if not_found_as_none(tokio::fs::rename(&dir, &trash).await)?.is_none() {
            return Ok(false);
        }
        if let Err(e) = tokio::fs::remove_dir_all(&trash).await {
            log::warn!("Cache {name} deleted, leaving {} behind: {e}", trash.display());
        }
        Ok(true)
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<AssetResponse>> {
        let meta_path = self.entry_meta_path(name, key);
        let Some(meta) = Self::read_entry_meta(&meta_path).await? else {
            return Ok(None);
        };
        if meta.key != key {
            return Ok(None);
        }

        let body_path = self.store_dir(name).join(ENTRIES_DIR).join(&meta.body);
        // A concurrent overwrite may have replaced the body we were pointed at.
        let Some(body) = not_found_as_none(tokio::fs::read(&body_path).await)? else {
            return Ok(None);
        };

        Ok(Some(AssetResponse {
            status: meta.status,
            headers: meta.headers,
            body: Bytes::from(body),
            kind: meta.kind,
        }))
    }

    async fn put(&self, name: &str, key: &str, response: AssetResponse) -> Result<()> {
        self.open(name).await?;
        let entries = self.store_dir(name).join(ENTRIES_DIR);
        let meta_path = self.entry_meta_path(name, key);

        let body = format!("{}.body", uuid::Uuid::new_v4());
        write_atomic(&entries.join(&body), &response.body).await?;

        let _guard = self.meta_lock.lock().await;
        let previous = Self::read_entry_meta(&meta_path).await.ok().flatten();

        let meta = EntryMeta {
            key: key.to_string(),
            status: response.status,
            kind: response.kind,
            headers: response.headers,
            body: body.clone(),
            size: response.body.len() as u64,
            cached_at: Utc::now(),
        };
        if let Err(e) = write_atomic(&meta_path, toml::to_string(&meta)?.as_bytes()).await {
            Self::remove_body(&entries, &body).await;
            return Err(e.into());
        }

        if let Some(previous) = previous.filter(|p| p.body != body) {
            Self::remove_body(&entries, &previous.body).await;
        }
        Ok(())
    }

    async fn delete_entry(&self, name: &str, key: &str) -> Result<bool> {
        let meta_path = self.entry_meta_path(name, key);
        let _guard = self.meta_lock.lock().await;
        let Some(meta) = Self::read_entry_meta(&meta_path).await? else {
            return Ok(false);
        };
        if not_found_as_none(tokio::fs::remove_file(&meta_path).await)?.is_none() {
            return Ok(false);
        }
        Self::remove_body(&self.store_dir(name).join(ENTRIES_DIR), &meta.body).await;
        Ok(true)
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
        let entries = self.store_dir(name).join(ENTRIES_DIR);
        let Some(mut dir) = not_found_as_none(tokio::fs::read_dir(&entries).await)? else {
            return Ok(Vec::new());
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                if let Some(meta) = Self::read_entry_meta(&path).await? {
                    keys.push(meta.key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
