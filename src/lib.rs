//! asset-cache - a versioned cache for static and 3D-model game assets.
//!
//! The cache follows the service-worker lifecycle: `install` pre-caches a
//! manifest into the store named by the current version, `activate` removes
//! stores from older versions, and every request from a controlled page goes
//! through a cache-first strategy. A `CLEAR_CACHE` control message removes
//! every store.
//!
//! # Example
//!
//! ```no_run
//! use asset_cache::{
//!     AssetCacheManager, AssetRequest, CacheConfig, DiskStorage, HttpNetwork, NoProgress,
//! };
//!
//! # async fn example() -> asset_cache::Result<()> {
//! let config = CacheConfig::default();
//! let network = HttpNetwork::new(config.origin_url()?)?;
//! let manager = AssetCacheManager::new(config, DiskStorage::new("stores"), network)?;
//!
//! let report = manager.install(&NoProgress).await?;
//! println!("{} cached, {} failed", report.cached.len(), report.failed.len());
//! manager.activate().await?;
//!
//! let request = AssetRequest::get("http://localhost:8080/assets/model/番茄.glb")?;
//! let outcome = manager.handle_fetch(&request).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod music;
pub mod network;
pub mod request;
pub mod response;
pub mod stats;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "server")]
pub mod server;

// Re-export main types for convenience
pub use config::{AppConfig, CacheConfig, PathConfig, ServerConfig};
pub use error::{Error, Result};
pub use manager::{
    ActivateReport, AssetCacheManager, FetchOutcome, InstallReport, LifecycleState, NoProgress,
    PrecacheFailure, PrecacheProgress,
};
pub use message::{ControlMessage, MessageReply, ReplyPort, reply_channel};
pub use music::{
    AudioSink, FilePreferenceStore, MemoryPreferenceStore, MusicControl, PreferenceStore,
    SilentSink,
};
pub use network::{HttpNetwork, Network};
pub use request::AssetRequest;
pub use response::{AssetResponse, ResponseKind};
pub use stats::{FetchStats, StatsSnapshot};
pub use store::{CacheStorage, DiskStorage, MemoryStorage};
