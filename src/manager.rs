//! The asset cache manager: install, activate, fetch interception and
//! control messages over a [`CacheStorage`] and a [`Network`].

use std::sync::{Mutex, PoisonError};

use futures::{StreamExt, future, stream};
use serde::Serialize;
use url::Url;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::message::{ControlMessage, MessageReply, ReplyPort};
use crate::network::Network;
use crate::request::AssetRequest;
use crate::response::{AssetResponse, ResponseKind};
use crate::stats::{FetchStats, StatsSnapshot};
use crate::store::CacheStorage;

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, nothing run yet.
    Parsed,
    /// Install phase in progress.
    Installing,
    /// Install finished; waiting to activate.
    Installed,
    /// Activate phase in progress.
    Activating,
    /// Controlling pages; fetches are intercepted.
    Activated,
    /// A phase failed; install may be retried.
    Redundant,
}

impl LifecycleState {
    /// Lower-case name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        }
    }
}

/// Receives install progress. All methods default to no-ops.
pub trait PrecacheProgress: Send + Sync {
    /// Called once before any manifest entry is fetched.
    fn on_install_start(&self, _total: usize) {}

    /// Called when a manifest entry was stored.
    fn on_entry_cached(&self, _url: &str, _bytes: u64) {}

    /// Called when a manifest entry could not be cached.
    fn on_entry_failed(&self, _url: &str, _error: &str) {}
}

/// A progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl PrecacheProgress for NoProgress {}

/// A manifest entry that could not be pre-cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecacheFailure {
    /// Resolved URL of the entry.
    pub url: String,
    /// Why it failed.
    pub error: String,
}

/// Result of the install phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Version the entries were written to.
    pub version: String,
    /// Cached entries, in manifest order.
    pub cached: Vec<String>,
    /// Entries left out of the store, in manifest order.
    pub failed: Vec<PrecacheFailure>,
    /// Total body bytes written.
    pub bytes: u64,
    /// The new version activates without waiting for older instances.
    pub skip_waiting: bool,
}

/// Result of the activate phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    /// Stale stores removed.
    pub deleted: Vec<String>,
    /// Stale stores whose deletion failed.
    pub failed: Vec<String>,
    /// Open pages are controlled immediately rather than after reload.
    pub claim_clients: bool,
}

/// How an outgoing request was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not intercepted; the caller performs its normal network handling.
    Bypassed,
    /// Served from the current store without touching the network.
    FromCache(AssetResponse),
    /// Fetched from the network.
    FromNetwork {
        /// The response, returned to the caller unmodified.
        response: AssetResponse,
        /// Whether a copy was written to the store.
        stored: bool,
    },
}

impl FetchOutcome {
    /// The response to hand back, if the request was intercepted.
    #[must_use]
    pub const fn response(&self) -> Option<&AssetResponse> {
        match self {
            Self::Bypassed => None,
            Self::FromCache(response) | Self::FromNetwork { response, .. } => Some(response),
        }
    }

    /// Consumes the outcome, returning the response if intercepted.
    #[must_use]
    pub fn into_response(self) -> Option<AssetResponse> {
        match self {
            Self::Bypassed => None,
            Self::FromCache(response) | Self::FromNetwork { response, .. } => Some(response),
        }
    }
}

/// Versioned asset cache with service-worker lifecycle semantics.
pub struct AssetCacheManager<S: CacheStorage, N: Network> {
    config: CacheConfig,
    origin: Url,
    manifest: Vec<Url>,
    storage: S,
    network: N,
    state: Mutex<LifecycleState>,
    stats: FetchStats,
}

impl<S: CacheStorage, N: Network> AssetCacheManager<S, N> {
    /// Creates a manager for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a manifest entry
    /// cannot be resolved against the origin.
    pub fn new(config: CacheConfig, storage: S, network: N) -> Result<Self> {
        config.validate()?;
        let origin = config.origin_url()?;
        let manifest = config.manifest_urls()?;
        Ok(Self {
            config,
            origin,
            manifest,
            storage,
            network,
            state: Mutex::new(LifecycleState::Parsed),
            stats: FetchStats::new(),
        })
    }

    /// The configuration this manager was built with.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Name of the current cache store.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// The underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// The underlying network.
    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, next: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn transition(
        &self,
        allowed: &[LifecycleState],
        expected: &'static str,
        next: LifecycleState,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !allowed.contains(&*state) {
            return Err(Error::Lifecycle {
                expected,
                found: state.as_str(),
            });
        }
        *state = next;
        Ok(())
    }

    /// Picks up an already installed version after a restart: if the current
    /// store exists the manager goes straight to `Activated`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be queried.
    pub async fn resume(&self) -> Result<bool> {
        if !self.storage.has(&self.config.version).await? {
            return Ok(false);
        }
        self.transition(
            &[LifecycleState::Parsed, LifecycleState::Redundant],
            "parsed",
            LifecycleState::Activated,
        )?;
        log::info!("Resumed cache {}", self.config.version);
        Ok(true)
    }

    /// Install phase: opens the current store and pre-caches every manifest
    /// entry. Each entry is fetched independently; a failed entry is logged
    /// and left out without affecting the others or failing the phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager was already installed, or if the
    /// current store cannot be opened.
    pub async fn install(&self, progress: &dyn PrecacheProgress) -> Result<InstallReport> {
        self.transition(
            &[LifecycleState::Parsed, LifecycleState::Redundant],
            "parsed",
            LifecycleState::Installing,
        )?;
        let version = self.config.version.as_str();
        log::info!("Installing cache {version}");

        if let Err(e) = self.storage.open(version).await {
            log::error!("Failed to open cache {version}: {e}");
            self.set_state(LifecycleState::Redundant);
            return Err(e);
        }

        progress.on_install_start(self.manifest.len());
        let results: Vec<(&Url, Result<u64>)> = stream::iter(&self.manifest)
            .map(|url| async move {
                let result = self.precache(url).await;
                match &result {
                    Ok(bytes) => progress.on_entry_cached(url.as_str(), *bytes),
                    Err(e) => {
                        log::warn!("Failed to cache {url}: {e}");
                        progress.on_entry_failed(url.as_str(), &e.to_string());
                    }
                }
                (url, result)
            })
            .buffered(self.config.precache_concurrency)
            .collect()
            .await;

        let mut report = InstallReport {
            version: version.to_string(),
            cached: Vec::new(),
            failed: Vec::new(),
            bytes: 0,
            skip_waiting: true,
        };
        for (url, result) in results {
            match result {
                Ok(bytes) => {
                    report.cached.push(url.to_string());
                    report.bytes += bytes;
                }
                Err(e) => report.failed.push(PrecacheFailure {
                    url: url.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        self.stats
            .record_precache(report.cached.len() as u64, report.failed.len() as u64);
        self.set_state(LifecycleState::Installed);
        log::info!(
            "Cache {version} installed: {} cached, {} failed",
            report.cached.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn precache(&self, url: &Url) -> Result<u64> {
        let request = AssetRequest::new(url.clone());
        let response = self.network.fetch(&request).await?;
        if !response.is_ok() || response.kind == ResponseKind::Error {
            return Err(Error::Network(format!(
                "unexpected status {}",
                response.status
            )));
        }
        let bytes = response.body.len() as u64;
        self.storage
            .put(&self.config.version, &request.cache_key(), response)
            .await?;
        Ok(bytes)
    }

    /// Activate phase: deletes every store whose name is not the current
    /// version. Deletions run concurrently and individual failures are logged.
    ///
    /// An already active manager (e.g. after [`resume`](Self::resume)) may
    /// run the phase again; it keeps intercepting fetches meanwhile.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager is neither installed nor active, or if
    /// the store names cannot be listed.
    pub async fn activate(&self) -> Result<ActivateReport> {
        let reactivating = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                LifecycleState::Activated => true,
                LifecycleState::Installed => {
                    *state = LifecycleState::Activating;
                    false
                }
                other => {
                    return Err(Error::Lifecycle {
                        expected: "installed",
                        found: other.as_str(),
                    });
                }
            }
        };
        let version = self.config.version.as_str();

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                log::error!("Failed to list caches: {e}");
                if !reactivating {
                    self.set_state(LifecycleState::Redundant);
                }
                return Err(e);
            }
        };

        let stale = names.into_iter().filter(|name| name != version);
        let results = future::join_all(stale.map(|name| async move {
            log::info!("Deleting stale cache {name}");
            let result = self.storage.delete(&name).await;
            (name, result)
        }))
        .await;

        let mut report = ActivateReport {
            deleted: Vec::new(),
            failed: Vec::new(),
            claim_clients: true,
        };
        for (name, result) in results {
            match result {
                Ok(_) => report.deleted.push(name),
                Err(e) => {
                    log::warn!("Failed to delete cache {name}: {e}");
                    report.failed.push(name);
                }
            }
        }

        self.set_state(LifecycleState::Activated);
        log::info!("Cache {version} activated");
        Ok(report)
    }

    /// Whether `request` is subject to the cache-or-network strategy.
    #[must_use]
    pub fn intercepts(&self, request: &AssetRequest) -> bool {
        self.state() == LifecycleState::Activated
            && (request.is_same_origin(&self.origin)
                || request.path_has_extension(&self.config.intercept_extensions))
    }

    /// Handles an outgoing request from a controlled page.
    ///
    /// Cache hits are authoritative. On a miss the network response is
    /// returned as-is; a copy is stored only for a `200` non-error `GET`
    /// response whose path carries a cacheable extension.
    ///
    /// # Errors
    ///
    /// Propagates the network failure when nothing was cached and no response
    /// could be fetched.
    pub async fn handle_fetch(&self, request: &AssetRequest) -> Result<FetchOutcome> {
        if !self.intercepts(request) {
            self.stats.record_bypass();
            return Ok(FetchOutcome::Bypassed);
        }

        let version = self.config.version.as_str();
        let key = request.cache_key();
        match self.storage.match_entry(version, &key).await {
            Ok(Some(response)) => {
                log::debug!("Serving from cache: {request}");
                self.stats.record_hit();
                return Ok(FetchOutcome::FromCache(response));
            }
            Ok(None) => {}
            Err(e) => log::warn!("Cache lookup failed for {request}: {e}"),
        }
        self.stats.record_miss();

        let response = match self.network.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Network request failed: {request}: {e}");
                self.stats.record_network_error();
                return Err(e);
            }
        };

        if !response.is_cacheable()
            || !request.is_get()
            || !request.path_has_extension(&self.config.cacheable_extensions)
        {
            return Ok(FetchOutcome::FromNetwork {
                response,
                stored: false,
            });
        }

        let stored = match self.storage.put(version, &key, response.clone()).await {
            Ok(()) => {
                log::info!("Cached {request}");
                self.stats.record_stored();
                true
            }
            Err(e) => {
                log::warn!("Failed to cache {request}: {e}");
                false
            }
        };
        Ok(FetchOutcome::FromNetwork { response, stored })
    }

    /// Deletes every cache store, current version included. Returns the names
    /// that were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store names cannot be listed.
    pub async fn purge_all(&self) -> Result<Vec<String>> {
        let names = self.storage.keys().await?;
        let results = future::join_all(names.into_iter().map(|name| async move {
            log::info!("Clearing cache {name}");
            let result = self.storage.delete(&name).await;
            (name, result)
        }))
        .await;

        Ok(results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(_) => Some(name),
                Err(e) => {
                    log::warn!("Failed to clear cache {name}: {e}");
                    None
                }
            })
            .collect())
    }

    /// Handles a control message. `ClearCache` deletes every store and then
    /// sends exactly one reply on `reply`; other messages are ignored.
    pub async fn handle_message(
        &self,
        message: ControlMessage,
        reply: Option<ReplyPort>,
    ) -> Option<MessageReply> {
        match message {
            ControlMessage::ClearCache => {
                let success = match self.purge_all().await {
                    Ok(deleted) => {
                        log::info!("All caches cleared ({} stores)", deleted.len());
                        true
                    }
                    Err(e) => {
                        log::error!("Failed to clear caches: {e}");
                        false
                    }
                };
                let ack = MessageReply { success };
                if let Some(port) = reply {
                    if port.send(ack).is_err() {
                        log::debug!("Reply channel closed before acknowledgment");
                    }
                }
                Some(ack)
            }
            ControlMessage::Unknown => {
                log::debug!("Ignoring unknown control message");
                None
            }
        }
    }
}
