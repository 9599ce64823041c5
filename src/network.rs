//! Network abstraction for testability.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::request::AssetRequest;
use crate::response::{AssetResponse, ResponseKind};

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Performs requests that miss the cache.
///
/// A response with any status is `Ok`; `Err` means no response was received
/// at all (offline, DNS failure, connection reset).
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetches `request` from the network.
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse>;
}

/// Network implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    origin: Url,
}

impl HttpNetwork {
    /// Creates a network whose responses are `Basic` for `origin` and `Cors`
    /// for everything else.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(origin: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, origin })
    }

    /// Creates a network from an existing client, sharing its pool.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, origin: Url) -> Self {
        Self { client, origin }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
        let method = reqwest::Method::from_bytes(request.method().as_bytes())
            .map_err(|e| crate::Error::Network(format!("invalid method {}: {e}", request.method())))?;

        let response = self
            .client
            .request(method, request.url().clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let kind = if request.is_same_origin(&self.origin) {
            ResponseKind::Basic
        } else {
            ResponseKind::Cors
        };
        let body = response.bytes().await?;

        log::debug!("Fetched {request} -> {status} ({} bytes)", body.len());
        Ok(AssetResponse {
            status,
            headers,
            body,
            kind,
        })
    }
}
