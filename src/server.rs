//! HTTP proxy that serves the game through the asset cache.
//!
//! Every request keeps only its path and query and is sent to the configured
//! origin through [`AssetCacheManager::handle_fetch`]. Requests the manager
//! does not intercept are fetched straight from the network. Control
//! endpoints live under [`CONTROL_PREFIX`].
//!
//! The proxy forwards neither request bodies nor request headers, so it only
//! answers `GET` and `HEAD`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::Result;
use crate::manager::{AssetCacheManager, LifecycleState};
use crate::message::{ControlMessage, reply_channel};
use crate::network::Network;
use crate::request::AssetRequest;
use crate::response::{AssetResponse, ResponseKind};
use crate::stats::StatsSnapshot;
use crate::store::CacheStorage;

/// Path prefix of the control endpoints.
pub const CONTROL_PREFIX: &str = "/__asset-cache";

/// Response headers that describe the upstream connection, not the asset.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

struct AppState<S: CacheStorage, N: Network> {
    manager: Arc<AssetCacheManager<S, N>>,
}

impl<S: CacheStorage, N: Network> Clone for AppState<S, N> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    state: LifecycleState,
    stats: StatsSnapshot,
}

async fn api_health<S, N>(State(state): State<AppState<S, N>>) -> impl IntoResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    axum::Json(HealthResponse {
        status: "ok",
        version: state.manager.version().to_string(),
        state: state.manager.state(),
        stats: state.manager.stats(),
    })
}

async fn api_message<S, N>(State(state): State<AppState<S, N>>, body: String) -> Response
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let message = ControlMessage::from_json(&body);
    let (port, rx) = reply_channel();
    if state.manager.handle_message(message, Some(port)).await.is_none() {
        return StatusCode::NO_CONTENT.into_response();
    }
    match rx.await {
        Ok(reply) => axum::Json(reply).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Maps a proxied path and query onto `origin`. The authority of `uri` is
/// never used, so a path such as `//other.host/x` stays on the origin.
fn resolve_on_origin(origin: &url::Url, uri: &Uri) -> url::Url {
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

fn bad_gateway(error: &crate::Error) -> Response {
    (StatusCode::BAD_GATEWAY, format!("upstream fetch failed: {error}")).into_response()
}

fn into_http_response(asset: AssetResponse) -> Response {
    if asset.kind == ResponseKind::Error {
        return (StatusCode::BAD_GATEWAY, "upstream network error").into_response();
    }
    let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response = Response::new(Body::from(asset.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in asset.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    response
}

async fn proxy<S, N>(State(state): State<AppState<S, N>>, method: Method, uri: Uri) -> Response
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    let manager = &state.manager;
    let request = match manager
        .config()
        .origin_url()
        .and_then(|origin| {
            AssetRequest::parse(method.as_str(), resolve_on_origin(&origin, &uri).as_str())
        })
    {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match manager.handle_fetch(&request).await {
        Ok(outcome) => match outcome.into_response() {
            Some(asset) => into_http_response(asset),
            None => match manager.network().fetch(&request).await {
                Ok(asset) => into_http_response(asset),
                Err(e) => bad_gateway(&e),
            },
        },
        Err(e) => bad_gateway(&e),
    }
}

/// Builds the proxy router for `manager`.
pub fn router<S, N>(manager: Arc<AssetCacheManager<S, N>>) -> Router
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&format!("{CONTROL_PREFIX}/health"), get(api_health::<S, N>))
        .route(&format!("{CONTROL_PREFIX}/message"), post(api_message::<S, N>))
        .fallback(proxy::<S, N>)
        .layer(cors)
        .with_state(AppState { manager })
}

/// Binds the listener for the proxy.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| crate::Error::Config(format!("invalid bind address {host}:{port}: {e}")))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serves the proxy on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<S, N>(
    listener: TcpListener,
    manager: Arc<AssetCacheManager<S, N>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Serving cache {} on http://{addr}", manager.version());
    }
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Proxy stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::CacheConfig;
    use crate::manager::NoProgress;
    use crate::store::MemoryStorage;

    struct UpstreamStub;

    #[async_trait]
    impl Network for UpstreamStub {
        async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse> {
            match request.path() {
                "/down.glb" => Err(crate::Error::Network("offline".to_string())),
                "/missing.html" => Ok(AssetResponse::new(404, "nope")),
                path => Ok(AssetResponse::new(200, format!("asset {path}"))
                    .with_header("Content-Type", "application/octet-stream")
                    .with_header("Connection", "close")),
            }
        }
    }

    type TestManager = AssetCacheManager<MemoryStorage, UpstreamStub>;

    async fn spawn_proxy() -> (String, Arc<TestManager>, CancellationToken) {
        let config = CacheConfig::new()
            .with_version("v1")
            .with_origin("http://game.test")
            .with_manifest(["/index.html"]);
        let manager = Arc::new(
            AssetCacheManager::new(config, MemoryStorage::new(), UpstreamStub).unwrap(),
        );
        manager.install(&NoProgress).await.unwrap();
        manager.activate().await.unwrap();

        let listener = bind("127.0.0.1", 0).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, Arc::clone(&manager), shutdown.clone()));
        (base, manager, shutdown)
    }

    #[tokio::test]
    async fn proxies_through_cache() {
        let (base, manager, shutdown) = spawn_proxy().await;
        let client = reqwest::Client::new();

        let first = client.get(format!("{base}/assets/model/a.glb")).send().await.unwrap();
        assert_eq!(first.status(), 200);
        assert_eq!(
            first.headers().get("content-type").unwrap(),
            "application/octet-stream"
        );
        assert_eq!(first.text().await.unwrap(), "asset /assets/model/a.glb");

        let second = client.get(format!("{base}/assets/model/a.glb")).send().await.unwrap();
        assert_eq!(second.text().await.unwrap(), "asset /assets/model/a.glb");

        let index = client.get(format!("{base}/index.html")).send().await.unwrap();
        assert_eq!(index.text().await.unwrap(), "asset /index.html");

        let stats = manager.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stored, 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn upstream_errors_pass_through() {
        let (base, manager, shutdown) = spawn_proxy().await;
        let client = reqwest::Client::new();

        let missing = client.get(format!("{base}/missing.html")).send().await.unwrap();
        assert_eq!(missing.status(), 404);

        let down = client.get(format!("{base}/down.glb")).send().await.unwrap();
        assert_eq!(down.status(), 502);

        assert_eq!(
            manager.storage().entry_keys("v1").await.unwrap(),
            vec!["GET http://game.test/index.html"]
        );
        shutdown.cancel();
    }

    #[tokio::test]
    async fn scheme_relative_paths_stay_on_origin() {
        let (base, manager, shutdown) = spawn_proxy().await;

        let response = reqwest::get(format!("{base}//other.host/x.glb")).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "asset //other.host/x.glb");

        let keys = manager.storage().entry_keys("v1").await.unwrap();
        assert!(keys.iter().all(|k| k.starts_with("GET http://game.test/")));
        assert!(keys.contains(&"GET http://game.test//other.host/x.glb".to_string()));
        shutdown.cancel();
    }

    #[test]
    fn resolution_keeps_query_and_drops_authority() {
        let origin = url::Url::parse("http://game.test:8080/").unwrap();
        let uri: Uri = "http://other.host/assets/a.glb?rev=2".parse().unwrap();
        assert_eq!(
            resolve_on_origin(&origin, &uri).as_str(),
            "http://game.test:8080/assets/a.glb?rev=2"
        );
    }

    #[tokio::test]
    async fn methods_with_bodies_are_refused() {
        let (base, manager, shutdown) = spawn_proxy().await;
        let response = reqwest::Client::new()
            .post(format!("{base}/index.html"))
            .body("payload")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 405);
        assert_eq!(response.headers().get("allow").unwrap(), "GET, HEAD");
        assert_eq!(manager.stats().misses, 0);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn message_endpoint_clears_caches() {
        let (base, manager, shutdown) = spawn_proxy().await;
        let client = reqwest::Client::new();
        let url = format!("{base}{CONTROL_PREFIX}/message");

        let ignored = client
            .post(&url)
            .body(r#"{"type":"PING"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(ignored.status(), 204);
        assert!(manager.storage().has("v1").await.unwrap());

        let cleared = client
            .post(&url)
            .body(r#"{"type":"CLEAR_CACHE"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(cleared.status(), 200);
        assert_eq!(cleared.text().await.unwrap(), r#"{"success":true}"#);
        assert!(manager.storage().keys().await.unwrap().is_empty());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn health_reports_state_and_stats() {
        let (base, _manager, shutdown) = spawn_proxy().await;
        let text = reqwest::get(format!("{base}{CONTROL_PREFIX}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], "v1");
        assert_eq!(body["state"], "activated");
        assert_eq!(body["stats"]["precached"], 1);
        shutdown.cancel();
    }
}
