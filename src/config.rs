//! Configuration for the asset cache manager and its host application.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "ASSET_CACHE_CONFIG";

/// Version identifier of the shipped game assets.
pub const DEFAULT_VERSION: &str = "vr-cooking-game-v1.0";

/// Origin the game is served from during local development.
pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Assets pre-cached on install, in order.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/assets/js/music-control.js",
    // scene
    "/assets/model/kitchen/Meshy_AI_Neon_Kitchen_Lines_1218020425_texture.fbx",
    "/assets/model/砧板.glb",
    "/assets/model/盤子.glb",
    // tomato and egg ingredients
    "/assets/model/番茄.glb",
    "/assets/model/雞蛋.glb",
    "/assets/model/調味罐.glb",
    "/assets/model/醬油罐.glb",
    "/assets/model/蔥花.glb",
    "/assets/model/半成品.glb",
    "/assets/model/成品.glb",
    "/assets/model/番茄塊.glb",
    "/assets/model/蛋液.glb",
    "/assets/model/白色陶瓷碗.glb",
    "/assets/model/平底鍋.glb",
    "/assets/model/鍋鏟.fbx",
];

/// Suffixes persisted when observed at fetch time.
pub const DEFAULT_CACHEABLE_EXTENSIONS: &[&str] = &[".glb", ".fbx", ".html", ".js"];

/// 3D-model suffixes intercepted even when cross-origin.
pub const DEFAULT_INTERCEPT_EXTENSIONS: &[&str] = &[".glb", ".fbx"];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Configuration injected into [`AssetCacheManager`](crate::AssetCacheManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the one current cache store. Bump on every deploy that
    /// changes the manifest or served asset bytes.
    pub version: String,
    /// Origin of the controlled pages.
    pub origin: String,
    /// Paths (or absolute URLs) pre-cached on install.
    pub manifest: Vec<String>,
    /// Suffixes stored on a successful runtime fetch.
    pub cacheable_extensions: Vec<String>,
    /// Suffixes intercepted regardless of origin.
    pub intercept_extensions: Vec<String>,
    /// Maximum number of manifest fetches in flight during install.
    pub precache_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            manifest: owned(DEFAULT_MANIFEST),
            cacheable_extensions: owned(DEFAULT_CACHEABLE_EXTENSIONS),
            intercept_extensions: owned(DEFAULT_INTERCEPT_EXTENSIONS),
            precache_concurrency: 8,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the version identifier.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the origin of the controlled pages.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Replaces the install manifest.
    #[must_use]
    pub fn with_manifest<I, T>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the runtime cacheable-extension allowlist.
    #[must_use]
    pub fn with_cacheable_extensions<I, T>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.cacheable_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the cross-origin intercept extensions.
    #[must_use]
    pub fn with_intercept_extensions<I, T>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.intercept_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Sets how many manifest entries are fetched at once during install.
    #[must_use]
    pub const fn with_precache_concurrency(mut self, concurrency: usize) -> Self {
        self.precache_concurrency = concurrency;
        self
    }

    /// Parses the configured origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not an absolute http(s) URL.
    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "origin must be an http(s) base URL, got {}",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Resolves every manifest entry against the origin, keeping order.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin or any entry cannot be parsed.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        let origin = self.origin_url()?;
        self.manifest
            .iter()
            .map(|entry| origin.join(entry).map_err(Error::from))
            .collect()
    }

    /// Checks the configuration for values the manager cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::Config("version must not be empty".to_string()));
        }
        self.origin_url()?;
        if self.precache_concurrency == 0 {
            return Err(Error::Config(
                "precache_concurrency must be at least 1".to_string(),
            ));
        }
        let extensions = self
            .cacheable_extensions
            .iter()
            .chain(&self.intercept_extensions);
        for ext in extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                return Err(Error::Config(format!(
                    "extension {ext:?} must start with '.'"
                )));
            }
        }
        Ok(())
    }
}

/// Locations of durable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root directory holding one subdirectory per cache store.
    pub store_dir: PathBuf,
    /// Directory holding the config file and client preferences.
    pub config_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            store_dir: cache_dir.join("asset-cache").join("stores"),
            config_dir: config_dir.join("asset-cache"),
        }
    }
}

/// Proxy server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9780,
        }
    }
}

/// Complete application configuration, stored as TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Cache manager settings.
    pub cache: CacheConfig,
    /// Storage locations.
    pub paths: PathConfig,
    /// Proxy server settings.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Returns the config file path, honouring [`CONFIG_ENV`].
    #[must_use]
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV).map_or_else(
            || PathConfig::default().config_dir.join("config.toml"),
            PathBuf::from,
        )
    }

    /// Loads the config at `path`, writing a default template if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or created, or if
    /// the resulting cache configuration is invalid.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&contents)?
        } else {
            let config = Self::default();
            config.save(path)?;
            log::info!("Wrote default config to {}", path.display());
            config
        };
        config.cache.validate()?;
        Ok(config)
    }

    /// Saves the config atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_cache_config() {
        let config = CacheConfig::default();
        assert_eq!(config.version, "vr-cooking-game-v1.0");
        assert_eq!(config.manifest.len(), 18);
        assert_eq!(config.manifest[0], "/");
        assert_eq!(config.intercept_extensions, vec![".glb", ".fbx"]);
        assert!(config.cacheable_extensions.contains(&".html".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = CacheConfig::new()
            .with_version("v2")
            .with_origin("https://game.example")
            .with_manifest(["/a.glb", "/b.html"])
            .with_cacheable_extensions([".glb"])
            .with_intercept_extensions([".gltf"])
            .with_precache_concurrency(2);

        assert_eq!(config.version, "v2");
        assert_eq!(config.origin, "https://game.example");
        assert_eq!(config.manifest, vec!["/a.glb", "/b.html"]);
        assert_eq!(config.cacheable_extensions, vec![".glb"]);
        assert_eq!(config.intercept_extensions, vec![".gltf"]);
        assert_eq!(config.precache_concurrency, 2);
    }

    #[test]
    fn manifest_urls_resolve_against_origin() {
        let config = CacheConfig::new()
            .with_origin("https://game.example")
            .with_manifest(["/", "/assets/model/番茄.glb", "https://cdn.example/x.fbx"]);
        let urls = config.manifest_urls().unwrap();

        assert_eq!(urls[0].as_str(), "https://game.example/");
        assert!(urls[1].path().ends_with(".glb"));
        assert!(urls[1].path().starts_with("/assets/model/%E7%95%AA"));
        assert_eq!(urls[2].as_str(), "https://cdn.example/x.fbx");
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(CacheConfig::new().with_version("  ").validate().is_err());
        assert!(CacheConfig::new().with_origin("ftp://x").validate().is_err());
        assert!(CacheConfig::new().with_origin("not a url").validate().is_err());
        assert!(
            CacheConfig::new()
                .with_precache_concurrency(0)
                .validate()
                .is_err()
        );
        assert!(
            CacheConfig::new()
                .with_cacheable_extensions(["glb"])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9780);
    }

    #[test]
    fn default_path_config() {
        let config = PathConfig::default();
        assert!(config.store_dir.to_string_lossy().contains("asset-cache"));
        assert!(config.config_dir.to_string_lossy().contains("asset-cache"));
    }

    #[test]
    fn load_or_create_writes_template() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, AppConfig::default());

        let reloaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(reloaded, created);
    }

    #[test]
    fn load_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[cache]\nversion = \"v9\"\nmanifest = [\"/index.html\"]\n\n[server]\nport = 1234\n",
        )
        .unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config.cache.version, "v9");
        assert_eq!(config.cache.manifest, vec!["/index.html"]);
        assert_eq!(config.cache.origin, DEFAULT_ORIGIN);
        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn load_rejects_invalid_cache_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nversion = \"\"\n").unwrap();

        assert!(matches!(
            AppConfig::load_or_create(&path),
            Err(Error::Config(_))
        ));
    }
}
