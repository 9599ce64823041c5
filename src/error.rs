//! Error types for the asset-cache library.

use thiserror::Error;

/// Errors that can occur while managing the asset cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Network request failed before a response was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A network backend reported a failure that is not a `reqwest` error.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O error during cache storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL could not be parsed or resolved against the origin.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Cache storage reported a failure.
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// Configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A lifecycle phase was requested out of order.
    #[error("Lifecycle error: expected {expected}, found {found}")]
    Lifecycle {
        /// State the operation requires.
        expected: &'static str,
        /// State the manager is actually in.
        found: &'static str,
    },

    /// TOML deserialization failed.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for asset-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
