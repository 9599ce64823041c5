//! Captured responses stored in and served from cache stores.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How a response was obtained, mirroring the fetch response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response.
    Basic,
    /// Cross-origin response with readable body.
    Cors,
    /// Cross-origin response with hidden status and body.
    Opaque,
    /// Network-level error marker.
    Error,
}

/// Snapshot of a response: status, headers and body bytes.
///
/// Cloning shares the body buffer, so a clone is how one copy goes back to the
/// page while another is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs, in received order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
    /// Response type.
    pub kind: ResponseKind,
}

impl AssetResponse {
    /// Creates a `Basic` response with no headers.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    /// Creates a network-error marker response (status 0, empty body).
    #[must_use]
    pub const fn error() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
            kind: ResponseKind::Error,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the response kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    /// Returns the first header value matching `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Whether this response may be written to a cache store at fetch time:
    /// status exactly 200 and not a network-error marker.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind != ResponseKind::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_marker_is_never_cacheable() {
        let resp = AssetResponse::error();
        assert!(!resp.is_ok());
        assert!(!resp.is_cacheable());

        let odd = AssetResponse::new(200, "x").with_kind(ResponseKind::Error);
        assert!(!odd.is_cacheable());
    }

    #[test]
    fn only_status_200_is_cacheable() {
        assert!(AssetResponse::new(200, "ok").is_cacheable());
        assert!(AssetResponse::new(200, "ok").with_kind(ResponseKind::Cors).is_cacheable());
        assert!(!AssetResponse::new(204, "").is_cacheable());
        assert!(AssetResponse::new(204, "").is_ok());
        assert!(!AssetResponse::new(500, "boom").is_cacheable());
        assert!(!AssetResponse::new(404, "").is_ok());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let resp = AssetResponse::new(200, "")
            .with_header("Content-Type", "model/gltf-binary")
            .with_header("ETag", "\"abc\"");
        assert_eq!(resp.header("content-type"), Some("model/gltf-binary"));
        assert_eq!(resp.header("etag"), Some("\"abc\""));
        assert_eq!(resp.header("missing"), None);
    }

    #[test]
    fn clone_shares_body() {
        let resp = AssetResponse::new(200, Bytes::from_static(b"mesh"));
        let copy = resp.clone();
        assert_eq!(resp.body.as_ptr(), copy.body.as_ptr());
    }
}
