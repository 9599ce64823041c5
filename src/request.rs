//! Request identity used for interception decisions and cache keys.

use std::fmt;

use url::Url;

use crate::error::Result;

/// An outgoing request from a controlled page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    method: String,
    url: Url,
}

impl AssetRequest {
    /// Creates a `GET` request for an already parsed URL.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
        }
    }

    /// Creates a `GET` request, parsing `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute URL.
    pub fn get(url: &str) -> Result<Self> {
        Self::parse("GET", url)
    }

    /// Creates a request with an arbitrary method, parsing `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute URL.
    pub fn parse(method: &str, url: &str) -> Result<Self> {
        Ok(Self {
            method: method.to_ascii_uppercase(),
            url: Url::parse(url)?,
        })
    }

    /// The upper-cased request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The full request URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The URL path, without query or fragment.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Whether this is a `GET` request. Only `GET` responses are stored.
    #[must_use]
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    /// Normalized identity used as the cache entry key: method plus URL with
    /// the fragment removed.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Whether the request targets the same origin as `origin`.
    #[must_use]
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    /// Whether the URL path ends with any of `extensions` (ASCII
    /// case-insensitive). The query string is not considered.
    #[must_use]
    pub fn path_has_extension<S: AsRef<str>>(&self, extensions: &[S]) -> bool {
        path_has_extension(self.path(), extensions)
    }
}

impl fmt::Display for AssetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Suffix match of `path` against `extensions`, ignoring ASCII case.
#[must_use]
pub fn path_has_extension<S: AsRef<str>>(path: &str, extensions: &[S]) -> bool {
    let path = path.as_bytes();
    extensions.iter().any(|ext| {
        let ext = ext.as_ref().as_bytes();
        !ext.is_empty()
            && path.len() >= ext.len()
            && path[path.len() - ext.len()..].eq_ignore_ascii_case(ext)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_drops_fragment_keeps_query() {
        let req = AssetRequest::get("https://game.example/a.glb?v=2#part").unwrap();
        assert_eq!(req.cache_key(), "GET https://game.example/a.glb?v=2");
    }

    #[test]
    fn method_is_upper_cased() {
        let req = AssetRequest::parse("post", "https://game.example/api").unwrap();
        assert_eq!(req.method(), "POST");
        assert!(!req.is_get());
        assert_eq!(req.cache_key(), "POST https://game.example/api");
    }

    #[test]
    fn same_origin_compares_scheme_host_port() {
        let origin = Url::parse("http://localhost:8080/").unwrap();
        let same = AssetRequest::get("http://localhost:8080/index.html").unwrap();
        let other_port = AssetRequest::get("http://localhost:9090/index.html").unwrap();
        let other_scheme = AssetRequest::get("https://localhost:8080/index.html").unwrap();

        assert!(same.is_same_origin(&origin));
        assert!(!other_port.is_same_origin(&origin));
        assert!(!other_scheme.is_same_origin(&origin));
    }

    #[test]
    fn extension_match_ignores_query_and_case() {
        let req = AssetRequest::get("https://cdn.example/models/Pan.GLB?token=abc.js").unwrap();
        assert!(req.path_has_extension(&[".glb"]));
        assert!(!req.path_has_extension(&[".js"]));
    }

    #[test]
    fn extension_match_on_encoded_path() {
        let req = AssetRequest::get("http://localhost:8080/assets/model/番茄.glb").unwrap();
        assert!(req.path_has_extension(&[".fbx", ".glb"]));
    }

    #[test]
    fn root_path_has_no_extension() {
        let req = AssetRequest::get("http://localhost:8080/").unwrap();
        assert!(!req.path_has_extension(&[".html", ".js"]));
    }

    #[test]
    fn relative_url_is_rejected() {
        assert!(AssetRequest::get("/index.html").is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn appended_extension_always_matches(stem in "[a-zA-Z0-9_/-]{0,40}", ext in "\\.[a-z]{1,5}") {
                let path = format!("/{stem}{ext}");
                prop_assert!(path_has_extension(&path, &[ext.to_uppercase()]));
            }

            #[test]
            fn path_matching_never_panics(path in "\\PC{0,64}", ext in "\\PC{0,8}") {
                let _ = path_has_extension(&path, &[ext]);
            }
        }
    }
}
