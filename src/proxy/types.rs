//! Type definitions for the proxy module

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ========== Routing Types ==========

/// Upstream base URL a route forwards to
#[nutype(
    validate(predicate = |s: &str| s.starts_with("http://") || s.starts_with("https://")),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct TargetUrl(String);

/// Literal path prefix a route matches on
#[nutype(
    validate(predicate = |s: &str| s.starts_with('/')),
    derive(Clone, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct PathPrefix(String);

/// One `{from, to}` routing rule; rules are evaluated in declaration order
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteRule {
    pub from: PathPrefix,
    pub to: TargetUrl,
}

impl RouteRule {
    pub fn new(from: PathPrefix, to: TargetUrl) -> Self {
        Self { from, to }
    }
}

// ========== Size Types ==========

/// Maximum size for inbound request bodies in bytes
#[nutype(
    validate(predicate = |size: &usize| *size > 0),
    derive(Clone, Copy, Debug, Display, PartialEq, Eq, Deserialize, Serialize, TryFrom, AsRef)
)]
pub struct RequestSizeLimit(usize);

// ========== Constants ==========

pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Proxy configuration, built once at startup and shared read-only
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Ordered routing rules; first prefix match wins
    pub routes: Vec<RouteRule>,
    /// Where unmatched paths go. `None` turns them into `RouteNotFound`.
    pub default_target: Option<TargetUrl>,
    /// Validate upstream TLS certificates
    pub verify_tls: bool,
    /// Time allowed for the upstream to answer with headers
    pub request_timeout: Duration,
    pub max_request_size: RequestSizeLimit,
    /// Persist non-GET requests to the `requests` collection
    pub capture_requests: bool,
    /// Add `x-replay-cache: HIT|MISS` to responses
    pub cache_status_header: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            default_target: None,
            verify_tls: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_request_size: RequestSizeLimit::try_new(DEFAULT_MAX_REQUEST_SIZE)
                .expect("10MB is valid"),
            capture_requests: true,
            cache_status_header: true,
        }
    }
}

/// Errors that can occur in the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("No route matches path: {path}")]
    RouteNotFound { path: String },

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timeout after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Invalid upstream URL: {0}")]
    InvalidUpstreamUrl(String),

    #[error("Request too large (max: {max_size} bytes)")]
    RequestTooLarge { max_size: RequestSizeLimit },

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] http::Error),

    #[error("Failed to build upstream client: {0}")]
    ClientBuild(String),
}

impl ProxyError {
    pub fn from_upstream(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::UpstreamTimeout(timeout)
        } else {
            Self::UpstreamUnreachable(error.to_string())
        }
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_url_requires_http_scheme() {
        assert!(TargetUrl::try_new("https://api.example.com".to_string()).is_ok());
        assert!(TargetUrl::try_new("http://localhost:9000".to_string()).is_ok());

        assert!(TargetUrl::try_new("not-a-url".to_string()).is_err());
        assert!(TargetUrl::try_new("ftp://example.com".to_string()).is_err());
        assert!(TargetUrl::try_new(String::new()).is_err());
    }

    #[test]
    fn path_prefix_must_be_absolute() {
        assert!(PathPrefix::try_new("/api".to_string()).is_ok());
        assert!(PathPrefix::try_new("/".to_string()).is_ok());
        assert!(PathPrefix::try_new("api".to_string()).is_err());
    }

    #[test]
    fn route_rules_deserialize_with_validation() {
        let rule: RouteRule =
            serde_json::from_str(r#"{"from": "/svc", "to": "http://localhost:9000"}"#).unwrap();
        assert_eq!(rule.from.as_ref(), "/svc");
        assert_eq!(rule.to.as_ref(), "http://localhost:9000");

        let bad = serde_json::from_str::<RouteRule>(r#"{"from": "svc", "to": "http://x"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn proxy_config_defaults() {
        let config = ProxyConfig::default();

        assert!(config.routes.is_empty());
        assert!(config.default_target.is_none());
        assert!(!config.verify_tls);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(*config.max_request_size.as_ref(), 10 * 1024 * 1024);
        assert!(config.capture_requests);
        assert!(config.cache_status_header);
    }
}
