//! HTTP header constants and utilities for the proxy service
//!
//! This module centralizes the header names the proxy adds or strips so the
//! forwarding, replay and middleware code agree on them.

use ::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use derive_more::Display;

/// Header name for request ID used for tracing and correlation
pub const X_REQUEST_ID: &str = "x-request-id";

/// Diagnostic header telling the client whether the response came from this proxy's cache.
/// Distinct from `x-cache` so an upstream or CDN value passes through untouched.
pub const X_REPLAY_CACHE: &str = "x-replay-cache";

/// Standard header re-exports for convenience
pub use header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};

/// Connection-scoped headers that must not travel across the proxy
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a response was replayed from the store or fetched upstream
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum CacheStatus {
    #[display("HIT")]
    Hit,
    #[display("MISS")]
    Miss,
}

impl CacheStatus {
    pub fn header_value(self) -> HeaderValue {
        match self {
            Self::Hit => HeaderValue::from_static("HIT"),
            Self::Miss => HeaderValue::from_static("MISS"),
        }
    }
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Removes hop-by-hop headers, including any listed in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
