//! Proxy module for the caching reverse proxy
//!
//! Each request flows through small stages that share a [`context::RequestContext`]:
//! - Cache lookup: replay a stored `200 OK` for the same URL
//! - Forwarding: route by path prefix and relay upstream
//! - Response capture: tee the streamed body and persist it once complete
//! - Request capture: record non-GET request bodies in the background

pub mod cache_lookup;
pub mod context;
pub mod error_response;
pub mod forwarder;
pub mod headers;
pub mod middleware;
pub mod request_capture;
pub mod response_capture;
pub mod router;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;


pub use service::ProxyService;
pub use types::{ProxyConfig, ProxyError, ProxyResult};
