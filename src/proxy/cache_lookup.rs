//! Cache lookup stage: replay a stored response or let the request through
//!
//! Lookups fail open. Any store error is logged and the request is forwarded
//! as if the cache were empty, so a broken backend degrades the proxy to a
//! plain pass-through instead of failing clients.

use crate::domain::{CacheEntry, CacheKey};
use crate::infrastructure::store::{
    collections, filter_eq, from_document, DocumentStore, StoreResult,
};
use crate::proxy::context::RequestContext;
use crate::proxy::headers::is_hop_by_hop;
use axum::body::Body;
use axum::response::Response;
use http::StatusCode;
use tracing::{debug, warn};

/// Result of checking the cache for one request
#[derive(Debug)]
pub enum LookupOutcome {
    Hit(Box<CacheEntry>),
    Miss,
    /// Store missing or failing; treated as a miss by the pipeline
    Unavailable,
}

/// Most recently stored entry for `url`, matched on exact string equality
pub async fn lookup(store: &dyn DocumentStore, url: &CacheKey) -> StoreResult<Option<CacheEntry>> {
    store
        .find_latest(collections::CACHE, &filter_eq("url", url.as_ref()))
        .await?
        .map(from_document::<CacheEntry>)
        .transpose()
}

/// Runs the lookup for the current request and logs the decision
pub async fn check(ctx: &RequestContext) -> LookupOutcome {
    let Some(store) = ctx.store() else {
        debug!(request_id = %ctx.request_id, url = %ctx.url, "No store connection, skipping cache");
        return LookupOutcome::Unavailable;
    };

    match lookup(store, &ctx.url).await {
        Ok(Some(entry)) => {
            debug!(request_id = %ctx.request_id, url = %ctx.url, "~> HIT");
            LookupOutcome::Hit(Box::new(entry))
        }
        Ok(None) => {
            debug!(request_id = %ctx.request_id, url = %ctx.url, "~> MISS");
            LookupOutcome::Miss
        }
        Err(e) => {
            warn!(
                request_id = %ctx.request_id,
                url = %ctx.url,
                error = %e,
                "Error reading cache, forwarding upstream"
            );
            LookupOutcome::Unavailable
        }
    }
}

/// Builds the client response for a cache hit: stored headers and body, status 200
pub fn replay(entry: &CacheEntry) -> StoreResult<Response> {
    let body = entry.body.decode()?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    for (name, value) in entry.headers.to_header_map() {
        if let Some(name) = name {
            if !is_hop_by_hop(&name) {
                headers.append(name, value);
            }
        }
    }

    Ok(response)
}
