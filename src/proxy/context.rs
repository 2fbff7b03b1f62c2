//! Per-request state threaded through the pipeline stages

use crate::domain::{CacheKey, RequestId};
use crate::infrastructure::store::DocumentStore;
use http::Method;
use std::sync::Arc;
use std::time::Instant;

/// Owned by the handler for the duration of one request; stages borrow it
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: Method,
    /// Path and query exactly as received, before any rewrite
    pub url: CacheKey,
    /// `None` when the store could not be reached; caching is skipped for this request
    pub store: Option<Arc<dyn DocumentStore>>,
    pub received_at: Instant,
}

impl RequestContext {
    pub fn new(
        request_id: RequestId,
        method: Method,
        url: CacheKey,
        store: Option<Arc<dyn DocumentStore>>,
    ) -> Self {
        Self {
            request_id,
            method,
            url,
            store,
            received_at: Instant::now(),
        }
    }

    pub fn store(&self) -> Option<&dyn DocumentStore> {
        self.store.as_deref()
    }
}
