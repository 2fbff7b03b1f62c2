//! Request capture stage: fire-and-forget audit copies of non-GET requests

use crate::domain::StoredRequest;
use crate::infrastructure::store::{collections, to_document, DocumentStore, StoreResult};
use crate::proxy::context::RequestContext;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Everything except the read-only method gets captured
pub fn should_capture(method: &Method) -> bool {
    method != Method::GET
}

pub async fn persist(store: &dyn DocumentStore, request: &StoredRequest) -> StoreResult<()> {
    store
        .insert(collections::REQUESTS, to_document(request)?)
        .await
}

/// Writes the request on a background task. Errors are logged and dropped.
pub fn spawn(ctx: &RequestContext, headers: &HeaderMap, body: Bytes) -> Option<JoinHandle<()>> {
    let Some(store) = ctx.store.as_ref().map(Arc::clone) else {
        debug!(request_id = %ctx.request_id, "No store connection, request not captured");
        return None;
    };

    let request = StoredRequest::new(
        ctx.request_id,
        ctx.url.clone(),
        &ctx.method,
        headers,
        &body,
    );

    Some(tokio::spawn(async move {
        match persist(store.as_ref(), &request).await {
            Ok(()) => debug!(
                request_id = %request.request_id,
                method = %request.method,
                url = %request.url,
                "Request captured"
            ),
            Err(e) => warn!(
                request_id = %request.request_id,
                url = %request.url,
                error = %e,
                "Error storing request"
            ),
        }
    }))
}
