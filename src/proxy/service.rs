//! Main proxy service implementation
//!
//! The `ProxyService` drives the request pipeline:
//!
//! 1. acquire a store handle for the request (failure only disables caching)
//! 2. buffer the request body and, for non-GET methods, capture it in the background
//! 3. look the URL up in the cache and replay a hit
//! 4. otherwise forward upstream and stream the response back through the capture stage
//!
//! ```rust,ignore
//! use replay_cache::infrastructure::MemoryStore;
//! use replay_cache::proxy::{ProxyConfig, ProxyService};
//!
//! let service = ProxyService::new(ProxyConfig::default(), Arc::new(MemoryStore::new()))?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8083").await?;
//! axum::serve(listener, service.into_router()).await?;
//! ```

use crate::domain::{CacheKey, RequestId};
use crate::infrastructure::store::StoreConnector;
use crate::proxy::cache_lookup::{self, LookupOutcome};
use crate::proxy::context::RequestContext;
use crate::proxy::error_response::ErrorResponseExt;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::headers::{strip_hop_by_hop, CacheStatus, X_REPLAY_CACHE};
use crate::proxy::middleware::apply_middleware;
use crate::proxy::request_capture;
use crate::proxy::response_capture::{CapturingStream, ResponseCapture};
use crate::proxy::types::*;
use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ProxyService {
    config: Arc<ProxyConfig>,
    connector: Arc<dyn StoreConnector>,
    forwarder: Forwarder,
}

impl ProxyService {
    pub fn new(config: ProxyConfig, connector: Arc<dyn StoreConnector>) -> ProxyResult<Self> {
        let forwarder = Forwarder::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            connector,
            forwarder,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Every method and path goes to the pipeline; no local endpoints shadow upstream paths
    pub fn into_router(self) -> axum::Router {
        let router = axum::Router::new()
            .fallback(proxy_handler)
            .with_state(Arc::new(self));

        apply_middleware(router)
    }

    pub async fn handle(&self, request: Request) -> ProxyResult<Response> {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .copied()
            .unwrap_or_else(RequestId::generate);
        let (parts, body) = request.into_parts();

        let store = match self.connector.connect().await {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    error = %e,
                    "Error opening store connection, caching disabled for request"
                );
                None
            }
        };
        let ctx = RequestContext::new(
            request_id,
            parts.method.clone(),
            CacheKey::from_uri(&parts.uri),
            store,
        );
        debug!(request_id = %ctx.request_id, method = %ctx.method, url = %ctx.url, "Handling request");

        let body = self.collect_body(body).await?;

        if self.config.capture_requests && request_capture::should_capture(&ctx.method) {
            request_capture::spawn(&ctx, &parts.headers, body.clone());
        }

        if let LookupOutcome::Hit(entry) = cache_lookup::check(&ctx).await {
            match cache_lookup::replay(&entry) {
                Ok(response) => return Ok(self.tag(response, CacheStatus::Hit)),
                Err(e) => warn!(
                    request_id = %ctx.request_id,
                    url = %ctx.url,
                    error = %e,
                    "Stored entry unreadable, forwarding upstream"
                ),
            }
        }

        let upstream = self.forwarder.forward(&ctx, parts.headers, body).await?;

        let mut capture = ResponseCapture::new(&ctx);
        capture.on_headers(upstream.status, &upstream.headers);

        let mut headers = upstream.headers;
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(CapturingStream::new(
            upstream.body,
            capture,
        )));
        *response.status_mut() = upstream.status;
        *response.headers_mut() = headers;

        Ok(self.tag(response, CacheStatus::Miss))
    }

    async fn collect_body(&self, body: Body) -> ProxyResult<Bytes> {
        let max_size = self.config.max_request_size;
        http_body_util::Limited::new(body, *max_size.as_ref())
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    ProxyError::RequestTooLarge { max_size }
                } else {
                    ProxyError::RequestBody(e.to_string())
                }
            })
    }

    fn tag(&self, mut response: Response, status: CacheStatus) -> Response {
        if self.config.cache_status_header {
            response
                .headers_mut()
                .insert(X_REPLAY_CACHE, status.header_value());
        }
        response
    }
}

/// Axum handler for proxying requests
async fn proxy_handler(State(proxy): State<Arc<ProxyService>>, request: Request) -> Response {
    let request_id = request.extensions().get::<RequestId>().copied();

    match proxy.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status_code();
            let mut error = e.to_error_response();
            if let Some(id) = request_id {
                error = error.with_request_id(id.to_string());
            }
            error.into_response_with_status(status)
        }
    }
}
